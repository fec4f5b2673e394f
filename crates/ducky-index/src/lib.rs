pub mod retrieval;
pub mod schema;
pub mod store;

pub use retrieval::{build_bundle, get_related, RelatedEntity};
pub use store::SqliteIndexStore;
