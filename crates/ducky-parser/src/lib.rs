pub mod extractor;
pub mod language;
pub mod normalize;

pub use extractor::{EntityExtractor, ExtractedEntity};
pub use language::LanguageRegistry;
pub use normalize::{hash_str, normalize_source, strip_whitespace, NormalizeMode};
