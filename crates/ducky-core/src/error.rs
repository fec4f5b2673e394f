use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuckyError {
    #[error("unparsable source: {0}")]
    UnparsableSource(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("reasoning unavailable: {0}")]
    ReasoningUnavailable(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DuckyError>;
