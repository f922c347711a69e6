use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid operation {id}: {reason}")]
    InvalidPosition { id: u64, reason: &'static str },
    #[error("unknown operation {0}")]
    UnknownOperation(u64),
    #[error("operation {0} is already closed")]
    AlreadyClosed(u64),
    #[error("price unavailable for {0}")]
    PriceUnavailable(String),
    #[error("invalid ticket input: {0}")]
    InvalidInput(&'static str),
    #[error("malformed feed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
