use poolheap_arena::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backing pool: {0}")]
    Pool(#[from] PoolError),
    #[error("verification failed at operation {op}: {message}")]
    Verification { op: usize, message: String },
    #[error("heaps diverged: {0}")]
    Transparency(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
