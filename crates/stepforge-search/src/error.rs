use stepforge_core::GenerationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("invalid search config: {0}")]
    InvalidConfig(String),

    #[error("search finished without a scored candidate")]
    NoCandidates,

    #[error("search worker panicked")]
    WorkerPanicked,

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SearchResult<T> = Result<T, SearchError>;
