//! Error types for the reader engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("location index build failed: {0}")]
    IndexBuild(String),

    #[error("location index has no samples")]
    OutOfRangeReference,

    #[error("invalid reading progress: {0}")]
    InvalidProgress(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("document load failed: {0}")]
    Load(String),

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("operation cancelled at stage={0}")]
    Cancelled(&'static str),

    #[error("reader not ready: {0}")]
    NotReady(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
