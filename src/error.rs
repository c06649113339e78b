//! Error type shared by the reader modules.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTML parse error: {0}")]
    Html(String),

    #[error("speech engine error: {0}")]
    Engine(String),

    #[error("preferences error: {0}")]
    Preferences(String),

    #[error("no article content found in {0}")]
    NoArticle(String),
}

pub type Result<T> = std::result::Result<T, ReaderError>;
