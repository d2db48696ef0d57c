use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
