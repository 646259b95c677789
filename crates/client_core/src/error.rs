use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("url '{0}' cannot address a record")]
    CannotBeABase(String),
}

impl ListError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(err) => err.status(),
            Self::Status { status, .. } => Some(*status),
            Self::InvalidUrl(_) | Self::CannotBeABase(_) => None,
        }
    }
}
