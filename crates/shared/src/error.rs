use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field name to validation messages, in display order per field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request could not be read: malformed JSON, wrong content type, bad path.
    BadRequest,
    Unauthorized,
    NotFound,
    Validation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: FieldErrors,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            errors: FieldErrors::new(),
        }
    }

    /// A validation failure whose message is the first field message, with a
    /// count of the remaining ones appended.
    pub fn validation(errors: FieldErrors) -> Self {
        let mut messages = errors.values().flatten();
        let message = match messages.next() {
            Some(first) => {
                let remaining = messages.count();
                match remaining {
                    0 => first.clone(),
                    1 => format!("{first} (and 1 more error)"),
                    n => format!("{first} (and {n} more errors)"),
                }
            }
            None => "The given data was invalid.".to_string(),
        };
        Self {
            code: ErrorCode::Validation,
            message,
            errors,
        }
    }
}
