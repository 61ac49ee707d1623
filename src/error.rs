use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A header field that could not be interpreted at its fixed token positions.
///
/// These are recoverable: the field is skipped for scoring and the rest of
/// the analysis carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldError {
    #[error("{field} field has {found} tokens, token {index} is required")]
    MissingToken {
        field: String,
        index: usize,
        found: usize,
    },
}

impl FieldError {
    pub fn field(&self) -> &str {
        match self {
            FieldError::MissingToken { field, .. } => field,
        }
    }
}

/// Bounds-checked positional access into a split header record.
///
/// Index 0 is the field label itself (e.g. `Received:`).
pub fn token_at<'a>(tokens: &'a [String], index: usize, field: &str) -> Result<&'a str, FieldError> {
    tokens
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| FieldError::MissingToken {
            field: field.to_string(),
            index,
            found: tokens.len(),
        })
}
