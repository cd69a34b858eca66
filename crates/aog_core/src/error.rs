use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error carried across every layer of the crate.
///
/// `code` is a stable machine-readable identifier (e.g. `INVALID_TRANSITION`,
/// `AOG_NOT_FOUND`); `details` holds structured context such as the offending
/// field pair of a timestamp-order violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Missing-entity error for a given entity kind (`AOG_NOT_FOUND`,
    /// `PART_NOT_FOUND`, ...).
    pub fn not_found(code: &str, entity: &str, id: i64) -> Self {
        Self::new(code, format!("{entity} {id} not found"))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
