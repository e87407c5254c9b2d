//! Error Types for the Booking Domain

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BookingError>;

#[derive(Error, Debug)]
pub enum BookingError {
    /// Input failed local validation; always recoverable by re-editing
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Staging store failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BookingError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        BookingError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Validation { field, reason } => {
                format!("Please check the {field} field: {reason}")
            }
            _ => "Something went wrong saving your booking details.".into(),
        }
    }
}
