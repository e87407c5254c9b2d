//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Bad local input (OTP format, phone, amount); no request was sent
    #[error("Validation error: {0}")]
    Validation(String),

    /// Checkout widget failed to load or open; fatal to the attempt
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Network/5xx on a verify or OTP call; absorbed by the next poll tick
    #[error("Verification failed transiently: {0}")]
    VerificationTransient(String),

    /// Gateway- or user-reported cancellation
    #[error("Payment cancelled")]
    PaymentCancelled,

    /// Booking creation failed after confirmed payment; never auto-retried
    #[error("Booking commit failed for {reference}: {reason}")]
    Commit { reference: String, reason: String },

    /// Missing/expired credential at commit time
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PaymentError {
    /// Check if this error is absorbed by the polling loop rather than surfaced
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::VerificationTransient(_) | PaymentError::Network(_)
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Validation(msg) => msg.clone(),
            PaymentError::GatewayUnavailable(_) => {
                "The payment service could not be reached. Please try again.".into()
            }
            PaymentError::PaymentCancelled => {
                "Payment cancelled. No further prompts will be sent.".into()
            }
            PaymentError::Commit { reference, .. } => format!(
                "Your payment went through but the booking could not be saved. \
                 Contact support with reference {reference}."
            ),
            PaymentError::Unauthenticated(_) => {
                "Your session has expired. Sign in again to finish your booking.".into()
            }
            _ => "An error occurred processing your payment.".into(),
        }
    }
}

impl From<booking_core::BookingError> for PaymentError {
    fn from(err: booking_core::BookingError) -> Self {
        match err {
            booking_core::BookingError::Validation { .. } => {
                PaymentError::Validation(err.to_string())
            }
            other => PaymentError::Config(other.to_string()),
        }
    }
}
