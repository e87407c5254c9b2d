//! Booking Committer
//!
//! The single remote write that turns a confirmed payment into a persisted
//! booking. The session calls this at most once per reference; a failure here
//! is surfaced with the reference for manual reconciliation and never
//! auto-retried, since a retry risks a duplicate booking if the first attempt
//! partially succeeded server-side.

use async_trait::async_trait;
use booking_core::{Booking, BookingIntent};
use serde::Serialize;

use crate::error::{PaymentError, Result};
use crate::reference::Reference;

/// Bearer credential source (the auth collaborator, out of scope here)
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token; missing or expired is `Unauthenticated`
    async fn bearer_token(&self) -> Result<String>;
}

/// Remote booking creation
#[async_trait]
pub trait BookingCommitter: Send + Sync {
    async fn commit(
        &self,
        reference: &Reference,
        intent: &BookingIntent,
        bearer: &str,
    ) -> Result<Booking>;
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    reference: &'a str,
    #[serde(flatten)]
    intent: &'a BookingIntent,
}

/// Committer endpoint configuration
#[derive(Clone, Debug)]
pub struct CommitterConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            timeout_secs: 30,
        }
    }
}

impl CommitterConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("BOOKINGS_API_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into());
        Self {
            base_url,
            ..Default::default()
        }
    }
}

/// reqwest-backed committer
pub struct HttpBookingCommitter {
    client: reqwest::Client,
    config: CommitterConfig,
}

impl HttpBookingCommitter {
    pub fn new(config: CommitterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(CommitterConfig::from_env())
    }
}

#[async_trait]
impl BookingCommitter for HttpBookingCommitter {
    async fn commit(
        &self,
        reference: &Reference,
        intent: &BookingIntent,
        bearer: &str,
    ) -> Result<Booking> {
        let url = format!(
            "{}/bookings",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .json(&CommitRequest {
                reference: reference.as_str(),
                intent,
            })
            .send()
            .await
            .map_err(|e| PaymentError::Commit {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PaymentError::Unauthenticated(
                "booking endpoint rejected the credential".into(),
            ));
        }
        if !response.status().is_success() {
            return Err(PaymentError::Commit {
                reference: reference.to_string(),
                reason: format!("booking endpoint returned {}", response.status()),
            });
        }

        let booking: Booking = response.json().await.map_err(|e| PaymentError::Commit {
            reference: reference.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            reference = %reference,
            booking_id = %booking.id,
            "Booking committed"
        );
        Ok(booking)
    }
}
