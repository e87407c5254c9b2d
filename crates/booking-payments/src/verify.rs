//! Payment Verification Client
//!
//! Single-shot wrappers over the remote verification protocol: a status read
//! keyed by reference, the OTP step-up submission, and the fire-and-forget
//! cancellation notice.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::reference::Reference;

/// Status vocabulary reported by the verification endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Successful,
    OtpRequired,
    PayOffline,
    Pending,
    Failed,
    Cancelled,
}

impl VerificationStatus {
    /// Whether this status ends the polling loop. `Pending` and `PayOffline`
    /// keep the poller ticking.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            VerificationStatus::Successful
                | VerificationStatus::OtpRequired
                | VerificationStatus::Failed
                | VerificationStatus::Cancelled
        )
    }
}

/// A locally validated OTP code. Construction enforces 4-6 ASCII digits, so
/// an invalid code is rejected before any request is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let digits = (4..=6).contains(&trimmed.len())
            && trimmed.chars().all(|c| c.is_ascii_digit());
        if digits {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(PaymentError::Validation(
                "OTP must be 4 to 6 digits".into(),
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Remote verification operations, all cancellable by dropping the future
#[async_trait]
pub trait VerificationClient: Send + Sync {
    /// Read the current payment status for a reference
    async fn verify(&self, reference: &Reference) -> Result<VerificationStatus>;

    /// Submit a step-up OTP code and read the resulting status
    async fn submit_otp(&self, reference: &Reference, code: &OtpCode)
        -> Result<VerificationStatus>;

    /// Tell the backend a reference was cancelled. Best effort: delivery
    /// failure is logged by the caller and never blocks the local transition.
    async fn cancel_notice(&self, reference: &Reference) -> Result<()>;
}

/// Verification endpoint configuration
#[derive(Clone, Debug)]
pub struct VerifierConfig {
    /// Backend base URL
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            timeout_secs: 15,
        }
    }
}

impl VerifierConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("PAYMENTS_API_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into());
        Self {
            base_url,
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    status: VerificationStatus,
}

#[derive(Serialize)]
struct OtpRequest<'a> {
    reference: &'a str,
    code: &'a str,
}

/// reqwest-backed verification client
pub struct HttpVerificationClient {
    client: reqwest::Client,
    config: VerifierConfig,
}

impl HttpVerificationClient {
    pub fn new(config: VerifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(VerifierConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl VerificationClient for HttpVerificationClient {
    async fn verify(&self, reference: &Reference) -> Result<VerificationStatus> {
        let response = self
            .client
            .get(self.url(&format!("/payments/{reference}/status")))
            .send()
            .await?;

        if response.status().is_server_error() {
            return Err(PaymentError::VerificationTransient(format!(
                "verify returned {}",
                response.status()
            )));
        }
        let body: StatusResponse = response.error_for_status()?.json().await?;
        Ok(body.status)
    }

    async fn submit_otp(
        &self,
        reference: &Reference,
        code: &OtpCode,
    ) -> Result<VerificationStatus> {
        let response = self
            .client
            .post(self.url(&format!("/payments/{reference}/otp")))
            .json(&OtpRequest {
                reference: reference.as_str(),
                code: code.as_str(),
            })
            .send()
            .await?;

        if response.status().is_server_error() {
            return Err(PaymentError::VerificationTransient(format!(
                "otp submission returned {}",
                response.status()
            )));
        }
        let body: StatusResponse = response.error_for_status()?.json().await?;
        Ok(body.status)
    }

    async fn cancel_notice(&self, reference: &Reference) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/payments/{reference}/cancel")))
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::warn!(
                reference = %reference,
                status = %response.status(),
                "Cancel notice not accepted by backend"
            );
        }
        Ok(())
    }
}
