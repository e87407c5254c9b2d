//! Checkout Gateway Adapter
//!
//! Wraps the externally hosted checkout widget behind a future-shaped
//! contract: the integration is loaded exactly once per process, and each
//! `open` resolves to exactly one tagged [`CheckoutOutcome`] regardless of
//! which widget callback produced it. The adapter never retries; a retry is a
//! new `open` from a new payment attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{PaymentError, Result};
use crate::reference::Reference;

/// Customer projection sent to the gateway widget
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutCustomer {
    pub name: String,
    /// Canonical international form, normalized upstream
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Everything the widget needs to present a checkout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutConfig {
    pub reference: Reference,

    /// Amount formatted to two decimal places
    pub amount: String,

    pub currency: String,

    /// Channels offered to the user, the intent's hint first
    pub channels: Vec<String>,

    pub customer: CheckoutCustomer,
}

/// The one event a checkout attempt resolves to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// Payment authorized through the widget
    Success { channel: String },

    /// User closed the widget without paying
    Closed,

    /// Widget handed off to an offline confirmation flow (e.g. mobile money
    /// prompt on the customer's handset); status must be polled
    ConfirmationPending,
}

/// External checkout integration
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Load the integration. Idempotent: concurrent callers share a single
    /// underlying load, and later calls resolve immediately.
    async fn ensure_loaded(&self) -> Result<()>;

    /// Open the checkout widget. Must only be called after `ensure_loaded`
    /// resolved; resolves to exactly one outcome per attempt.
    async fn open(&self, config: CheckoutConfig) -> Result<CheckoutOutcome>;
}

/// Gateway endpoint configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Hosted checkout base URL
    pub base_url: String,

    /// Public integration key
    pub public_key: String,

    /// Seconds between outcome polls while the widget is open
    pub outcome_poll_secs: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("GATEWAY_URL")
            .map_err(|_| PaymentError::Config("GATEWAY_URL not set".into()))?;
        let public_key = std::env::var("GATEWAY_PUBLIC_KEY")
            .map_err(|_| PaymentError::Config("GATEWAY_PUBLIC_KEY not set".into()))?;
        Ok(Self {
            base_url,
            public_key,
            outcome_poll_secs: 2,
        })
    }
}

#[derive(Deserialize)]
struct IntegrationBootstrap {
    session_endpoint: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
enum OutcomeResponse {
    Open,
    Success { channel: String },
    Closed,
    ConfirmationPending,
}

/// reqwest-backed adapter for the hosted checkout
pub struct HostedGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    integration: OnceCell<IntegrationBootstrap>,
}

impl HostedGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            integration: OnceCell::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(GatewayConfig::from_env()?))
    }

    async fn bootstrap(&self) -> Result<IntegrationBootstrap> {
        let url = format!(
            "{}/integration/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.public_key
        );
        let bootstrap = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?;
        tracing::info!("Checkout integration loaded");
        Ok(bootstrap)
    }
}

#[async_trait]
impl CheckoutGateway for HostedGateway {
    async fn ensure_loaded(&self) -> Result<()> {
        // get_or_try_init deduplicates concurrent loads; a failed load leaves
        // the cell empty so the next attempt loads again.
        self.integration
            .get_or_try_init(|| self.bootstrap())
            .await?;
        Ok(())
    }

    async fn open(&self, config: CheckoutConfig) -> Result<CheckoutOutcome> {
        let Some(integration) = self.integration.get() else {
            return Err(PaymentError::GatewayUnavailable(
                "open() called before the integration finished loading".into(),
            ));
        };

        let session_url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            integration.session_endpoint
        );
        self.client
            .post(&session_url)
            .json(&config)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| PaymentError::GatewayUnavailable(e.to_string()))?;

        tracing::info!(reference = %config.reference, "Checkout widget opened");

        // The widget is user-driven: no deadline here, the attempt is bounded
        // by the user's own interaction.
        let outcome_url = format!("{session_url}/{}/outcome", config.reference);
        loop {
            let response: OutcomeResponse = self
                .client
                .get(&outcome_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match response {
                OutcomeResponse::Open => {
                    tokio::time::sleep(std::time::Duration::from_secs(
                        self.config.outcome_poll_secs,
                    ))
                    .await;
                }
                OutcomeResponse::Success { channel } => {
                    return Ok(CheckoutOutcome::Success { channel });
                }
                OutcomeResponse::Closed => return Ok(CheckoutOutcome::Closed),
                OutcomeResponse::ConfirmationPending => {
                    return Ok(CheckoutOutcome::ConfirmationPending);
                }
            }
        }
    }
}
