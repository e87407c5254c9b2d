//! Mock Payment Collaborators
//!
//! For testing and demo purposes: scripted gateway, verifier, committer, and
//! credential source with call counters, so orchestration behavior can be
//! asserted without a backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use booking_core::{Booking, BookingIntent};
use chrono::Utc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::commit::{BookingCommitter, CredentialProvider};
use crate::error::{PaymentError, Result};
use crate::gateway::{CheckoutConfig, CheckoutGateway, CheckoutOutcome};
use crate::reference::Reference;
use crate::verify::{OtpCode, VerificationClient, VerificationStatus};

/// Scripted checkout gateway
pub struct MockGateway {
    outcome: Mutex<Option<CheckoutOutcome>>,
    load_delay: Duration,
    loaded: OnceCell<()>,
    loads: AtomicUsize,
    open_calls: AtomicUsize,
}

impl MockGateway {
    /// Gateway whose next `open` resolves to `outcome`
    pub fn with_outcome(outcome: CheckoutOutcome) -> Self {
        Self {
            outcome: Mutex::new(Some(outcome)),
            load_delay: Duration::ZERO,
            loaded: OnceCell::new(),
            loads: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
        }
    }

    /// Gateway whose `open` never resolves (widget left open by the user)
    pub fn holding_open() -> Self {
        Self {
            outcome: Mutex::new(None),
            load_delay: Duration::ZERO,
            loaded: OnceCell::new(),
            loads: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate a slow integration load, for load-sharing assertions
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Number of underlying integration loads performed
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckoutGateway for MockGateway {
    async fn ensure_loaded(&self) -> Result<()> {
        self.loaded
            .get_or_init(|| async {
                tokio::time::sleep(self.load_delay).await;
                self.loads.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        Ok(())
    }

    async fn open(&self, config: CheckoutConfig) -> Result<CheckoutOutcome> {
        if self.loaded.get().is_none() {
            return Err(PaymentError::GatewayUnavailable(
                "open() called before the integration finished loading".into(),
            ));
        }
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(reference = %config.reference, "Mock checkout opened");

        let scripted = self.outcome.lock().unwrap().take();
        match scripted {
            Some(outcome) => Ok(outcome),
            // No scripted outcome: the widget stays open forever
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

type StatusScript = Mutex<VecDeque<std::result::Result<VerificationStatus, String>>>;

/// Scripted verification client
pub struct MockVerificationClient {
    verify_script: StatusScript,
    otp_script: StatusScript,
    fallback: Option<VerificationStatus>,
    verify_calls: AtomicUsize,
    otp_calls: AtomicUsize,
    cancel_notices: AtomicUsize,
}

impl MockVerificationClient {
    /// Verifier that plays `statuses` in order, then errors transiently
    pub fn with_statuses(
        statuses: Vec<std::result::Result<VerificationStatus, String>>,
    ) -> Self {
        Self {
            verify_script: Mutex::new(statuses.into()),
            otp_script: Mutex::new(VecDeque::new()),
            fallback: None,
            verify_calls: AtomicUsize::new(0),
            otp_calls: AtomicUsize::new(0),
            cancel_notices: AtomicUsize::new(0),
        }
    }

    /// Verifier that always reports `status`
    pub fn always(status: VerificationStatus) -> Self {
        Self {
            verify_script: Mutex::new(VecDeque::new()),
            otp_script: Mutex::new(VecDeque::new()),
            fallback: Some(status),
            verify_calls: AtomicUsize::new(0),
            otp_calls: AtomicUsize::new(0),
            cancel_notices: AtomicUsize::new(0),
        }
    }

    /// Script the responses to `submit_otp`
    pub fn with_otp_results(
        self,
        results: Vec<std::result::Result<VerificationStatus, String>>,
    ) -> Self {
        *self.otp_script.lock().unwrap() = results.into();
        self
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn otp_calls(&self) -> usize {
        self.otp_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_notices(&self) -> usize {
        self.cancel_notices.load(Ordering::SeqCst)
    }

    fn next(&self, script: &StatusScript) -> Result<VerificationStatus> {
        let scripted = script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(status)) => Ok(status),
            Some(Err(reason)) => Err(PaymentError::VerificationTransient(reason)),
            None => match self.fallback {
                Some(status) => Ok(status),
                None => Err(PaymentError::VerificationTransient(
                    "mock script exhausted".into(),
                )),
            },
        }
    }
}

#[async_trait]
impl VerificationClient for MockVerificationClient {
    async fn verify(&self, _reference: &Reference) -> Result<VerificationStatus> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.next(&self.verify_script)
    }

    async fn submit_otp(
        &self,
        _reference: &Reference,
        _code: &OtpCode,
    ) -> Result<VerificationStatus> {
        self.otp_calls.fetch_add(1, Ordering::SeqCst);
        self.next(&self.otp_script)
    }

    async fn cancel_notice(&self, _reference: &Reference) -> Result<()> {
        self.cancel_notices.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted booking committer
pub struct MockCommitter {
    failure: Mutex<Option<PaymentError>>,
    commit_calls: AtomicUsize,
}

impl Default for MockCommitter {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl MockCommitter {
    /// Committer that persists every booking it is asked to
    pub fn succeeding() -> Self {
        Self {
            failure: Mutex::new(None),
            commit_calls: AtomicUsize::new(0),
        }
    }

    /// Committer whose first commit fails with `error`
    pub fn failing_with(error: PaymentError) -> Self {
        Self {
            failure: Mutex::new(Some(error)),
            commit_calls: AtomicUsize::new(0),
        }
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookingCommitter for MockCommitter {
    async fn commit(
        &self,
        reference: &Reference,
        intent: &BookingIntent,
        _bearer: &str,
    ) -> Result<Booking> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }
        Ok(Booking {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            bus_id: intent.bus_id.clone(),
            seats: intent.seats.clone(),
            total: intent.total,
            passenger: intent.passenger.clone(),
            created_at: Utc::now(),
        })
    }
}

/// Credential source backed by a settable token slot
pub struct StaticCredentials {
    token: Mutex<Option<String>>,
}

impl StaticCredentials {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    /// No credential: every lookup is `Unauthenticated`
    pub fn unauthenticated() -> Self {
        Self {
            token: Mutex::new(None),
        }
    }

    /// Install a credential, as re-authentication would
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.lock().unwrap() = Some(token.into());
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Result<String> {
        self.token
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PaymentError::Unauthenticated("no credential available".into()))
    }
}
