//! Payment Session Orchestration
//!
//! The state machine that owns one payment attempt end to end: it drives the
//! checkout gateway, the verification poller, the OTP step-up, and the
//! exactly-once booking commit, and reports the externally observable status
//! through a watch channel.
//!
//! Every async continuation re-checks the cancellation token and the current
//! state when it resumes, before applying any effect. Gateway outcomes, poll
//! ticks, and OTP responses are independent event sources that can arrive in
//! any order; no ordering is assumed across them. All state mutation funnels
//! through [`PaymentSession::set_state`] under one mutex, and the racing
//! success signals (direct gateway path vs. poller path) are resolved by a
//! compare-and-swap on the `committed` flag, not by ordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use booking_core::{format_amount, Booking, BookingIntent, IntentStore, StagedPayment};
use tokio::sync::watch;

use crate::cancel::CancellationToken;
use crate::commit::{BookingCommitter, CredentialProvider};
use crate::error::{PaymentError, Result};
use crate::gateway::{CheckoutConfig, CheckoutCustomer, CheckoutGateway, CheckoutOutcome};
use crate::poller::{PollOutcome, PollerConfig, PollerHandle, VerificationPoller};
use crate::reference::Reference;
use crate::verify::{OtpCode, VerificationClient, VerificationStatus};

/// Currency every checkout is denominated in
pub const CURRENCY: &str = "ZMW";

/// Why a session ended in `Cancelled`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The user asked to stop
    UserRequested,

    /// The user closed the checkout widget without paying
    GatewayClosed,

    /// The gateway reported the payment failed or was cancelled
    GatewayReported,

    /// The polling deadline passed with the payment unsettled
    Timeout,
}

impl CancelReason {
    /// Message shown to the user; the timeout wording is deliberately
    /// different from a reported cancellation.
    pub fn user_message(self) -> &'static str {
        match self {
            CancelReason::UserRequested | CancelReason::GatewayClosed => {
                "Payment cancelled. No further prompts will be sent."
            }
            CancelReason::GatewayReported => {
                "The payment was declined or cancelled. No further prompts will be sent."
            }
            CancelReason::Timeout => {
                "Payment verification timed out. Contact support if you were charged."
            }
        }
    }
}

/// Why a session ended in `Failed`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The checkout widget failed to load or open; retry with a new session
    GatewayUnavailable(String),

    /// Booking creation failed after confirmed payment. Carries the
    /// reference for manual reconciliation; never auto-retried.
    Commit { reference: String, reason: String },

    /// No valid credential at commit time; re-authenticate, then retry the
    /// commit for this same reference
    Unauthenticated,
}

/// Externally observable session status
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentState {
    Idle,
    Processing,
    PayOffline,
    Verifying,
    OtpRequired,
    Succeeded,
    Cancelled(CancelReason),
    Failed(FailureKind),
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Succeeded | PaymentState::Cancelled(_) | PaymentState::Failed(_)
        )
    }
}

/// External collaborators a session is built from
pub struct SessionDeps {
    pub gateway: Arc<dyn CheckoutGateway>,
    pub verifier: Arc<dyn VerificationClient>,
    pub committer: Arc<dyn BookingCommitter>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub staging: Arc<dyn IntentStore>,
    pub poller: PollerConfig,
}

struct InnerState {
    state: PaymentState,
    /// Transient OTP input, cleared on every terminal or OTP-consuming
    /// transition
    otp_buffer: String,
    booking: Option<Booking>,
}

/// One payment attempt. A retry is a new session with a new reference; a
/// terminal session is never resurrected.
pub struct PaymentSession {
    reference: Reference,
    intent: BookingIntent,

    inner: Mutex<InnerState>,
    status_tx: watch::Sender<PaymentState>,

    /// Commit-once guard, acquired by compare-and-swap before the commit
    /// request goes out; never reset to false.
    committed: AtomicBool,

    /// Ensures cancellation propagation runs once even under racing cancels
    cancel_started: AtomicBool,

    token: CancellationToken,
    poller: Mutex<Option<PollerHandle>>,
    poller_config: PollerConfig,

    gateway: Arc<dyn CheckoutGateway>,
    verifier: Arc<dyn VerificationClient>,
    committer: Arc<dyn BookingCommitter>,
    credentials: Arc<dyn CredentialProvider>,
    staging: Arc<dyn IntentStore>,

    weak: Weak<PaymentSession>,
}

impl PaymentSession {
    /// Create a fresh session around an intent. The reference is generated
    /// here and immutable for the session's lifetime.
    pub fn new(intent: BookingIntent, deps: SessionDeps) -> Arc<Self> {
        Self::build(Reference::generate(), intent, PaymentState::Idle, deps)
    }

    /// Rehydrate a staged attempt after a restart, straight into
    /// verification. A resumed session never re-opens the gateway widget.
    pub fn resume(deps: SessionDeps) -> Result<Option<Arc<Self>>> {
        let Some(staged) = deps.staging.load().map_err(PaymentError::from)? else {
            return Ok(None);
        };
        let StagedPayment {
            reference, intent, ..
        } = staged;
        tracing::info!(reference = %reference, "Resuming staged payment attempt");
        let session = Self::build(
            Reference::from_string(reference),
            intent,
            PaymentState::Verifying,
            deps,
        );
        session.start_poller();
        Ok(Some(session))
    }

    fn build(
        reference: Reference,
        intent: BookingIntent,
        initial: PaymentState,
        deps: SessionDeps,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(initial.clone());
        Arc::new_cyclic(|weak| Self {
            reference,
            intent,
            inner: Mutex::new(InnerState {
                state: initial,
                otp_buffer: String::new(),
                booking: None,
            }),
            status_tx,
            committed: AtomicBool::new(false),
            cancel_started: AtomicBool::new(false),
            token: CancellationToken::new(),
            poller: Mutex::new(None),
            poller_config: deps.poller,
            gateway: deps.gateway,
            verifier: deps.verifier,
            committer: deps.committer,
            credentials: deps.credentials,
            staging: deps.staging,
            weak: weak.clone(),
        })
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn status(&self) -> PaymentState {
        self.inner.lock().unwrap().state.clone()
    }

    /// Watch the externally observable status (for the UI layer)
    pub fn subscribe(&self) -> watch::Receiver<PaymentState> {
        self.status_tx.subscribe()
    }

    pub fn committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    /// The persisted booking, once the session succeeded
    pub fn booking(&self) -> Option<Booking> {
        self.inner.lock().unwrap().booking.clone()
    }

    /// Current transient OTP input (for UI display)
    pub fn otp_buffer(&self) -> String {
        self.inner.lock().unwrap().otp_buffer.clone()
    }

    /// Validate the intent, stage it durably, load the gateway integration,
    /// and open the checkout widget. Callable once, from `Idle`.
    pub async fn initiate(&self) -> Result<()> {
        self.intent.validate().map_err(PaymentError::from)?;

        if !self.set_state(PaymentState::Processing, |s| {
            matches!(s, PaymentState::Idle)
        }) {
            return Err(PaymentError::Validation(
                "payment attempt already started".into(),
            ));
        }

        // Staging is resilience, not correctness: a failed save is logged
        // and the attempt continues without reload protection.
        let staged = StagedPayment::new(self.reference.as_str(), self.intent.clone());
        if let Err(e) = self.staging.save(&staged) {
            tracing::warn!(reference = %self.reference, error = %e, "Could not stage intent");
        }

        if let Err(e) = self.gateway.ensure_loaded().await {
            tracing::error!(reference = %self.reference, error = %e, "Gateway failed to load");
            self.finish_failed(FailureKind::GatewayUnavailable(e.to_string()));
            return Err(e);
        }

        let session = self.arc();
        tokio::spawn(async move {
            let result = tokio::select! {
                () = session.token.cancelled() => return,
                result = session.gateway.open(session.checkout_config()) => result,
            };
            session.on_checkout_outcome(result).await;
        });

        Ok(())
    }

    /// Submit a step-up OTP code. Format validation is local and precedes
    /// any network call; a transport failure puts the session back into
    /// `Verifying` and restarts the poller, so the user does not repeat a
    /// step-up unnecessarily.
    pub async fn submit_otp(&self, raw: &str) -> Result<()> {
        let code = OtpCode::parse(raw)?;

        {
            let mut inner = self.inner.lock().unwrap();
            if self.token.is_tripped() {
                return Err(PaymentError::PaymentCancelled);
            }
            if !matches!(inner.state, PaymentState::OtpRequired) {
                return Err(PaymentError::Validation(
                    "no OTP challenge is active".into(),
                ));
            }
            inner.otp_buffer = code.as_str().to_string();
        }

        let result = tokio::select! {
            () = self.token.cancelled() => return Ok(()),
            result = self.verifier.submit_otp(&self.reference, &code) => result,
        };

        self.inner.lock().unwrap().otp_buffer.clear();

        match result {
            Ok(status) => self.on_verification_status(status).await,
            Err(e) => {
                tracing::warn!(
                    reference = %self.reference,
                    error = %e,
                    "OTP submission failed transiently; resuming polling"
                );
                if self.set_state(PaymentState::Verifying, |s| {
                    matches!(s, PaymentState::OtpRequired)
                }) {
                    self.start_poller();
                }
            }
        }
        Ok(())
    }

    /// User-initiated cancellation; safe from any non-terminal state and
    /// idempotent.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::UserRequested);
    }

    /// Retry the booking commit for this same, already-paid reference after
    /// re-authentication. Only valid from `Failed(Unauthenticated)`: whether
    /// the credential was missing locally or the endpoint answered 401, the
    /// request was refused before anything was booked, so the commit guard
    /// can be re-armed for exactly one more attempt.
    pub async fn retry_commit(&self) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if !matches!(
                inner.state,
                PaymentState::Failed(FailureKind::Unauthenticated)
            ) {
                return Err(PaymentError::Validation(
                    "no commit is awaiting re-authentication".into(),
                ));
            }
        }
        if self.token.is_tripped() {
            return Err(PaymentError::PaymentCancelled);
        }

        // The one sanctioned exit from Failed: the payment is confirmed and
        // nothing was booked. State leaves Failed before the guard is
        // re-armed, so a signal that wins the re-armed race can still reach
        // Succeeded.
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = PaymentState::Verifying;
            self.status_tx.send_replace(PaymentState::Verifying);
        }
        self.committed.store(false, Ordering::SeqCst);
        self.try_commit().await;
        Ok(())
    }

    fn checkout_config(&self) -> CheckoutConfig {
        let hint = self.intent.channel_hint;
        let mut channels = vec![hint.as_str().to_string()];
        for channel in [
            booking_core::PaymentChannel::MobileMoney,
            booking_core::PaymentChannel::Card,
        ] {
            if channel != hint {
                channels.push(channel.as_str().to_string());
            }
        }
        CheckoutConfig {
            reference: self.reference.clone(),
            amount: format_amount(self.intent.total),
            currency: CURRENCY.into(),
            channels,
            customer: CheckoutCustomer {
                name: self.intent.passenger.name.clone(),
                phone: self.intent.passenger.phone.to_string(),
                email: None,
            },
        }
    }

    async fn on_checkout_outcome(&self, result: Result<CheckoutOutcome>) {
        match result {
            Err(e) => {
                tracing::error!(reference = %self.reference, error = %e, "Checkout failed to open");
                self.finish_failed(FailureKind::GatewayUnavailable(e.to_string()));
            }
            Ok(CheckoutOutcome::Success { channel }) => {
                tracing::info!(reference = %self.reference, channel = %channel, "Gateway reported success");
                if !self.set_state(PaymentState::Verifying, |s| {
                    matches!(s, PaymentState::Processing)
                }) {
                    return;
                }
                // One direct read before falling back to polling
                let result = tokio::select! {
                    () = self.token.cancelled() => return,
                    result = self.verifier.verify(&self.reference) => result,
                };
                match result {
                    Ok(status) => self.on_verification_status(status).await,
                    Err(e) => {
                        tracing::debug!(
                            reference = %self.reference,
                            error = %e,
                            "Direct verification failed; polling instead"
                        );
                        self.start_poller();
                    }
                }
            }
            Ok(CheckoutOutcome::Closed) => {
                self.cancel_with(CancelReason::GatewayClosed);
            }
            Ok(CheckoutOutcome::ConfirmationPending) => {
                if self.set_state(PaymentState::PayOffline, |s| {
                    matches!(s, PaymentState::Processing)
                }) {
                    self.start_poller();
                }
            }
        }
    }

    async fn on_poll_outcome(&self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Stopped => {}
            PollOutcome::TimedOut => self.cancel_with(CancelReason::Timeout),
            PollOutcome::Settled(status) => self.on_verification_status(status).await,
        }
    }

    /// Apply a verification status, wherever it came from (direct gateway
    /// path, poll tick, or OTP response).
    async fn on_verification_status(&self, status: VerificationStatus) {
        if self.token.is_tripped() {
            return;
        }
        match status {
            VerificationStatus::Successful => self.try_commit().await,
            VerificationStatus::OtpRequired => {
                self.stop_poller();
                self.set_state(PaymentState::OtpRequired, |s| {
                    matches!(
                        s,
                        PaymentState::Processing
                            | PaymentState::Verifying
                            | PaymentState::PayOffline
                            | PaymentState::OtpRequired
                    )
                });
            }
            VerificationStatus::Failed | VerificationStatus::Cancelled => {
                self.cancel_with(CancelReason::GatewayReported);
            }
            VerificationStatus::Pending | VerificationStatus::PayOffline => {
                // Unsettled answer on the direct path: hand over to polling
                if self.poller.lock().unwrap().is_none() {
                    self.start_poller();
                }
            }
        }
    }

    /// Commit the booking at most once. The guard is acquired before the
    /// request goes out; whichever of the racing success paths loses the
    /// compare-and-swap observes `committed == true` and does nothing.
    async fn try_commit(&self) {
        if self.token.is_tripped() {
            return;
        }

        // Credential first: a missing credential must not consume the guard,
        // so the commit stays retryable after re-authentication.
        let bearer = match self.credentials.bearer_token().await {
            Ok(bearer) => bearer,
            Err(e) => {
                tracing::warn!(reference = %self.reference, error = %e, "No credential for commit");
                self.finish_failed(FailureKind::Unauthenticated);
                return;
            }
        };

        if self
            .committed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(reference = %self.reference, "Commit already performed, ignoring duplicate signal");
            return;
        }
        self.stop_poller();

        let result = tokio::select! {
            () = self.token.cancelled() => return,
            result = self
                .committer
                .commit(&self.reference, &self.intent, &bearer) => result,
        };

        match result {
            Ok(booking) => {
                if let Err(e) = self.staging.clear() {
                    tracing::warn!(reference = %self.reference, error = %e, "Could not clear staged intent");
                }
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.booking = Some(booking);
                }
                self.set_state(PaymentState::Succeeded, |_| true);
            }
            Err(PaymentError::Unauthenticated(reason)) => {
                tracing::warn!(reference = %self.reference, reason = %reason, "Commit rejected as unauthenticated");
                self.finish_failed(FailureKind::Unauthenticated);
            }
            Err(e) => {
                // The most severe class: payment confirmed, booking missing.
                // Surfaced with the reference; never retried automatically.
                tracing::error!(
                    reference = %self.reference,
                    error = %e,
                    "Booking commit failed after confirmed payment"
                );
                self.finish_failed(FailureKind::Commit {
                    reference: self.reference.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Cancellation propagation: trip the token, stop the poller, let
    /// guarded in-flight calls lapse, notify the backend best-effort,
    /// discard the staged intent, then settle into `Cancelled`.
    fn cancel_with(&self, reason: CancelReason) {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
        }
        if self
            .cancel_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.token.trip();
        self.stop_poller();

        // Fire-and-forget: delivery failure never blocks the local transition
        let verifier = Arc::clone(&self.verifier);
        let reference = self.reference.clone();
        tokio::spawn(async move {
            if let Err(e) = verifier.cancel_notice(&reference).await {
                tracing::warn!(reference = %reference, error = %e, "Cancel notice not delivered");
            }
        });

        if let Err(e) = self.staging.clear() {
            tracing::warn!(reference = %self.reference, error = %e, "Could not clear staged intent");
        }

        self.set_state(PaymentState::Cancelled(reason), |_| true);
        tracing::info!(
            reference = %self.reference,
            reason = ?reason,
            "Payment cancelled; no further prompts will be sent"
        );
    }

    fn finish_failed(&self, kind: FailureKind) {
        self.stop_poller();
        if let Err(e) = self.staging.clear() {
            tracing::warn!(reference = %self.reference, error = %e, "Could not clear staged intent");
        }
        self.set_state(PaymentState::Failed(kind), |_| true);
    }

    /// The single point of serialization for state mutation. Refuses to
    /// leave a terminal state, and once the token is tripped admits only
    /// `Cancelled`.
    fn set_state(
        &self,
        next: PaymentState,
        permitted_from: impl FnOnce(&PaymentState) -> bool,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return false;
        }
        if self.token.is_tripped() && !matches!(next, PaymentState::Cancelled(_)) {
            return false;
        }
        if !permitted_from(&inner.state) {
            return false;
        }
        if next.is_terminal() {
            inner.otp_buffer.clear();
        }
        tracing::info!(
            reference = %self.reference,
            from = ?inner.state,
            to = ?next,
            "Payment state transition"
        );
        inner.state = next.clone();
        self.status_tx.send_replace(next);
        true
    }

    fn start_poller(&self) {
        let poller = VerificationPoller::new(
            Arc::clone(&self.verifier),
            self.reference.clone(),
            self.poller_config,
            self.token.clone(),
        );
        let stop = poller.stop_token();
        let session = self.arc();
        let mut slot = self.poller.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.stop();
        }
        let task = tokio::spawn(async move {
            let outcome = poller.run().await;
            // Apply the outcome from a fresh task: the continuation may stop
            // this (now finished) poller handle, and aborting the task it
            // runs in would cancel the continuation itself.
            tokio::spawn(async move { session.on_poll_outcome(outcome).await });
        });
        *slot = Some(PollerHandle::new(stop, task));
    }

    fn stop_poller(&self) {
        if let Some(handle) = self.poller.lock().unwrap().take() {
            handle.stop();
        }
    }

    fn arc(&self) -> Arc<Self> {
        self.weak.upgrade().unwrap_or_else(|| {
            // Unreachable while &self exists; the session is never leaked
            // outside its Arc.
            unreachable!("session accessed outside its Arc")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCommitter, MockGateway, MockVerificationClient, StaticCredentials};
    use booking_core::{MemoryIntentStore, PassengerDetails, PaymentChannel};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn intent() -> BookingIntent {
        BookingIntent {
            bus_id: "lusaka-ndola-0800".into(),
            seats: vec!["12A".into()],
            total: dec!(250.00),
            passenger: PassengerDetails::new("Chanda Mwila", "0977123456", "0966123456").unwrap(),
            channel_hint: PaymentChannel::MobileMoney,
        }
    }

    struct Harness {
        gateway: Arc<MockGateway>,
        verifier: Arc<MockVerificationClient>,
        committer: Arc<MockCommitter>,
        credentials: Arc<StaticCredentials>,
        staging: Arc<MemoryIntentStore>,
    }

    impl Harness {
        fn new(gateway: MockGateway, verifier: MockVerificationClient) -> Self {
            Self {
                gateway: Arc::new(gateway),
                verifier: Arc::new(verifier),
                committer: Arc::new(MockCommitter::succeeding()),
                credentials: Arc::new(StaticCredentials::with_token("bearer-abc")),
                staging: Arc::new(MemoryIntentStore::new()),
            }
        }

        fn with_committer(mut self, committer: MockCommitter) -> Self {
            self.committer = Arc::new(committer);
            self
        }

        fn with_credentials(mut self, credentials: StaticCredentials) -> Self {
            self.credentials = Arc::new(credentials);
            self
        }

        fn deps(&self) -> SessionDeps {
            SessionDeps {
                gateway: self.gateway.clone(),
                verifier: self.verifier.clone(),
                committer: self.committer.clone(),
                credentials: self.credentials.clone(),
                staging: self.staging.clone(),
                poller: PollerConfig::default(),
            }
        }

        fn session(&self) -> Arc<PaymentSession> {
            PaymentSession::new(intent(), self.deps())
        }
    }

    async fn wait_for(session: &PaymentSession, pred: impl Fn(&PaymentState) -> bool) {
        let mut rx = session.subscribe();
        loop {
            if pred(&rx.borrow().clone()) {
                return;
            }
            rx.changed().await.unwrap();
        }
    }

    async fn wait_terminal(session: &PaymentSession) -> PaymentState {
        wait_for(session, PaymentState::is_terminal).await;
        session.status()
    }

    #[tokio::test(start_paused = true)]
    async fn initiate_generates_reference_and_opens_once() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::with_statuses(vec![Ok(VerificationStatus::Successful)]),
        );
        let session = h.session();

        assert!(session.reference().as_str().starts_with("ref-"));
        session.initiate().await.unwrap();

        assert_eq!(wait_terminal(&session).await, PaymentState::Succeeded);
        assert_eq!(h.gateway.open_calls(), 1);

        // A second initiate on the same session is refused
        let err = session.initiate().await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(h.gateway.open_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_confirmation_polls_commits_once_and_succeeds() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::with_statuses(vec![Ok(VerificationStatus::Successful)]),
        );
        let session = h.session();
        session.initiate().await.unwrap();

        assert_eq!(wait_terminal(&session).await, PaymentState::Succeeded);
        assert!(session.committed());
        assert_eq!(h.committer.commit_calls(), 1);
        assert!(session.booking().is_some());
        // Staged intent cleared on success
        assert!(h.staging.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn direct_success_path_verifies_once_then_commits() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::Success {
                channel: "card".into(),
            }),
            MockVerificationClient::with_statuses(vec![Ok(VerificationStatus::Successful)]),
        );
        let session = h.session();
        session.initiate().await.unwrap();

        assert_eq!(wait_terminal(&session).await, PaymentState::Succeeded);
        assert_eq!(h.verifier.verify_calls(), 1);
        assert_eq!(h.committer.commit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_success_signals_commit_exactly_once() {
        let h = Harness::new(
            MockGateway::holding_open(),
            MockVerificationClient::always(VerificationStatus::Successful),
        );
        let session = h.session();

        // Both the direct gateway path and a poller tick independently
        // observe a successful verification for the same reference.
        let a = {
            let s = session.clone();
            tokio::spawn(async move { s.on_verification_status(VerificationStatus::Successful).await })
        };
        let b = {
            let s = session.clone();
            tokio::spawn(async move { s.on_verification_status(VerificationStatus::Successful).await })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(h.committer.commit_calls(), 1);
        assert!(session.committed());
        assert_eq!(session.status(), PaymentState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn widget_close_cancels_immediately() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::Closed),
            MockVerificationClient::always(VerificationStatus::Pending),
        );
        let session = h.session();
        session.initiate().await.unwrap();

        assert_eq!(
            wait_terminal(&session).await,
            PaymentState::Cancelled(CancelReason::GatewayClosed)
        );
        // Best-effort notice was attempted and the staged intent discarded
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.verifier.cancel_notices(), 1);
        assert!(h.staging.load().unwrap().is_none());
        assert_eq!(h.committer.commit_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn user_cancel_is_permanent_and_silences_zombie_callbacks() {
        let h = Harness::new(
            MockGateway::holding_open(),
            MockVerificationClient::always(VerificationStatus::Successful),
        );
        let session = h.session();
        session.initiate().await.unwrap();
        assert_eq!(session.status(), PaymentState::Processing);

        session.cancel();
        session.cancel(); // idempotent
        assert_eq!(
            session.status(),
            PaymentState::Cancelled(CancelReason::UserRequested)
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.verifier.cancel_notices(), 1);

        // A verification that was in flight when the user cancelled must not
        // flip the session back out of Cancelled.
        session
            .on_verification_status(VerificationStatus::Successful)
            .await;
        assert_eq!(
            session.status(),
            PaymentState::Cancelled(CancelReason::UserRequested)
        );
        assert_eq!(h.committer.commit_calls(), 0);
        assert_eq!(h.verifier.verify_calls(), 0);
        assert!(h.staging.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_otp_never_reaches_the_network() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::with_statuses(vec![Ok(VerificationStatus::OtpRequired)]),
        );
        let session = h.session();
        session.initiate().await.unwrap();
        wait_for(&session, |s| matches!(s, PaymentState::OtpRequired)).await;

        assert!(session.submit_otp("12").await.is_err());
        assert!(session.submit_otp("abcdef").await.is_err());
        assert_eq!(h.verifier.otp_calls(), 0);
        assert_eq!(session.status(), PaymentState::OtpRequired);
    }

    #[tokio::test(start_paused = true)]
    async fn valid_otp_settles_the_payment() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::with_statuses(vec![Ok(VerificationStatus::OtpRequired)])
                .with_otp_results(vec![Ok(VerificationStatus::Successful)]),
        );
        let session = h.session();
        session.initiate().await.unwrap();
        wait_for(&session, |s| matches!(s, PaymentState::OtpRequired)).await;

        session.submit_otp("1234").await.unwrap();
        assert_eq!(wait_terminal(&session).await, PaymentState::Succeeded);
        assert_eq!(h.verifier.otp_calls(), 1);
        assert_eq!(h.committer.commit_calls(), 1);
        assert_eq!(session.otp_buffer(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn otp_transport_error_resumes_polling_instead_of_failing() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::with_statuses(vec![
                Ok(VerificationStatus::OtpRequired),
                Ok(VerificationStatus::Successful),
            ])
            .with_otp_results(vec![Err("gateway 502".into())]),
        );
        let session = h.session();
        session.initiate().await.unwrap();
        wait_for(&session, |s| matches!(s, PaymentState::OtpRequired)).await;

        session.submit_otp("123456").await.unwrap();
        // The step-up is not repeated; polling picks the payment back up
        assert_eq!(wait_terminal(&session).await, PaymentState::Succeeded);
        assert_eq!(h.verifier.otp_calls(), 1);
        assert_eq!(h.verifier.verify_calls(), 2);
        assert_eq!(h.committer.commit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_deadline_maps_to_timeout_cancellation() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::always(VerificationStatus::Pending),
        );
        let session = h.session();
        session.initiate().await.unwrap();

        assert_eq!(
            wait_terminal(&session).await,
            PaymentState::Cancelled(CancelReason::Timeout)
        );

        // Poller is stopped: no further ticks observed
        let calls = h.verifier.verify_calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.verifier.verify_calls(), calls);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.verifier.cancel_notices(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commit_failure_is_surfaced_and_never_retried() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::always(VerificationStatus::Successful),
        )
        .with_committer(MockCommitter::failing_with(PaymentError::Commit {
            reference: "ref-x".into(),
            reason: "bookings table unavailable".into(),
        }));
        let session = h.session();
        session.initiate().await.unwrap();

        let state = wait_terminal(&session).await;
        let PaymentState::Failed(FailureKind::Commit { reference, .. }) = state else {
            panic!("expected commit failure, got {state:?}");
        };
        assert_eq!(reference, session.reference().as_str());
        assert_eq!(h.committer.commit_calls(), 1);
        // The guard stays acquired: no second attempt is possible
        assert!(session.committed());
        assert!(session.retry_commit().await.is_err());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.committer.commit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_is_distinct_and_commit_is_retryable() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::always(VerificationStatus::Successful),
        )
        .with_credentials(StaticCredentials::unauthenticated());
        let session = h.session();
        session.initiate().await.unwrap();

        assert_eq!(
            wait_terminal(&session).await,
            PaymentState::Failed(FailureKind::Unauthenticated)
        );
        // No commit request ever went out
        assert_eq!(h.committer.commit_calls(), 0);
        assert!(!session.committed());

        // Re-authenticate, then retry the commit for the same reference
        h.credentials.set_token("bearer-fresh");
        session.retry_commit().await.unwrap();
        assert_eq!(session.status(), PaymentState::Succeeded);
        assert_eq!(h.committer.commit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_commit_is_retryable_after_reauth() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::always(VerificationStatus::Successful),
        )
        .with_committer(MockCommitter::failing_with(PaymentError::Unauthenticated(
            "token expired".into(),
        )));
        let session = h.session();
        session.initiate().await.unwrap();

        // The request went out and came back 401: refused, nothing booked
        assert_eq!(
            wait_terminal(&session).await,
            PaymentState::Failed(FailureKind::Unauthenticated)
        );
        assert_eq!(h.committer.commit_calls(), 1);

        h.credentials.set_token("bearer-fresh");
        session.retry_commit().await.unwrap();
        assert_eq!(session.status(), PaymentState::Succeeded);
        assert_eq!(h.committer.commit_calls(), 2);
        assert!(session.booking().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_rehydrates_verification_without_reopening_the_widget() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::ConfirmationPending),
            MockVerificationClient::with_statuses(vec![Ok(VerificationStatus::Successful)]),
        );
        h.staging
            .save(&StagedPayment::new("ref-staged-1", intent()))
            .unwrap();

        let session = PaymentSession::resume(h.deps()).unwrap().unwrap();
        assert_eq!(session.reference().as_str(), "ref-staged-1");

        assert_eq!(wait_terminal(&session).await, PaymentState::Succeeded);
        assert_eq!(h.gateway.open_calls(), 0);
        assert_eq!(h.committer.commit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_with_empty_slot_yields_nothing() {
        let h = Harness::new(
            MockGateway::holding_open(),
            MockVerificationClient::always(VerificationStatus::Pending),
        );
        assert!(PaymentSession::resume(h.deps()).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_intent_never_opens_the_gateway() {
        let h = Harness::new(
            MockGateway::with_outcome(CheckoutOutcome::Closed),
            MockVerificationClient::always(VerificationStatus::Pending),
        );
        let mut bad = intent();
        bad.seats.clear();
        let session = PaymentSession::new(bad, h.deps());

        assert!(session.initiate().await.is_err());
        assert_eq!(session.status(), PaymentState::Idle);
        assert_eq!(h.gateway.open_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn checkout_config_carries_normalized_projection() {
        let h = Harness::new(
            MockGateway::holding_open(),
            MockVerificationClient::always(VerificationStatus::Pending),
        );
        let session = h.session();
        let config = session.checkout_config();
        assert_eq!(config.amount, "250.00");
        assert_eq!(config.currency, CURRENCY);
        assert_eq!(config.customer.phone, "+260977123456");
        assert_eq!(config.channels[0], "mobile-money");
    }
}
