//! Verification Poller
//!
//! A bounded, cancellable repeating task that reads the payment status on an
//! interval until it settles, the deadline passes, or a token trips. Deadline
//! expiry is reported as its own outcome, distinct from a gateway-reported
//! failure, so the UI can word the two differently.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cancel::CancellationToken;
use crate::reference::Reference;
use crate::verify::{VerificationClient, VerificationStatus};

/// Polling cadence and ceiling
#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    /// Gap between status reads
    pub interval: Duration,

    /// Absolute ceiling from poller start
    pub deadline: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(300),
        }
    }
}

/// How a polling run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The backend reported a settled status
    Settled(VerificationStatus),

    /// Deadline passed with the payment still unsettled
    TimedOut,

    /// A cancellation token tripped; nothing was reported
    Stopped,
}

/// One polling run over a payment reference
pub struct VerificationPoller {
    client: Arc<dyn VerificationClient>,
    reference: Reference,
    config: PollerConfig,
    session_token: CancellationToken,
    stop: CancellationToken,
}

impl VerificationPoller {
    pub fn new(
        client: Arc<dyn VerificationClient>,
        reference: Reference,
        config: PollerConfig,
        session_token: CancellationToken,
    ) -> Self {
        Self {
            client,
            reference,
            config,
            session_token,
            stop: CancellationToken::new(),
        }
    }

    /// Token that stops only this poller, independent of session cancellation
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Poll until a settled status, the deadline, or a token trip.
    ///
    /// Transient verification errors are swallowed and retried on the next
    /// tick; the first tick fires immediately.
    pub async fn run(self) -> PollOutcome {
        let deadline = Instant::now() + self.config.deadline;
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.session_token.cancelled() => return PollOutcome::Stopped,
                () = self.stop.cancelled() => return PollOutcome::Stopped,
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(reference = %self.reference, "Verification deadline exceeded");
                    return PollOutcome::TimedOut;
                }
                _ = ticker.tick() => {
                    // The read itself is raced against cancellation so an
                    // in-flight call cannot outlive a trip.
                    let status = tokio::select! {
                        () = self.session_token.cancelled() => return PollOutcome::Stopped,
                        () = self.stop.cancelled() => return PollOutcome::Stopped,
                        result = self.client.verify(&self.reference) => match result {
                            Ok(status) => status,
                            Err(e) => {
                                tracing::debug!(
                                    reference = %self.reference,
                                    error = %e,
                                    "Transient verification error, retrying next tick"
                                );
                                continue;
                            }
                        }
                    };

                    if status.is_settled() {
                        tracing::info!(reference = %self.reference, status = ?status, "Payment settled");
                        return PollOutcome::Settled(status);
                    }
                    tracing::debug!(reference = %self.reference, status = ?status, "Still pending");
                }
            }
        }
    }
}

/// Handle to a spawned polling task. At most one lives per session; starting
/// a replacement must stop the previous handle first.
pub struct PollerHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn new(stop: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { stop, task }
    }

    /// Stop the polling task; it will not report again.
    pub fn stop(&self) {
        self.stop.trip();
        self.task.abort();
    }
}
