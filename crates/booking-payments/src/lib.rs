//! # booking-payments
//!
//! Payment orchestration core for the bus-tickets client.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       PaymentSession                           │
//! │  ┌──────────────┐  ┌────────────────┐  ┌───────────────────┐  │
//! │  │ CheckoutGate │  │ Verification   │  │ BookingCommitter  │  │
//! │  │ way (widget) │  │ Poller/Client  │  │ (commit-once)     │  │
//! │  └──────────────┘  └────────────────┘  └───────────────────┘  │
//! │            all guarded by one CancellationToken                │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! One [`PaymentSession`] owns one payment attempt: it opens the externally
//! hosted checkout, consumes the single tagged outcome, polls the
//! verification endpoint (with an OTP step-up when required), and turns the
//! first confirmed success — whichever path reaches it first — into exactly
//! one booking commit. Cancellation is a one-way transition propagated to
//! every async branch through the shared token.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use booking_payments::{PaymentSession, SessionDeps, PollerConfig};
//!
//! let session = PaymentSession::new(intent, SessionDeps {
//!     gateway, verifier, committer, credentials, staging,
//!     poller: PollerConfig::default(),
//! });
//! session.initiate().await?;
//! let mut status = session.subscribe();
//! // drive the UI from status changes; call session.cancel() to abort
//! ```

pub mod cancel;
pub mod commit;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod poller;
pub mod reference;
pub mod session;
pub mod verify;

pub use cancel::CancellationToken;
pub use commit::{BookingCommitter, CredentialProvider, HttpBookingCommitter};
pub use error::{PaymentError, Result};
pub use gateway::{CheckoutConfig, CheckoutGateway, CheckoutOutcome, HostedGateway};
pub use poller::{PollOutcome, PollerConfig, VerificationPoller};
pub use reference::Reference;
pub use session::{CancelReason, FailureKind, PaymentSession, PaymentState, SessionDeps};
pub use verify::{HttpVerificationClient, OtpCode, VerificationClient, VerificationStatus};
