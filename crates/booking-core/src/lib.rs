//! # booking-core
//!
//! Domain layer for the bus-tickets client: the immutable [`BookingIntent`]
//! snapshot, passenger and phone normalization rules, money formatting, and
//! the durable single-slot staging store that lets a restarted client resume
//! payment verification.
//!
//! The payment orchestration itself lives in `booking-payments`; this crate
//! knows nothing about gateways or polling.

pub mod error;
pub mod intent;
pub mod money;
pub mod phone;
pub mod staging;

pub use error::{BookingError, Result};
pub use intent::{Booking, BookingIntent, PassengerDetails, PaymentChannel};
pub use money::format_amount;
pub use phone::PhoneNumber;
pub use staging::{FileIntentStore, IntentStore, MemoryIntentStore, StagedPayment};
