//! Booking Intent and Booking Records
//!
//! A [`BookingIntent`] is the immutable snapshot of everything the user
//! selected, captured before payment starts. The payment core never edits it;
//! a new attempt means a new intent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BookingError, Result};
use crate::phone::PhoneNumber;

/// Payment channel hint forwarded to the gateway widget
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentChannel {
    Card,
    MobileMoney,
}

impl PaymentChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentChannel::Card => "card",
            PaymentChannel::MobileMoney => "mobile-money",
        }
    }
}

/// Passenger contact details attached to a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerDetails {
    pub name: String,
    pub phone: PhoneNumber,
    pub emergency_phone: PhoneNumber,
}

impl PassengerDetails {
    /// Build passenger details from raw form input, normalizing both numbers
    pub fn new(name: impl Into<String>, phone: &str, emergency_phone: &str) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BookingError::validation("name", "must not be empty"));
        }
        Ok(Self {
            name,
            phone: PhoneNumber::normalize(phone)?,
            emergency_phone: PhoneNumber::normalize(emergency_phone)?,
        })
    }
}

/// Immutable snapshot of a booking about to be paid for
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingIntent {
    /// Selected bus/trip
    pub bus_id: String,

    /// Selected seat identifiers (never empty)
    pub seats: Vec<String>,

    /// Computed total price
    pub total: Decimal,

    /// Passenger contact details
    pub passenger: PassengerDetails,

    /// Preferred payment channel
    pub channel_hint: PaymentChannel,
}

impl BookingIntent {
    /// Validate the snapshot before a payment attempt may start
    pub fn validate(&self) -> Result<()> {
        if self.bus_id.trim().is_empty() {
            return Err(BookingError::validation("bus", "must not be empty"));
        }
        if self.seats.is_empty() {
            return Err(BookingError::validation("seats", "select at least one seat"));
        }
        if self.total <= Decimal::ZERO {
            return Err(BookingError::validation("amount", "must be greater than zero"));
        }
        Ok(())
    }
}

/// A persisted booking, the result of a successful payment commit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,

    /// Payment reference the booking was committed under
    pub reference: String,

    pub bus_id: String,
    pub seats: Vec<String>,
    pub total: Decimal,
    pub passenger: PassengerDetails,

    pub created_at: DateTime<Utc>,
}
