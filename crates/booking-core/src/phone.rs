//! Phone Number Normalization
//!
//! Every phone number leaving the client (gateway config, booking commit)
//! goes through [`PhoneNumber::normalize`] so the same logical number always
//! serializes identically.

use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};

/// Country calling code used for trunk-zero rewriting
pub const COUNTRY_CODE: &str = "+260";

/// A phone number in canonical international form (`+260` + 9 digits)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize a raw phone number into canonical form.
    ///
    /// Accepted inputs:
    /// - national trunk form: `0` followed by 9 digits (`0977123456`)
    /// - already-canonical form: `+260` followed by 9 digits
    ///
    /// Spaces and hyphens are stripped first. Normalization is idempotent:
    /// feeding a canonical number back in returns it unchanged.
    pub fn normalize(raw: &str) -> Result<Self> {
        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();

        if let Some(rest) = compact.strip_prefix(COUNTRY_CODE) {
            if rest.len() == 9 && rest.chars().all(|c| c.is_ascii_digit()) {
                return Ok(Self(compact));
            }
            return Err(BookingError::validation(
                "phone",
                format!("expected 9 digits after {COUNTRY_CODE}"),
            ));
        }

        if let Some(rest) = compact.strip_prefix('0') {
            if rest.len() == 9 && rest.chars().all(|c| c.is_ascii_digit()) {
                return Ok(Self(format!("{COUNTRY_CODE}{rest}")));
            }
            return Err(BookingError::validation(
                "phone",
                "expected a leading 0 followed by 9 digits",
            ));
        }

        Err(BookingError::validation(
            "phone",
            format!("unrecognized format: {raw:?}"),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
