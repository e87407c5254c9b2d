//! Payment Reference
//!
//! Opaque correlation id for one payment attempt. Generated once per session
//! and immutable for its lifetime; a retry is a new session with a new
//! reference.

use serde::{Deserialize, Serialize};

/// Client-generated correlation id (`ref-` + millisecond timestamp)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn generate() -> Self {
        Self(format!("ref-{}", chrono::Utc::now().timestamp_millis()))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
