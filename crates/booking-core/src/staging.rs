//! Durable Payment Staging
//!
//! A single-slot store holding the one in-flight [`BookingIntent`] plus its
//! payment reference, so a restart mid-payment can resume verification. The
//! slot is cleared on every terminal payment outcome; a cleared slot means
//! nothing to resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::{BookingError, Result};
use crate::intent::BookingIntent;

/// The staged pending payment: intent plus correlation reference
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagedPayment {
    /// Payment reference the attempt runs under
    pub reference: String,

    /// The snapshot being paid for
    pub intent: BookingIntent,

    /// When the attempt was staged
    pub staged_at: DateTime<Utc>,
}

impl StagedPayment {
    pub fn new(reference: impl Into<String>, intent: BookingIntent) -> Self {
        Self {
            reference: reference.into(),
            intent,
            staged_at: Utc::now(),
        }
    }
}

/// Single-slot staging store, keyed by nothing: one pending payment at a time
pub trait IntentStore: Send + Sync {
    /// Stage a pending payment, replacing any previous slot content
    fn save(&self, staged: &StagedPayment) -> Result<()>;

    /// Load the staged payment, if any
    fn load(&self) -> Result<Option<StagedPayment>>;

    /// Discard the slot
    fn clear(&self) -> Result<()>;
}

/// In-memory staging store (for development/testing)
pub struct MemoryIntentStore {
    slot: RwLock<Option<StagedPayment>>,
}

impl Default for MemoryIntentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }
}

impl IntentStore for MemoryIntentStore {
    fn save(&self, staged: &StagedPayment) -> Result<()> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| BookingError::Storage("staging slot poisoned".into()))?;
        *slot = Some(staged.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<StagedPayment>> {
        let slot = self
            .slot
            .read()
            .map_err(|_| BookingError::Storage("staging slot poisoned".into()))?;
        Ok(slot.clone())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| BookingError::Storage("staging slot poisoned".into()))?;
        *slot = None;
        Ok(())
    }
}

/// File-backed staging store that survives a process restart
pub struct FileIntentStore {
    path: PathBuf,
}

impl FileIntentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IntentStore for FileIntentStore {
    fn save(&self, staged: &StagedPayment) -> Result<()> {
        let json = serde_json::to_vec_pretty(staged)?;
        std::fs::write(&self.path, json)?;
        tracing::debug!(reference = %staged.reference, "Staged pending payment");
        Ok(())
    }

    fn load(&self) -> Result<Option<StagedPayment>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
