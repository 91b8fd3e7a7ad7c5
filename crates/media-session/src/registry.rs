//! Receive payload registry
//!
//! Ordered, duplicate-free collection of receive payloads. Writers take the
//! exclusive lock for the whole check-then-insert so two racing adds of the
//! same payload type can never both succeed. Lookups take the shared lock and
//! may run from any thread.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{MediaSessionError, Result};
use crate::payload::Payload;

/// Registry of receive payloads keyed by payload type
#[derive(Debug, Default)]
pub struct PayloadRegistry {
    payloads: RwLock<Vec<Arc<Payload>>>,
}

impl PayloadRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a payload unless it or its payload type is already registered
    ///
    /// Rejection leaves the registry untouched and returns
    /// [`MediaSessionError::DuplicatePayload`].
    pub fn add(&self, payload: Arc<Payload>) -> Result<()> {
        let mut payloads = self.payloads.write();

        let duplicate = payloads
            .iter()
            .any(|p| Arc::ptr_eq(p, &payload) || p.payload_type == payload.payload_type);
        if duplicate {
            warn!(
                "Payload {} already registered, ignoring duplicate receive payload",
                payload.payload_type
            );
            return Err(MediaSessionError::DuplicatePayload {
                payload_type: payload.payload_type,
            });
        }

        debug!("Registered receive payload {}", payload);
        payloads.push(payload);
        Ok(())
    }

    /// Find the first payload registered for `payload_type`
    pub fn lookup(&self, payload_type: u32) -> Option<Arc<Payload>> {
        self.payloads
            .read()
            .iter()
            .find(|p| p.payload_type == payload_type)
            .cloned()
    }

    /// Whether a payload type is registered
    pub fn contains(&self, payload_type: u32) -> bool {
        self.payloads.read().iter().any(|p| p.payload_type == payload_type)
    }

    /// Copy of the registered payloads in insertion order
    pub fn snapshot(&self) -> Vec<Arc<Payload>> {
        self.payloads.read().clone()
    }

    /// Registered payload types in insertion order
    pub fn payload_types(&self) -> Vec<u32> {
        self.payloads.read().iter().map(|p| p.payload_type).collect()
    }

    /// Number of registered payloads
    pub fn len(&self) -> usize {
        self.payloads.read().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.payloads.read().is_empty()
    }
}
