//! Single-callback notification slots
//!
//! A slot holds at most one callback for one kind of session change. Setting
//! it again replaces the previous callback. Once invalidated the slot drops
//! its callback and ignores every later event and registration, so a callback
//! that closes over the session can never run against a torn down session.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Callback invoked with the value that changed
pub type SlotCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum SlotState<T> {
    Empty,
    Armed(SlotCallback<T>),
    Invalidated,
}

/// Notification slot for one event kind
pub struct NotificationSlot<T> {
    name: &'static str,
    state: Mutex<SlotState<T>>,
}

impl<T> NotificationSlot<T> {
    /// Create an empty slot
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Slot name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register `callback`, replacing any previous one
    ///
    /// Returns `false` if the slot has been invalidated.
    pub fn set(&self, callback: SlotCallback<T>) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Invalidated) {
            debug!("Ignoring callback registration on invalidated slot {}", self.name);
            return false;
        }
        *state = SlotState::Armed(callback);
        true
    }

    /// Invoke the registered callback, if any
    ///
    /// The callback runs outside the slot lock. Returns whether it fired.
    pub fn notify(&self, value: &T) -> bool {
        let callback = match &*self.state.lock() {
            SlotState::Armed(callback) => Arc::clone(callback),
            SlotState::Empty | SlotState::Invalidated => {
                trace!("No callback armed on slot {}", self.name);
                return false;
            }
        };
        callback(value);
        true
    }

    /// Permanently disarm the slot
    pub fn invalidate(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), SlotState::Invalidated);
        if !matches!(previous, SlotState::Invalidated) {
            debug!("Invalidated notification slot {}", self.name);
        }
        // previous callback dropped here, outside the lock
    }

    /// Whether a callback is registered
    pub fn is_armed(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Armed(_))
    }

    /// Whether the slot has been invalidated
    pub fn is_invalidated(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Invalidated)
    }
}

impl<T> fmt::Debug for NotificationSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            SlotState::Empty => "empty",
            SlotState::Armed(_) => "armed",
            SlotState::Invalidated => "invalidated",
        };
        f.debug_struct("NotificationSlot")
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}
