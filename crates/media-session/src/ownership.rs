//! Ownership tokens for references handed to deferred tasks
//!
//! Every reference that crosses from a caller thread into a deferred task is
//! wrapped in an [`OwnershipToken`]. The token keeps the target alive until the
//! task is done with it and is released exactly once, either by being dropped
//! or by handing the reference over to session state with
//! [`OwnershipToken::into_inner`]. Each session keeps an [`OwnershipLedger`]
//! counting both sides so leaks show up as a non-zero outstanding count.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

/// Retain/release counters shared by all tokens of one session
#[derive(Debug, Default)]
pub struct OwnershipLedger {
    retained: AtomicU64,
    released: AtomicU64,
}

impl OwnershipLedger {
    /// Create a new, empty ledger
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take an additional reference on `target` and record it
    pub fn retain<T: ?Sized>(self: &Arc<Self>, target: &Arc<T>) -> OwnershipToken<T> {
        self.retained.fetch_add(1, Ordering::AcqRel);
        OwnershipToken {
            target: Some(Arc::clone(target)),
            ledger: Arc::clone(self),
        }
    }

    /// Number of tokens handed out
    pub fn retained(&self) -> u64 {
        self.retained.load(Ordering::Acquire)
    }

    /// Number of tokens released
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Tokens that are still alive
    pub fn outstanding(&self) -> u64 {
        self.retained().saturating_sub(self.released())
    }

    fn record_release(&self) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// A counted reference that lives exactly as long as the deferred task using it
pub struct OwnershipToken<T: ?Sized> {
    target: Option<Arc<T>>,
    ledger: Arc<OwnershipLedger>,
}

impl<T: ?Sized> OwnershipToken<T> {
    /// Borrow the retained reference
    pub fn get(&self) -> &Arc<T> {
        match &self.target {
            Some(target) => target,
            // `target` is only taken by `into_inner` and `drop`, both consume the token
            None => unreachable!("ownership token used after release"),
        }
    }

    /// Release the token, handing the reference over to the caller
    ///
    /// The ledger counts this as the release; whatever holds the returned
    /// `Arc` now owns it.
    pub fn into_inner(mut self) -> Arc<T> {
        let target = self.take_target();
        self.ledger.record_release();
        target
    }

    /// Whether this token was handed out by `ledger`
    pub fn is_issued_by(&self, ledger: &Arc<OwnershipLedger>) -> bool {
        Arc::ptr_eq(&self.ledger, ledger)
    }

    /// Release the token explicitly
    pub fn release(self) {
        drop(self);
    }

    fn take_target(&mut self) -> Arc<T> {
        match self.target.take() {
            Some(target) => target,
            None => unreachable!("ownership token released twice"),
        }
    }
}

impl<T: ?Sized> Deref for OwnershipToken<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: ?Sized> Drop for OwnershipToken<T> {
    fn drop(&mut self) {
        if self.target.take().is_some() {
            self.ledger.record_release();
            trace!("Ownership token released ({} outstanding)", self.ledger.outstanding());
        }
    }
}

impl<T: ?Sized> fmt::Debug for OwnershipToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipToken")
            .field("live", &self.target.is_some())
            .finish()
    }
}
