//! Deferred mutation protocol
//!
//! Public session entry points never touch session state directly. They
//! retain the session and their argument, package both into a typed
//! [`MutationRequest`] and submit it to the session's scheduler. The request
//! runs once on the designated context, applies the change, fires the matching
//! notification and releases every token it holds, whatever the outcome.
//!
//! Failures inside a request never reach the original caller. They are logged
//! and recorded in [`MutationStats`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{MediaSessionError, Result};
use crate::events::{SessionEvent, SessionStats};
use crate::ownership::{OwnershipLedger, OwnershipToken};
use crate::payload::Payload;
use crate::session::{MediaSession, MediaSessionId};
use crate::source::MediaSource;
use crate::srtp::KeyRole;

/// A state change waiting for the designated context
pub(crate) enum Mutation {
    SetSendPayload(OwnershipToken<Payload>),
    SetSendSource(OwnershipToken<MediaSource>),
    AddReceivePayload(OwnershipToken<Payload>),
    SetRtcpMux(bool),
    SetSrtpKey { role: KeyRole, key: Option<String> },
    IncomingSource(OwnershipToken<MediaSource>),
    NewStats(SessionStats),
}

impl Mutation {
    fn name(&self) -> &'static str {
        match self {
            Self::SetSendPayload(_) => "set-send-payload",
            Self::SetSendSource(_) => "set-send-source",
            Self::AddReceivePayload(_) => "add-receive-payload",
            Self::SetRtcpMux(_) => "set-rtcp-mux",
            Self::SetSrtpKey { .. } => "set-srtp-key",
            Self::IncomingSource(_) => "incoming-source",
            Self::NewStats(_) => "new-stats",
        }
    }

    /// Whether the argument token, if any, belongs to `ledger`
    fn is_issued_by(&self, ledger: &Arc<OwnershipLedger>) -> bool {
        match self {
            Self::SetSendPayload(token) | Self::AddReceivePayload(token) => token.is_issued_by(ledger),
            Self::SetSendSource(token) | Self::IncomingSource(token) => token.is_issued_by(ledger),
            Self::SetRtcpMux(_) | Self::SetSrtpKey { .. } | Self::NewStats(_) => true,
        }
    }
}

/// Task payload: the retained session plus the change to apply
pub(crate) struct MutationRequest {
    session: OwnershipToken<MediaSession>,
    session_id: MediaSessionId,
    mutation: Mutation,
}

impl MutationRequest {
    /// Capture `session` and queue `mutation` on its scheduler
    pub(crate) fn submit(session: &Arc<MediaSession>, mutation: Mutation) -> Result<()> {
        let name = mutation.name();
        let request = Self {
            session: session.ownership().retain(session),
            session_id: session.id(),
            mutation,
        };

        // On failure the task is dropped unrun, which releases its tokens
        session
            .scheduler()
            .submit(Box::new(move || request.execute()))
            .map_err(|e| {
                error!("Failed to schedule {} for session {}: {}", name, session.id(), e);
                e
            })?;

        session.mutation_stats().submitted.fetch_add(1, Ordering::AcqRel);
        debug!("Scheduled {} for session {}", name, session.id());
        Ok(())
    }

    fn execute(self) {
        let Self {
            session,
            session_id,
            mutation,
        } = self;
        let name = mutation.name();

        if !session.scheduler().is_designated_context() {
            warn!("{} for session {} is running off the designated context", name, session_id);
        }

        // Every token must come from the ledger of the session it runs against
        let ledger = session.ownership();
        if !session.is_issued_by(ledger) || !mutation.is_issued_by(ledger) {
            let err = MediaSessionError::StaleReference(format!(
                "{} for session {} carries a reference retained elsewhere",
                name, session_id
            ));
            warn!("{}", err);
            session.mutation_stats().record_failure(&err);
            return;
        }

        let session_ref = session.get();
        let outcome = match mutation {
            Mutation::SetSendPayload(payload) => {
                let payload = payload.into_inner();
                debug!("Session {} send payload -> {}", session_id, payload);
                drop(session_ref.replace_send_payload(payload));
                session_ref.notify_send_payload();
                Ok(())
            }
            Mutation::SetSendSource(source) => {
                let source = source.into_inner();
                debug!("Session {} send source -> {}", session_id, source);
                drop(session_ref.replace_send_source(source));
                session_ref.notify_send_source();
                Ok(())
            }
            Mutation::AddReceivePayload(payload) => {
                session_ref.receive_payloads().add(Arc::clone(payload.get()))
            }
            Mutation::SetRtcpMux(enabled) => {
                session_ref.apply_rtcp_mux(enabled);
                Ok(())
            }
            Mutation::SetSrtpKey { role, key } => {
                session_ref.apply_srtp_key(role, key);
                Ok(())
            }
            Mutation::IncomingSource(source) => {
                let source = source.into_inner();
                debug!("Session {} incoming source {}", session_id, source);
                session_ref.emit_event(SessionEvent::IncomingSource { session_id, source });
                Ok(())
            }
            Mutation::NewStats(stats) => {
                session_ref.emit_event(SessionEvent::NewStats {
                    session_id,
                    stats: Arc::new(stats),
                });
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                session.mutation_stats().applied.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                debug!("{} for session {} not applied: {}", name, session_id, e);
                session.mutation_stats().record_failure(&e);
            }
        }
        // `session` and any argument token are released here
    }
}

/// Outcome counters for deferred mutations of one session
#[derive(Default)]
pub struct MutationStats {
    submitted: AtomicU64,
    applied: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    last_error: Mutex<Option<MediaSessionError>>,
}

impl MutationStats {
    /// Mutations accepted by the scheduler
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Mutations that changed session state
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Mutations rejected (duplicate payloads)
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Acquire)
    }

    /// Mutations skipped because a captured reference did not belong to the session
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Acquire)
    }

    /// Most recent error raised inside a deferred mutation
    pub fn last_error(&self) -> Option<MediaSessionError> {
        self.last_error.lock().clone()
    }

    fn record_failure(&self, err: &MediaSessionError) {
        match err {
            MediaSessionError::StaleReference(_) => self.stale.fetch_add(1, Ordering::AcqRel),
            _ => self.rejected.fetch_add(1, Ordering::AcqRel),
        };
        *self.last_error.lock() = Some(err.clone());
    }
}

impl fmt::Debug for MutationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationStats")
            .field("submitted", &self.submitted())
            .field("applied", &self.applied())
            .field("rejected", &self.rejected())
            .field("stale", &self.stale())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaSessionConfig;
    use crate::scheduler::ManualScheduler;

    fn new_session() -> Arc<MediaSession> {
        MediaSession::new(MediaSessionConfig::default(), ManualScheduler::new())
    }

    #[test]
    fn test_foreign_argument_is_stale() {
        let session = new_session();
        let other = new_session();
        let payload = Payload::audio(0, "PCMU", 8000, 1).shared();

        let request = MutationRequest {
            session: session.ownership().retain(&session),
            session_id: session.id(),
            mutation: Mutation::SetSendPayload(other.ownership().retain(&payload)),
        };
        request.execute();

        assert!(session.send_payload().is_none(), "Stale request must not apply");
        assert_eq!(session.mutation_stats().stale(), 1);
        assert_eq!(session.mutation_stats().applied(), 0);
        assert!(matches!(
            session.mutation_stats().last_error(),
            Some(MediaSessionError::StaleReference(_))
        ));

        // Both tokens are still released on their own ledgers
        assert_eq!(session.ownership().outstanding(), 0);
        assert_eq!(other.ownership().outstanding(), 0);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_own_argument_applies() {
        let session = new_session();
        let payload = Payload::audio(8, "PCMA", 8000, 1).shared();

        let request = MutationRequest {
            session: session.ownership().retain(&session),
            session_id: session.id(),
            mutation: Mutation::AddReceivePayload(session.ownership().retain(&payload)),
        };
        request.execute();

        assert!(session.receive_payload(8).is_some());
        assert_eq!(session.mutation_stats().stale(), 0);
        assert_eq!(session.mutation_stats().applied(), 1);
    }
}
