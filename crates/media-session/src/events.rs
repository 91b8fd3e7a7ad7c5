//! Session events
//!
//! Besides the two single-callback slots, a session publishes events that any
//! number of subscribers can follow: fresh transport statistics and newly
//! discovered incoming (remote) sources. Events are emitted on the designated
//! context and fanned out through a tokio broadcast channel.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::session::MediaSessionId;
use crate::source::MediaSource;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Statistics snapshot keyed by counter name
pub type SessionStats = BTreeMap<String, serde_json::Value>;

/// Event published by a media session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// New statistics are available for the session
    NewStats {
        session_id: MediaSessionId,
        stats: Arc<SessionStats>,
    },
    /// A new remote source started arriving on the session
    IncomingSource {
        session_id: MediaSessionId,
        source: Arc<MediaSource>,
    },
}

impl SessionEvent {
    /// Session that emitted the event
    pub fn session_id(&self) -> MediaSessionId {
        match self {
            Self::NewStats { session_id, .. } | Self::IncomingSource { session_id, .. } => *session_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NewStats { .. } => "on-new-stats",
            Self::IncomingSource { .. } => "on-incoming-source",
        }
    }
}

/// Broadcast emitter for [`SessionEvent`]s
pub struct SessionEventEmitter {
    sender: RwLock<Option<broadcast::Sender<SessionEvent>>>,
}

impl SessionEventEmitter {
    /// Create an emitter buffering `capacity` events per subscriber
    ///
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Subscribe to future events, `None` once closed
    pub fn subscribe(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.sender.read().as_ref().map(|sender| sender.subscribe())
    }

    /// Publish `event`; returns how many subscribers received it
    pub fn emit(&self, event: SessionEvent) -> usize {
        let kind = event.kind();
        match self.sender.read().as_ref() {
            Some(sender) => match sender.send(event) {
                Ok(receivers) => receivers,
                Err(_) => {
                    trace!("No subscribers for {}", kind);
                    0
                }
            },
            None => {
                trace!("Dropping {} on closed emitter", kind);
                0
            }
        }
    }

    /// Current number of subscribers
    pub fn receiver_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Stop publishing; subscribers see the channel close after draining
    pub fn close(&self) {
        if self.sender.write().take().is_some() {
            debug!("Session event emitter closed");
        }
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}

impl Default for SessionEventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl fmt::Debug for SessionEventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventEmitter")
            .field("receivers", &self.receiver_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MediaType;
    use crate::source::SourceType;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn stats_event(packets: u64) -> SessionEvent {
        let mut stats = SessionStats::new();
        stats.insert("packets-sent".to_string(), packets.into());
        SessionEvent::NewStats {
            session_id: MediaSessionId::new(),
            stats: Arc::new(stats),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let emitter = SessionEventEmitter::default();
        assert_eq!(emitter.receiver_count(), 0);
        assert_eq!(emitter.emit(stats_event(1)), 0);
    }

    #[test]
    fn test_every_subscriber_gets_the_event() {
        let emitter = SessionEventEmitter::default();
        let mut a = emitter.subscribe().unwrap();
        let mut b = emitter.subscribe().unwrap();

        let source = MediaSource::new("remote-audio", MediaType::Audio, SourceType::Remote);
        let event = SessionEvent::IncomingSource {
            session_id: MediaSessionId::new(),
            source: source.clone(),
        };
        assert_eq!(emitter.emit(event), 2);

        for rx in [&mut a, &mut b] {
            match rx.try_recv().unwrap() {
                SessionEvent::IncomingSource { source: received, .. } => {
                    assert!(Arc::ptr_eq(&received, &source));
                }
                other => panic!("Unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let emitter = SessionEventEmitter::new(0);
        let mut rx = emitter.subscribe().unwrap();
        assert_eq!(emitter.emit(stats_event(3)), 1);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::NewStats { .. })));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let emitter = SessionEventEmitter::default();
        let mut rx = emitter.subscribe().unwrap();

        emitter.emit(stats_event(5));
        emitter.close();
        emitter.close();

        assert!(emitter.is_closed());
        assert!(emitter.subscribe().is_none());
        assert_eq!(emitter.emit(stats_event(6)), 0);

        // Buffered events are still delivered before the close
        assert!(matches!(rx.recv().await, Ok(SessionEvent::NewStats { .. })));
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
    }
}
