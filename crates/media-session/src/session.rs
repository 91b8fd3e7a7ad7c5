//! Media session state
//!
//! A [`MediaSession`] represents one incoming and one outgoing media stream.
//! It can be shared freely between threads. Reads return snapshots; every
//! write after construction goes through the deferred mutation protocol and
//! runs on the session's scheduler.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MediaSessionConfig;
use crate::error::{MediaSessionError, Result};
use crate::events::{SessionEvent, SessionEventEmitter, SessionStats};
use crate::notification::{NotificationSlot, SlotCallback};
use crate::ownership::OwnershipLedger;
use crate::payload::Payload;
use crate::protocol::{Mutation, MutationRequest, MutationStats};
use crate::registry::PayloadRegistry;
use crate::scheduler::Scheduler;
use crate::source::{MediaSource, SourceType};
use crate::srtp::{self, KeyRole};

/// Callback fired after a send payload or send source change
pub type SessionCallback = SlotCallback<Arc<MediaSession>>;

/// Unique identifier for a media session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaSessionId(Uuid);

impl MediaSessionId {
    /// Generate a new random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying uuid
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MediaSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream identity assigned once by the owning session layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// SSRC of the outgoing RTP stream
    pub send_ssrc: u32,
    /// Canonical name identifying this endpoint
    pub cname: String,
}

#[derive(Default)]
struct SendState {
    payload: Option<Arc<Payload>>,
    source: Option<Arc<MediaSource>>,
}

#[derive(Default)]
struct SrtpKeys {
    incoming: Option<String>,
    outgoing: Option<String>,
}

impl SrtpKeys {
    fn get(&self, role: KeyRole) -> Option<&String> {
        match role {
            KeyRole::Incoming => self.incoming.as_ref(),
            KeyRole::Outgoing => self.outgoing.as_ref(),
        }
    }

    fn slot(&mut self, role: KeyRole) -> &mut Option<String> {
        match role {
            KeyRole::Incoming => &mut self.incoming,
            KeyRole::Outgoing => &mut self.outgoing,
        }
    }
}

/// Shared media session state
pub struct MediaSession {
    id: MediaSessionId,
    dtls_client_mode: bool,
    rtcp_mux: AtomicBool,
    srtp_keys: RwLock<SrtpKeys>,
    identity: OnceLock<SessionIdentity>,
    send: RwLock<SendState>,
    receive_payloads: PayloadRegistry,
    on_send_payload: NotificationSlot<Arc<MediaSession>>,
    on_send_source: NotificationSlot<Arc<MediaSession>>,
    events: SessionEventEmitter,
    ledger: Arc<OwnershipLedger>,
    stats: MutationStats,
    scheduler: Arc<dyn Scheduler>,
}

impl MediaSession {
    /// Create a session whose mutations run on `scheduler`
    pub fn new(config: MediaSessionConfig, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        config.validate();

        let session = Arc::new(Self {
            id: MediaSessionId::new(),
            dtls_client_mode: config.dtls_client_mode,
            rtcp_mux: AtomicBool::new(config.rtcp_mux),
            srtp_keys: RwLock::new(SrtpKeys {
                incoming: config.incoming_srtp_key,
                outgoing: config.outgoing_srtp_key,
            }),
            identity: OnceLock::new(),
            send: RwLock::new(SendState::default()),
            receive_payloads: PayloadRegistry::new(),
            on_send_payload: NotificationSlot::new("on-send-payload"),
            on_send_source: NotificationSlot::new("on-send-source"),
            events: SessionEventEmitter::new(config.event_capacity),
            ledger: OwnershipLedger::new(),
            stats: MutationStats::default(),
            scheduler,
        });

        info!(
            "Created media session {} (rtcp-mux: {}, dtls client: {})",
            session.id, config.rtcp_mux, config.dtls_client_mode
        );
        session
    }

    /// Session id
    pub fn id(&self) -> MediaSessionId {
        self.id
    }

    /// Whether DTLS runs in client role
    pub fn dtls_client_mode(&self) -> bool {
        self.dtls_client_mode
    }

    /// Whether RTP and RTCP share one channel
    pub fn rtcp_mux(&self) -> bool {
        self.rtcp_mux.load(Ordering::Acquire)
    }

    /// Base64 SRTP key stored for `role`
    pub fn srtp_key(&self, role: KeyRole) -> Option<String> {
        self.srtp_keys.read().get(role).cloned()
    }

    /// Decoded SRTP key for `role`
    ///
    /// Returns an empty buffer when no key is configured. A key with an
    /// unexpected decoded length is logged and returned as is.
    pub fn srtp_key_buffer(&self, role: KeyRole) -> Result<Bytes> {
        let encoded = self.srtp_key(role);
        srtp::decode_key(role, encoded.as_deref())
    }

    /// Assign the stream identity
    ///
    /// Done once by the owning session layer before the session is handed out.
    pub fn assign_identity(&self, send_ssrc: u32, cname: impl Into<String>) -> Result<()> {
        let identity = SessionIdentity {
            send_ssrc,
            cname: cname.into(),
        };
        self.identity
            .set(identity)
            .map_err(|_| MediaSessionError::IdentityAlreadyAssigned)?;
        debug!("Session {} identity: ssrc {:#010x}", self.id, send_ssrc);
        Ok(())
    }

    /// SSRC of the outgoing stream, 0 until assigned
    pub fn send_ssrc(&self) -> u32 {
        self.identity.get().map(|i| i.send_ssrc).unwrap_or(0)
    }

    /// Canonical name, if assigned
    pub fn cname(&self) -> Option<&str> {
        self.identity.get().map(|i| i.cname.as_str())
    }

    /// Current send payload
    pub fn send_payload(&self) -> Option<Arc<Payload>> {
        self.send.read().payload.clone()
    }

    /// Current send source
    pub fn send_source(&self) -> Option<Arc<MediaSource>> {
        self.send.read().source.clone()
    }

    /// Receive payload registered for `payload_type`
    pub fn receive_payload(&self, payload_type: u32) -> Option<Arc<Payload>> {
        self.receive_payloads.lookup(payload_type)
    }

    /// Registry of receive payloads
    pub fn receive_payloads(&self) -> &PayloadRegistry {
        &self.receive_payloads
    }

    /// Retain/release counters for references held by pending mutations
    pub fn ownership(&self) -> &Arc<OwnershipLedger> {
        &self.ledger
    }

    /// Outcome counters for deferred mutations
    pub fn mutation_stats(&self) -> &MutationStats {
        &self.stats
    }

    /// Scheduler running this session's mutations
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Schedule a change of the send payload
    pub fn set_send_payload(self: &Arc<Self>, payload: Arc<Payload>) -> Result<()> {
        payload.validate()?;
        let token = self.ledger.retain(&payload);
        MutationRequest::submit(self, Mutation::SetSendPayload(token))
    }

    /// Schedule a change of the send source
    pub fn set_send_source(self: &Arc<Self>, source: Arc<MediaSource>) -> Result<()> {
        let token = self.ledger.retain(&source);
        MutationRequest::submit(self, Mutation::SetSendSource(token))
    }

    /// Schedule registration of a receive payload
    ///
    /// Duplicates are rejected on the designated context and only show up in
    /// logs and [`mutation_stats`](Self::mutation_stats).
    pub fn add_receive_payload(self: &Arc<Self>, payload: Arc<Payload>) -> Result<()> {
        payload.validate()?;
        let token = self.ledger.retain(&payload);
        MutationRequest::submit(self, Mutation::AddReceivePayload(token))
    }

    /// Schedule a change of the rtcp-mux flag
    pub fn set_rtcp_mux(self: &Arc<Self>, enabled: bool) -> Result<()> {
        MutationRequest::submit(self, Mutation::SetRtcpMux(enabled))
    }

    /// Schedule a change of an SRTP key; `None` clears it
    pub fn set_srtp_key(self: &Arc<Self>, role: KeyRole, key: Option<String>) -> Result<()> {
        if let Some(key) = &key {
            if key.trim().is_empty() {
                return Err(MediaSessionError::InvalidArgument(format!("{} is blank", role)));
            }
            srtp::check_encoded_length(role, key);
        }
        MutationRequest::submit(self, Mutation::SetSrtpKey { role, key })
    }

    /// Schedule an `on-incoming-source` event for a new remote source
    ///
    /// Only [`SourceType::Remote`] sources are accepted.
    pub fn report_incoming_source(self: &Arc<Self>, source: Arc<MediaSource>) -> Result<()> {
        if source.source_type() != SourceType::Remote {
            return Err(MediaSessionError::InvalidArgument(format!(
                "incoming source {} is not remote",
                source
            )));
        }
        let token = self.ledger.retain(&source);
        MutationRequest::submit(self, Mutation::IncomingSource(token))
    }

    /// Schedule an `on-new-stats` event carrying `stats`
    pub fn report_stats(self: &Arc<Self>, stats: SessionStats) -> Result<()> {
        MutationRequest::submit(self, Mutation::NewStats(stats))
    }

    /// Subscribe to session events
    ///
    /// Returns `None` after teardown.
    pub fn subscribe_events(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.events.subscribe()
    }

    /// Register the callback fired after the send payload changes
    ///
    /// Replaces any earlier callback. Returns `false` after teardown.
    pub fn set_on_send_payload(&self, callback: SessionCallback) -> bool {
        self.on_send_payload.set(callback)
    }

    /// Register the callback fired after the send source changes
    ///
    /// Replaces any earlier callback. Returns `false` after teardown.
    pub fn set_on_send_source(&self, callback: SessionCallback) -> bool {
        self.on_send_source.set(callback)
    }

    /// Invalidate both notification slots and close the event channel
    ///
    /// Pending and future mutations still apply but fire no callbacks and
    /// publish no events. Callbacks are dropped, which breaks any cycle
    /// through the session.
    pub fn teardown(&self) {
        self.on_send_payload.invalidate();
        self.on_send_source.invalidate();
        self.events.close();
        info!("Media session {} torn down", self.id);
    }

    /// Whether [`teardown`](Self::teardown) has run
    pub fn is_torn_down(&self) -> bool {
        self.on_send_payload.is_invalidated() && self.on_send_source.is_invalidated()
    }

    pub(crate) fn replace_send_payload(&self, payload: Arc<Payload>) -> Option<Arc<Payload>> {
        self.send.write().payload.replace(payload)
    }

    pub(crate) fn replace_send_source(&self, source: Arc<MediaSource>) -> Option<Arc<MediaSource>> {
        self.send.write().source.replace(source)
    }

    pub(crate) fn notify_send_payload(self: &Arc<Self>) -> bool {
        self.on_send_payload.notify(self)
    }

    pub(crate) fn notify_send_source(self: &Arc<Self>) -> bool {
        self.on_send_source.notify(self)
    }

    pub(crate) fn emit_event(&self, event: SessionEvent) -> usize {
        self.events.emit(event)
    }

    pub(crate) fn apply_rtcp_mux(&self, enabled: bool) {
        self.rtcp_mux.store(enabled, Ordering::Release);
        debug!("Session {} rtcp-mux -> {}", self.id, enabled);
    }

    pub(crate) fn apply_srtp_key(&self, role: KeyRole, key: Option<String>) {
        // previous key is dropped after the write guard
        let _previous = std::mem::replace(self.srtp_keys.write().slot(role), key);
        debug!("Session {} {} updated", self.id, role);
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.on_send_payload.invalidate();
        self.on_send_source.invalidate();
        self.events.close();
        debug!("Media session {} released", self.id);
    }
}

impl fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSession")
            .field("id", &self.id)
            .field("rtcp_mux", &self.rtcp_mux())
            .field("send_ssrc", &self.send_ssrc())
            .field("cname", &self.cname())
            .field("receive_payloads", &self.receive_payloads.payload_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MediaType;
    use crate::scheduler::ManualScheduler;
    use crate::source::SourceType;
    use std::sync::atomic::AtomicUsize;

    fn session() -> (Arc<ManualScheduler>, Arc<MediaSession>) {
        let scheduler = ManualScheduler::new();
        let session = MediaSession::new(MediaSessionConfig::default(), scheduler.clone());
        (scheduler, session)
    }

    #[test]
    fn test_defaults() {
        let (_, session) = session();
        assert!(!session.rtcp_mux());
        assert_eq!(session.send_ssrc(), 0);
        assert!(session.cname().is_none());
        assert!(session.send_payload().is_none());
        assert!(session.send_source().is_none());
        assert!(session.receive_payloads().is_empty());
        assert!(session.srtp_key_buffer(KeyRole::Incoming).unwrap().is_empty());
    }

    #[test]
    fn test_identity_assigned_once() {
        let (_, session) = session();
        session.assign_identity(0x1234_5678, "alice@example.com").unwrap();

        assert_eq!(session.send_ssrc(), 0x1234_5678);
        assert_eq!(session.cname(), Some("alice@example.com"));
        assert_eq!(
            session.assign_identity(1, "bob").unwrap_err(),
            MediaSessionError::IdentityAlreadyAssigned
        );
        assert_eq!(session.send_ssrc(), 0x1234_5678);
    }

    #[test]
    fn test_mutations_are_deferred() {
        let (scheduler, session) = session();
        let payload = Payload::audio(0, "PCMU", 8000, 1).shared();

        session.set_send_payload(payload.clone()).unwrap();
        session.add_receive_payload(payload.clone()).unwrap();
        session.set_rtcp_mux(true).unwrap();

        assert!(session.send_payload().is_none());
        assert!(session.receive_payloads().is_empty());
        assert!(!session.rtcp_mux());

        assert_eq!(scheduler.run_pending(), 3);

        assert!(Arc::ptr_eq(&session.send_payload().unwrap(), &payload));
        assert!(Arc::ptr_eq(&session.receive_payload(0).unwrap(), &payload));
        assert!(session.rtcp_mux());
    }

    #[test]
    fn test_invalid_payload_fails_synchronously() {
        let (scheduler, session) = session();
        let err = session
            .set_send_payload(Payload::audio(0, "", 8000, 1).shared())
            .unwrap_err();

        assert!(matches!(err, MediaSessionError::InvalidArgument(_)));
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(session.ownership().retained(), 0);
    }

    #[test]
    fn test_send_payload_replacement_releases_previous() {
        let (scheduler, session) = session();
        let first = Payload::video(96, "VP8", 90000).shared();
        let second = Payload::video(97, "H264", 90000).shared();

        session.set_send_payload(first.clone()).unwrap();
        scheduler.run_pending();
        assert_eq!(Arc::strong_count(&first), 2);

        session.set_send_payload(second.clone()).unwrap();
        scheduler.run_pending();
        assert_eq!(Arc::strong_count(&first), 1);
        assert!(Arc::ptr_eq(&session.send_payload().unwrap(), &second));
    }

    #[test]
    fn test_send_source_callback_sees_new_state() {
        let (scheduler, session) = session();
        let source = MediaSource::new("mic", MediaType::Audio, SourceType::Capture);
        let seen = Arc::new(AtomicUsize::new(0));

        let s = seen.clone();
        let expected = source.clone();
        session.set_on_send_source(Arc::new(move |session: &Arc<MediaSession>| {
            assert!(Arc::ptr_eq(&session.send_source().unwrap(), &expected));
            s.fetch_add(1, Ordering::SeqCst);
        }));

        session.set_send_source(source).unwrap();
        scheduler.run_pending();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_srtp_key_update() {
        let (scheduler, session) = session();
        let key = srtp::encode_key(&[0x5A; 30]);

        session.set_srtp_key(KeyRole::Outgoing, Some(key.clone())).unwrap();
        assert!(session.srtp_key(KeyRole::Outgoing).is_none());
        scheduler.run_pending();

        assert_eq!(session.srtp_key(KeyRole::Outgoing), Some(key));
        assert_eq!(&session.srtp_key_buffer(KeyRole::Outgoing).unwrap()[..], &[0x5A; 30][..]);

        session.set_srtp_key(KeyRole::Outgoing, None).unwrap();
        scheduler.run_pending();
        assert!(session.srtp_key_buffer(KeyRole::Outgoing).unwrap().is_empty());
    }

    #[test]
    fn test_blank_srtp_key_rejected() {
        let (scheduler, session) = session();
        let err = session.set_srtp_key(KeyRole::Incoming, Some("   ".to_string())).unwrap_err();
        assert!(matches!(err, MediaSessionError::InvalidArgument(_)));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_closed_scheduler_releases_tokens() {
        let (scheduler, session) = session();
        scheduler.close();

        let payload = Payload::audio(8, "PCMA", 8000, 1).shared();
        let err = session.add_receive_payload(payload.clone()).unwrap_err();

        assert_eq!(err, MediaSessionError::SchedulerClosed);
        assert_eq!(session.ownership().outstanding(), 0);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_teardown_breaks_callback_cycle() {
        let (_scheduler, session) = session();
        let captured = session.clone();
        session.set_on_send_payload(Arc::new(move |_: &Arc<MediaSession>| {
            let _ = captured.id();
        }));
        assert_eq!(Arc::strong_count(&session), 2);

        session.teardown();
        assert!(session.is_torn_down());
        assert_eq!(Arc::strong_count(&session), 1);
        assert!(!session.set_on_send_payload(Arc::new(|_: &Arc<MediaSession>| {})));
    }

    #[test]
    fn test_incoming_source_event() {
        let (scheduler, session) = session();
        let mut events = session.subscribe_events().unwrap();
        let source = MediaSource::new("remote-video", MediaType::Video, SourceType::Remote);

        session.report_incoming_source(source.clone()).unwrap();
        assert!(events.try_recv().is_err(), "Event should wait for the context");

        scheduler.run_pending();
        match events.try_recv().unwrap() {
            SessionEvent::IncomingSource { session_id, source: received } => {
                assert_eq!(session_id, session.id());
                assert!(Arc::ptr_eq(&received, &source));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(session.ownership().outstanding(), 0);
    }

    #[test]
    fn test_local_source_is_not_incoming() {
        let (scheduler, session) = session();
        let err = session
            .report_incoming_source(MediaSource::new("mic", MediaType::Audio, SourceType::Capture))
            .unwrap_err();

        assert!(matches!(err, MediaSessionError::InvalidArgument(_)));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_new_stats_event() {
        let (scheduler, session) = session();
        let mut events = session.subscribe_events().unwrap();

        let mut stats = SessionStats::new();
        stats.insert("packets-received".to_string(), 1200u64.into());
        stats.insert("jitter".to_string(), serde_json::json!(0.25));
        session.report_stats(stats.clone()).unwrap();
        scheduler.run_pending();

        match events.try_recv().unwrap() {
            SessionEvent::NewStats { stats: received, .. } => assert_eq!(*received, stats),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(session.mutation_stats().applied(), 1);
    }

    #[test]
    fn test_teardown_closes_events() {
        let (scheduler, session) = session();
        let mut events = session.subscribe_events().unwrap();

        session.teardown();
        assert!(session.subscribe_events().is_none());

        session.report_stats(SessionStats::new()).unwrap();
        scheduler.run_pending();

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        assert_eq!(session.mutation_stats().applied(), 1);
    }
}
