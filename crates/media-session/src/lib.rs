//! # Media Session - thread-safe media session state for RVOIP
//!
//! A [`MediaSession`] holds the state of one incoming and one outgoing media
//! stream: the send payload and source, the receive payloads, the stream
//! identity (ssrc, cname), SRTP key material and the rtcp-mux flag. Sessions
//! also publish [`SessionEvent`]s for new statistics and incoming sources.
//!
//! The session can be read and written from any thread. Writes are deferred:
//! each public mutator retains what it needs, submits a task to the session's
//! [`Scheduler`] and returns at once. All tasks run on one designated execution
//! context, so the media pipeline consuming the session sees changes in a
//! single, consistent order.
//!
//! ```no_run
//! use rvoip_media_session::prelude::*;
//!
//! # fn main() -> rvoip_media_session::Result<()> {
//! let scheduler = ContextScheduler::start("media-context")?;
//! let session = MediaSession::new(MediaSessionConfig::builder().rtcp_mux(true).build(), scheduler.clone());
//!
//! session.add_receive_payload(Payload::audio(0, "PCMU", 8000, 1).shared())?;
//! session.set_send_payload(Payload::audio(0, "PCMU", 8000, 1).shared())?;
//!
//! scheduler.flush_blocking()?;
//! assert!(session.receive_payload(0).is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod notification;
pub mod ownership;
pub mod payload;
mod protocol;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod srtp;

pub use config::{MediaSessionConfig, MediaSessionConfigBuilder};
pub use error::{MediaSessionError, Result};
pub use events::{SessionEvent, SessionEventEmitter, SessionStats};
pub use notification::{NotificationSlot, SlotCallback};
pub use ownership::{OwnershipLedger, OwnershipToken};
pub use payload::{MediaType, Payload};
pub use protocol::MutationStats;
pub use registry::PayloadRegistry;
pub use scheduler::{ContextScheduler, DeferredTask, ManualScheduler, Scheduler, SchedulerStats};
pub use session::{MediaSession, MediaSessionId, SessionCallback, SessionIdentity};
pub use source::{MediaSource, SourceType};
pub use srtp::{KeyRole, SRTP_ENCODED_KEY_LENGTH, SRTP_KEY_LENGTH};

/// Re-export of common types
pub mod prelude {
    pub use super::{
        ContextScheduler, KeyRole, ManualScheduler, MediaSession, MediaSessionConfig,
        MediaSessionError, MediaSource, MediaType, Payload, Result, Scheduler, SessionCallback,
        SessionEvent, SessionStats, SourceType,
    };
}
