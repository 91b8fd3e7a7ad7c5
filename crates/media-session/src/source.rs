//! Media sources
//!
//! A source is shared between the session and whichever subsystem produced it
//! (capture, a remote stream, ...). The session only keeps an `Arc` to it.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::payload::MediaType;

/// Where a media source comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// Locally produced media (test source, file, ...)
    Local,
    /// Media received from a remote peer
    Remote,
    /// Capture device (microphone, camera)
    Capture,
}

/// A media source that can be attached as a session's send source
#[derive(Debug)]
pub struct MediaSource {
    id: Uuid,
    name: String,
    media_type: MediaType,
    source_type: SourceType,
}

impl MediaSource {
    /// Create a new shared media source
    pub fn new(name: impl Into<String>, media_type: MediaType, source_type: SourceType) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            media_type,
            source_type,
        })
    }

    /// Unique source id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Media type produced by this source
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Origin of the media
    pub fn source_type(&self) -> SourceType {
        self.source_type
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {:?})", self.name, self.media_type, self.source_type)
    }
}
