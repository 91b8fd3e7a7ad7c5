//! Payload descriptors
//!
//! A payload describes one media encoding identified by its RTP payload type.
//! The session never interprets the codec fields; it only keys on
//! `payload_type` and compares identities.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MediaSessionError, Result};

/// Kind of media carried by a payload or source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Audio media
    Audio,
    /// Video media
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Payload descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// RTP payload type number
    pub payload_type: u32,
    /// Encoding name (e.g. "PCMU", "OPUS", "VP8")
    pub encoding_name: String,
    /// Media type
    pub media_type: MediaType,
    /// Clock rate in Hz
    pub clock_rate: u32,
    /// Number of channels (audio only)
    pub channels: Option<u8>,
}

impl Payload {
    /// Create a new payload descriptor
    pub fn new(
        payload_type: u32,
        encoding_name: impl Into<String>,
        media_type: MediaType,
        clock_rate: u32,
    ) -> Self {
        Self {
            payload_type,
            encoding_name: encoding_name.into(),
            media_type,
            clock_rate,
            channels: None,
        }
    }

    /// Create an audio payload descriptor
    pub fn audio(payload_type: u32, encoding_name: impl Into<String>, clock_rate: u32, channels: u8) -> Self {
        Self {
            channels: Some(channels),
            ..Self::new(payload_type, encoding_name, MediaType::Audio, clock_rate)
        }
    }

    /// Create a video payload descriptor
    pub fn video(payload_type: u32, encoding_name: impl Into<String>, clock_rate: u32) -> Self {
        Self::new(payload_type, encoding_name, MediaType::Video, clock_rate)
    }

    /// Wrap the descriptor for sharing with a session
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Check the fields the session relies on
    pub fn validate(&self) -> Result<()> {
        if self.encoding_name.trim().is_empty() {
            return Err(MediaSessionError::InvalidArgument(format!(
                "payload type {} has no encoding name",
                self.payload_type
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.payload_type, self.encoding_name, self.clock_rate)?;
        if let Some(channels) = self.channels {
            write!(f, "/{}", channels)?;
        }
        Ok(())
    }
}
