//! Media session configuration
//!
//! Construction-time defaults for a [`MediaSession`](crate::MediaSession).
//! Values can be built in code with [`MediaSessionConfigBuilder`] or loaded
//! from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{MediaSessionError, Result};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::srtp::{self, KeyRole};

/// Media session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSessionConfig {
    /// Multiplex RTP and RTCP on one channel (RFC 5761)
    pub rtcp_mux: bool,
    /// Key used to decrypt incoming SRTP packets (base64)
    pub incoming_srtp_key: Option<String>,
    /// Key used to encrypt outgoing SRTP packets (base64)
    pub outgoing_srtp_key: Option<String>,
    /// Set up the DTLS connection in client role
    pub dtls_client_mode: bool,
    /// Events buffered per subscriber before slow subscribers start lagging
    pub event_capacity: usize,
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            rtcp_mux: false,
            incoming_srtp_key: None,
            outgoing_srtp_key: None,
            dtls_client_mode: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl MediaSessionConfig {
    /// Start building a configuration
    pub fn builder() -> MediaSessionConfigBuilder {
        MediaSessionConfigBuilder::new()
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MediaSessionError::Config(format!("invalid media session config: {}", e)))?;
        config.validate();
        Ok(config)
    }

    /// Key configured for `role`
    pub fn srtp_key(&self, role: KeyRole) -> Option<&str> {
        match role {
            KeyRole::Incoming => self.incoming_srtp_key.as_deref(),
            KeyRole::Outgoing => self.outgoing_srtp_key.as_deref(),
        }
    }

    /// Warn about keys with an unexpected encoded length
    ///
    /// Returns whether every configured key looked as expected.
    pub fn validate(&self) -> bool {
        [KeyRole::Incoming, KeyRole::Outgoing]
            .into_iter()
            .filter_map(|role| self.srtp_key(role).map(|key| (role, key)))
            .filter(|(_, key)| !key.is_empty())
            .map(|(role, key)| srtp::check_encoded_length(role, key))
            .fold(true, |all, ok| all && ok)
    }
}

/// Builder for [`MediaSessionConfig`]
#[derive(Debug, Clone, Default)]
pub struct MediaSessionConfigBuilder {
    config: MediaSessionConfig,
}

impl MediaSessionConfigBuilder {
    /// Create a builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder with WebRTC defaults (rtcp-mux on)
    pub fn webrtc() -> Self {
        Self::new().rtcp_mux(true)
    }

    /// Enable or disable RTCP multiplexing
    pub fn rtcp_mux(mut self, enable: bool) -> Self {
        self.config.rtcp_mux = enable;
        self
    }

    /// Set the incoming SRTP key (base64)
    pub fn incoming_srtp_key(mut self, key: impl Into<String>) -> Self {
        self.config.incoming_srtp_key = Some(key.into());
        self
    }

    /// Set the outgoing SRTP key (base64)
    pub fn outgoing_srtp_key(mut self, key: impl Into<String>) -> Self {
        self.config.outgoing_srtp_key = Some(key.into());
        self
    }

    /// Use the DTLS client role
    pub fn dtls_client_mode(mut self, enable: bool) -> Self {
        self.config.dtls_client_mode = enable;
        self
    }

    /// Set the per-subscriber event buffer size
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Finish the configuration
    pub fn build(self) -> MediaSessionConfig {
        self.config.validate();
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MediaSessionConfig::default();
        assert!(!config.rtcp_mux);
        assert!(!config.dtls_client_mode);
        assert!(config.incoming_srtp_key.is_none());
        assert!(config.outgoing_srtp_key.is_none());
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_builder() {
        let key = srtp::encode_key(&[7; 30]);
        let config = MediaSessionConfigBuilder::webrtc()
            .incoming_srtp_key(key.clone())
            .dtls_client_mode(true)
            .build();

        assert!(config.rtcp_mux);
        assert!(config.dtls_client_mode);
        assert_eq!(config.srtp_key(KeyRole::Incoming), Some(key.as_str()));
        assert_eq!(config.srtp_key(KeyRole::Outgoing), None);
        assert!(config.validate());
    }

    #[test]
    fn test_from_json() {
        let config = MediaSessionConfig::from_json_str(
            r#"{ "rtcp_mux": true, "outgoing_srtp_key": "c2hvcnQ=" }"#,
        )
        .unwrap();

        assert!(config.rtcp_mux);
        assert_eq!(config.outgoing_srtp_key.as_deref(), Some("c2hvcnQ="));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        // Short key is accepted, only warned about
        assert!(!config.validate());
    }

    #[test]
    fn test_invalid_json() {
        let err = MediaSessionConfig::from_json_str("{ rtcp_mux: ").unwrap_err();
        assert!(matches!(err, MediaSessionError::Config(_)));
    }
}
