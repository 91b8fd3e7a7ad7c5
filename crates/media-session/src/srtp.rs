//! SRTP key material
//!
//! Keys are stored base64 encoded, as exchanged in SDP. A 30 byte master key
//! plus salt encodes to 40 characters. Length mismatches are reported but never
//! rejected; the pipeline decides whether a short or long key is usable.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MediaSessionError, Result};

/// Expected decoded key length (16 byte master key + 14 byte salt)
pub const SRTP_KEY_LENGTH: usize = 30;

/// Expected base64 encoded key length
pub const SRTP_ENCODED_KEY_LENGTH: usize = 40;

/// Direction a key is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    /// Decrypts incoming SRTP packets
    Incoming,
    /// Encrypts outgoing SRTP packets
    Outgoing,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => write!(f, "incoming-srtp-key"),
            Self::Outgoing => write!(f, "outgoing-srtp-key"),
        }
    }
}

/// Decode a stored key
///
/// An absent, empty or whitespace-only key decodes to an empty buffer, meaning "no key
/// configured". A decoded length other than [`SRTP_KEY_LENGTH`] is logged and
/// the bytes are returned anyway.
pub fn decode_key(role: KeyRole, encoded: Option<&str>) -> Result<Bytes> {
    let encoded = match encoded.map(str::trim) {
        Some(encoded) if !encoded.is_empty() => encoded,
        _ => return Ok(Bytes::new()),
    };

    let key = STANDARD
        .decode(encoded)
        .map_err(|e| MediaSessionError::InvalidKeyEncoding(format!("{}: {}", role, e)))?;

    if let Err(e) = check_key_length(&key) {
        warn!("Unexpected {} length: {}", role, e);
    }
    Ok(Bytes::from(key))
}

/// Check decoded key material against [`SRTP_KEY_LENGTH`]
pub fn check_key_length(key: &[u8]) -> Result<()> {
    if key.len() != SRTP_KEY_LENGTH {
        return Err(MediaSessionError::MalformedKeyLength {
            expected: SRTP_KEY_LENGTH,
            actual: key.len(),
        });
    }
    Ok(())
}

/// Warn when an encoded key does not have the expected length
///
/// Returns whether the length was as expected.
pub fn check_encoded_length(role: KeyRole, encoded: &str) -> bool {
    if encoded.len() != SRTP_ENCODED_KEY_LENGTH {
        warn!(
            "{} is {} characters, expected {}",
            role,
            encoded.len(),
            SRTP_ENCODED_KEY_LENGTH
        );
        return false;
    }
    true
}

/// Encode raw key material for storage
pub fn encode_key(key: &[u8]) -> String {
    STANDARD.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_round_trip() {
        let raw: Vec<u8> = (0..SRTP_KEY_LENGTH as u8).collect();
        let encoded = encode_key(&raw);
        assert_eq!(encoded.len(), SRTP_ENCODED_KEY_LENGTH);

        let decoded = decode_key(KeyRole::Incoming, Some(&encoded)).unwrap();
        assert_eq!(&decoded[..], &raw[..]);
    }

    #[test]
    fn test_absent_key_is_empty_buffer() {
        assert!(decode_key(KeyRole::Outgoing, None).unwrap().is_empty());
        assert!(decode_key(KeyRole::Outgoing, Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_whitespace_key_is_empty_buffer() {
        assert!(decode_key(KeyRole::Incoming, Some("   ")).unwrap().is_empty());
        assert!(decode_key(KeyRole::Outgoing, Some("\t\n")).unwrap().is_empty());

        let padded = format!("  {}\n", encode_key(&[7; SRTP_KEY_LENGTH]));
        assert_eq!(decode_key(KeyRole::Incoming, Some(&padded)).unwrap().len(), SRTP_KEY_LENGTH);
    }

    #[test]
    fn test_short_key_still_returned() {
        let encoded = encode_key(&[0xAB; 16]);
        let decoded = decode_key(KeyRole::Incoming, Some(&encoded)).unwrap();
        assert_eq!(decoded.len(), 16);
        assert_eq!(
            check_key_length(&decoded).unwrap_err(),
            MediaSessionError::MalformedKeyLength { expected: 30, actual: 16 }
        );
    }

    #[test]
    fn test_invalid_base64() {
        let err = decode_key(KeyRole::Incoming, Some("not base64!!")).unwrap_err();
        assert!(matches!(err, MediaSessionError::InvalidKeyEncoding(_)));
    }

    #[test]
    fn test_encoded_length_check() {
        assert!(check_encoded_length(KeyRole::Incoming, &encode_key(&[1; 30])));
        assert!(!check_encoded_length(KeyRole::Incoming, "c2hvcnQ="));
    }
}
