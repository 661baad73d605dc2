//! Envelope - the wire format wrapper for all frames.

use serde::{Deserialize, Serialize};

use crate::{Message, RequestId, WireError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// The envelope wraps every frame with its version and correlation id.
///
/// Requests carry a fresh id, responses echo it, pushes use
/// [`RequestId::PUSH`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Correlation id
    pub id: RequestId,
    /// The framed message
    pub message: Message,
}

impl Envelope {
    /// Wrap a message for sending.
    pub fn new(id: RequestId, message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            message,
        }
    }

    /// Wrap a push (always correlation id zero).
    pub fn push(push: crate::Push) -> Self {
        Self::new(RequestId::PUSH, Message::Push(push))
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes, rejecting unknown versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let envelope: Self = rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}
