//! Identity and addressing types for objlink.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Length in bytes of every content-addressed identifier.
///
/// One algorithm byte followed by a 64-byte SHA-512 digest.
pub const ADDRESS_LEN: usize = 65;

/// Length in bytes of an application token.
pub const TOKEN_LEN: usize = 4;

/// Algorithm byte prefixed to SHA-512 based identifiers.
const ALGO_SHA512: u8 = 0x01;

macro_rules! fixed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; ADDRESS_LEN]);

        impl $name {
            /// Derive an identifier by hashing `content` with SHA-512.
            pub fn from_content(content: &[u8]) -> Self {
                use sha2::{Digest, Sha512};
                let digest = Sha512::digest(content);
                let mut bytes = [0u8; ADDRESS_LEN];
                bytes[0] = ALGO_SHA512;
                bytes[1..].copy_from_slice(&digest);
                Self(bytes)
            }

            /// Create a random identifier (for testing and mock services).
            pub fn random() -> Self {
                let mut seed = [0u8; 32];
                getrandom::getrandom(&mut seed).expect("getrandom failed");
                Self::from_content(&seed)
            }

            /// Create an identifier from raw bytes.
            ///
            /// Returns `None` unless exactly [`ADDRESS_LEN`] bytes are given.
            pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; ADDRESS_LEN] = bytes.try_into().ok()?;
                Some(Self(arr))
            }

            /// Get the raw bytes of this identifier.
            pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Skip the algorithm prefix so short forms are distinguishable.
                write!(f, "{}({})", stringify!($name), &self.to_string()[2..10])
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let bytes = deserializer.deserialize_bytes(FixedBytesVisitor)?;
                Self::from_bytes(&bytes).ok_or_else(|| {
                    de::Error::invalid_length(bytes.len(), &"65 bytes")
                })
            }
        }
    };
}

/// Accepts either a byte string (MessagePack `bin`) or a sequence of
/// integers (JSON arrays).
struct FixedBytesVisitor;

impl<'de> Visitor<'de> for FixedBytesVisitor {
    type Value = Vec<u8>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a byte string")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(v.to_vec())
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(ADDRESS_LEN));
        while let Some(byte) = seq.next_element::<u8>()? {
            out.push(byte);
        }
        Ok(out)
    }
}

fixed_id!(
    /// Content address of an object.
    ///
    /// For static objects this is derived from the payload; for dynamic
    /// objects it is the stable address of the dynamic binding.
    Address
);

fixed_id!(
    /// Public-key fingerprint of an agent (the logged-in principal).
    AgentId
);

fixed_id!(
    /// Schema identifier declaring an object's binary API.
    ///
    /// Used to route first-contact shares to the application that
    /// registered for it.
    ApiId
);

/// Per-(agent, application) credential gating access to private objects.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppToken([u8; TOKEN_LEN]);

impl AppToken {
    /// Create a token from its four bytes.
    pub fn new(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a random token (used by mock services).
    pub fn random() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create a token from raw bytes; `None` unless exactly four bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; TOKEN_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Get the raw bytes of this token.
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl fmt::Display for AppToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for AppToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppToken({})", self)
    }
}

/// Correlation identifier matching a response to its request.
///
/// Zero is reserved for service-initiated pushes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct RequestId(u64);

impl RequestId {
    /// The id carried by every push frame.
    pub const PUSH: RequestId = RequestId(0);

    /// Create a RequestId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this RequestId.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Whether this id marks a push rather than a response.
    pub fn is_push(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}
