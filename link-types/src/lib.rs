//! # objlink-types
//!
//! Identity, addressing and wire format types for objlink.
//!
//! This crate provides the foundational types used across all objlink crates:
//! - [`Address`], [`AgentId`], [`ApiId`], [`AppToken`], [`RequestId`] - Identity and addressing
//! - [`Envelope`] - Frame wrapper carrying the correlation id
//! - [`Message`] - Requests, responses and service pushes
//! - [`WireError`], [`ServiceError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use error::{ErrorCode, ServiceError, WireError};
pub use ids::{Address, AgentId, ApiId, AppToken, RequestId, ADDRESS_LEN, TOKEN_LEN};
pub use messages::{
    Message, ObjectRecord, OpCode, Payload, Push, Reply, Request, RequestBody, Response,
};
