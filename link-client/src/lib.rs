//! # objlink-client
//!
//! Client library for objlink, the local shared-object service.
//!
//! Applications open a [`Link`] to the service, bind an application token,
//! and create or fetch objects through [`ObjectHandle`]s. Dynamic objects
//! are mutated in place by their author and the service pushes every change
//! to each subscribed handle.
//!
//! ## Features
//!
//! - **Two calling conventions**: every operation has a suspending form for
//!   the link's own context and a `blocking_` form for any other thread
//! - **Lifecycle state machine**: handle stages come from objlink-core and
//!   are validated before any round trip
//! - **Callbacks**: ordered blocking and async update callbacks per handle
//! - **Transport Abstraction**: Pluggable IPC layer (WebSocket, mock)
//!
//! ## Example
//!
//! ```ignore
//! use objlink_client::{blocking_callback, Link, LinkConfig, ObjectOptions};
//!
//! let link = Link::connect(LinkConfig::from_file(path)?)?;
//! link.blocking_new_token()?;
//!
//! let notes = link.blocking_new_object(
//!     b"draft",
//!     ObjectOptions::new().with_api_id(api_id).with_dynamic(true),
//! )?;
//! notes.append_blocking_callback(blocking_callback(|handle| {
//!     println!("now {:?}", handle.payload()?);
//!     Ok(())
//! }))?;
//! notes.blocking_update(b"final")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod logging;
pub mod object;
pub mod transport;

pub use config::{ConfigError, LinkConfig};
pub use dispatch::{
    async_callback, blocking_callback, AsyncCallback, BlockingCallback, CallbackError,
    ShareHandler, ShareNotice,
};
pub use error::LinkError;
pub use link::Link;
pub use object::{ObjectHandle, ObjectOptions};
pub use transport::{MockTransport, Transport, TransportError, WebSocketTransport};

pub use objlink_core::ObjectStage;
pub use objlink_types::{Address, AgentId, ApiId, AppToken, Payload};
