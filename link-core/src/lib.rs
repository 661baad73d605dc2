//! # objlink-core
//!
//! Pure logic for objlink (no I/O, instant tests).
//!
//! This crate implements the object lifecycle state machine and the
//! bookkeeping structures an object handle and a link need, without any
//! network or runtime dependency, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (IPC requests, callback dispatch) is performed by
//! `objlink-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod history;
pub mod registry;
pub mod stage;

pub use callbacks::{CallbackList, CallbackListError};
pub use history::{StateHistory, DEFAULT_LEGROOM};
pub use registry::ApiRegistry;
pub use stage::{ObjectStage, StageAction, StageError, StageEvent};
