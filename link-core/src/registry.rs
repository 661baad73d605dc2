//! API registry for objlink.
//!
//! Maps a schema identifier to the application handler invoked when a
//! first-contact shared object declaring that schema arrives. The
//! registry is generic over the handler type so this crate stays free of
//! any async runtime.

use objlink_types::ApiId;
use std::collections::HashMap;

/// Mapping from `api_id` to handler.
#[derive(Debug, Clone)]
pub struct ApiRegistry<H> {
    handlers: HashMap<ApiId, H>,
}

impl<H> ApiRegistry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, returning the one it replaced.
    pub fn register(&mut self, api_id: ApiId, handler: H) -> Option<H> {
        self.handlers.insert(api_id, handler)
    }

    /// Remove a handler, returning it if one was registered.
    pub fn deregister(&mut self, api_id: &ApiId) -> Option<H> {
        self.handlers.remove(api_id)
    }

    /// Look up the handler for an `api_id`.
    pub fn get(&self, api_id: &ApiId) -> Option<&H> {
        self.handlers.get(api_id)
    }

    /// Check if an `api_id` has a handler.
    pub fn contains(&self, api_id: &ApiId) -> bool {
        self.handlers.contains_key(api_id)
    }

    /// Number of registered `api_id`s.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H> Default for ApiRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
