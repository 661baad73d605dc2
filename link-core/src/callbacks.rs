//! Ordered callback lists for objlink.
//!
//! A plain ordered sequence with append/prepend ends and removal by
//! identity. Callbacks are held as `Arc`s so the same instance can be
//! registered by the application and later removed by handing back a
//! clone of that `Arc`. Dispatch iterates a snapshot, so a callback that
//! mutates the list while running never disturbs the current pass.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from callback list operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackListError {
    /// The callback instance is not in the list.
    #[error("callback is not registered")]
    NotRegistered,
}

/// Ordered list of callbacks, compared by `Arc` identity.
pub struct CallbackList<C: ?Sized> {
    entries: Vec<Arc<C>>,
}

impl<C: ?Sized> CallbackList<C> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a callback at the end (invoked last).
    pub fn append(&mut self, callback: Arc<C>) {
        self.entries.push(callback);
    }

    /// Add a callback at the front (invoked first).
    pub fn prepend(&mut self, callback: Arc<C>) {
        self.entries.insert(0, callback);
    }

    /// Remove the first occurrence of this exact callback instance.
    ///
    /// Leaves the list unchanged when the instance is absent.
    pub fn remove(&mut self, callback: &Arc<C>) -> Result<(), CallbackListError> {
        let index = self
            .entries
            .iter()
            .position(|c| Arc::ptr_eq(c, callback))
            .ok_or(CallbackListError::NotRegistered)?;
        self.entries.remove(index);
        Ok(())
    }

    /// Check if this exact callback instance is registered.
    pub fn contains(&self, callback: &Arc<C>) -> bool {
        self.entries.iter().any(|c| Arc::ptr_eq(c, callback))
    }

    /// Remove every callback.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Clone the current order for dispatch.
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.entries.clone()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: ?Sized> Default for CallbackList<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> Clone for CallbackList<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<C: ?Sized> fmt::Debug for CallbackList<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.entries.len())
            .finish()
    }
}
