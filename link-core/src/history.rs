//! Bounded payload history for objlink.
//!
//! Each dynamic object handle keeps its most recent payloads, newest
//! first, up to its legroom. Pushing beyond capacity drops the oldest
//! entry. Static handles use a history of one entry that is written
//! exactly once.

use objlink_types::Payload;
use std::collections::VecDeque;

/// Legroom used when none is configured.
pub const DEFAULT_LEGROOM: usize = 3;

/// Legroom-bounded history of object payloads, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateHistory {
    /// Maximum number of payloads retained (always at least 1).
    legroom: usize,
    /// Retained payloads, index 0 is current.
    entries: VecDeque<Payload>,
}

impl StateHistory {
    /// Create an empty history with the given legroom.
    ///
    /// A legroom of zero is raised to one so the current payload is
    /// always retained.
    pub fn new(legroom: usize) -> Self {
        let legroom = legroom.max(1);
        Self {
            legroom,
            entries: VecDeque::with_capacity(legroom),
        }
    }

    /// Create a history seeded with an initial payload.
    pub fn with_initial(legroom: usize, payload: Payload) -> Self {
        let mut history = Self::new(legroom);
        history.push(payload);
        history
    }

    /// Record a new current payload, evicting the oldest past legroom.
    pub fn push(&mut self, payload: Payload) {
        if self.entries.len() == self.legroom {
            self.entries.pop_back();
        }
        self.entries.push_front(payload);
    }

    /// The current payload, if any.
    pub fn current(&self) -> Option<&Payload> {
        self.entries.front()
    }

    /// Iterate from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &Payload> {
        self.entries.iter()
    }

    /// Drop every retained payload.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of retained payloads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained payloads.
    pub fn legroom(&self) -> usize {
        self.legroom
    }
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::new(DEFAULT_LEGROOM)
    }
}
