//! Object lifecycle state machine for objlink.
//!
//! This module provides a pure, side-effect-free state machine for an
//! object handle's lifecycle. The state machine takes events as input and
//! produces a new stage plus a list of actions to execute.
//!
//! The actual I/O (requests to the service, callback dispatch) is performed
//! by link-client, not by this module. Invalid transitions are reported as
//! [`StageError`] so callers can reject an operation before any round trip.

use thiserror::Error;

/// Lifecycle stage of an object handle - NO I/O, just transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStage {
    /// Allocated but not yet constructed from a service record.
    Uninitialized,
    /// Immutable payload, set exactly once.
    Static,
    /// Payload may be replaced in place and redistributed.
    Dynamic,
    /// No longer subscribed to updates; not deleted at the service.
    Discarded,
    /// Deleted; the handle is inert.
    Deleted,
}

/// Errors produced by invalid stage transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The handle has been deleted.
    #[error("object has been deleted")]
    Deleted,

    /// The handle has not been constructed yet.
    #[error("object has not been initialized")]
    Uninitialized,

    /// A static payload cannot be replaced.
    #[error("static object payload is already set")]
    StaticPayload,

    /// The event is not valid in the current stage.
    #[error("{event} is not valid for a {stage:?} object")]
    NotAllowed {
        /// Stage the handle was in.
        stage: ObjectStage,
        /// Short name of the rejected event.
        event: &'static str,
    },
}

/// Events that can occur in an object's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// The handle was built from a service record.
    Constructed {
        /// Whether the object is dynamic.
        dynamic: bool,
    },
    /// A local update was acknowledged.
    Updated,
    /// An update pushed by the service was received.
    RemoteUpdated,
    /// A share was acknowledged.
    Shared,
    /// A freeze was acknowledged (the source is untouched).
    Frozen,
    /// A hold was acknowledged.
    Held,
    /// A sync was acknowledged.
    Synced,
    /// The application discarded the handle.
    Discarded,
    /// The application deleted the object.
    Deleted,
    /// The service reported the object deleted.
    RemoteDeleted,
}

impl StageEvent {
    fn name(&self) -> &'static str {
        match self {
            StageEvent::Constructed { .. } => "construct",
            StageEvent::Updated => "update",
            StageEvent::RemoteUpdated => "remote update",
            StageEvent::Shared => "share",
            StageEvent::Frozen => "freeze",
            StageEvent::Held => "hold",
            StageEvent::Synced => "sync",
            StageEvent::Discarded => "discard",
            StageEvent::Deleted => "delete",
            StageEvent::RemoteDeleted => "remote delete",
        }
    }
}

/// Actions to be executed by link-client after a transition.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAction {
    /// Stop routing pushed updates to this handle.
    Unsubscribe,
    /// Drop the locally held payload.
    ClearState,
    /// Drop every registered callback.
    ClearCallbacks,
    /// Invoke both callback lists.
    NotifyCallbacks,
}

impl ObjectStage {
    /// Create a new state machine in the Uninitialized stage.
    pub fn new() -> Self {
        Self::Uninitialized
    }

    /// Process an event and return the new stage plus actions to execute.
    ///
    /// This is a pure function - no side effects.
    pub fn on_event(self, event: StageEvent) -> Result<(Self, Vec<StageAction>), StageError> {
        use StageAction::*;

        match (self, event) {
            // From Uninitialized
            (Self::Uninitialized, StageEvent::Constructed { dynamic }) => {
                let stage = if dynamic { Self::Dynamic } else { Self::Static };
                Ok((stage, vec![]))
            }
            (Self::Uninitialized, _) => Err(StageError::Uninitialized),

            // Deleted is terminal; a repeated remote delete is harmless
            (Self::Deleted, StageEvent::RemoteDeleted) => Ok((Self::Deleted, vec![])),
            (Self::Deleted, _) => Err(StageError::Deleted),

            // Updates
            (Self::Dynamic, StageEvent::Updated | StageEvent::RemoteUpdated) => {
                Ok((Self::Dynamic, vec![NotifyCallbacks]))
            }
            (Self::Static, StageEvent::Updated | StageEvent::RemoteUpdated) => {
                Err(StageError::StaticPayload)
            }

            // Read-side requests that never change the stage
            (stage @ (Self::Static | Self::Dynamic), StageEvent::Shared) => Ok((stage, vec![])),
            (Self::Dynamic, StageEvent::Frozen) => Ok((Self::Dynamic, vec![])),
            (stage, StageEvent::Held | StageEvent::Synced) => Ok((stage, vec![])),

            // Discard
            (Self::Static | Self::Dynamic, StageEvent::Discarded) => {
                Ok((Self::Discarded, vec![Unsubscribe]))
            }
            (Self::Discarded, StageEvent::Discarded) => Ok((Self::Discarded, vec![])),

            // Delete, local or remote
            (_, StageEvent::Deleted | StageEvent::RemoteDeleted) => Ok((
                Self::Deleted,
                vec![Unsubscribe, ClearState, ClearCallbacks],
            )),

            (stage, event) => Err(StageError::NotAllowed {
                stage,
                event: event.name(),
            }),
        }
    }

    /// Validate an event without transitioning.
    pub fn check(&self, event: StageEvent) -> Result<(), StageError> {
        self.on_event(event).map(|_| ())
    }

    /// Check if the handle has been deleted.
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Check if the handle has been discarded.
    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded)
    }

    /// Check if the handle is still receiving pushes.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Static | Self::Dynamic)
    }
}

impl Default for ObjectStage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constructed(dynamic: bool) -> ObjectStage {
        ObjectStage::new()
            .on_event(StageEvent::Constructed { dynamic })
            .unwrap()
            .0
    }

    // ===========================================
    // Construction
    // ===========================================

    #[test]
    fn starts_uninitialized() {
        assert_eq!(ObjectStage::new(), ObjectStage::Uninitialized);
    }

    #[test]
    fn construction_picks_static_or_dynamic() {
        assert_eq!(constructed(true), ObjectStage::Dynamic);
        assert_eq!(constructed(false), ObjectStage::Static);
    }

    #[test]
    fn construction_has_no_actions() {
        let (_, actions) = ObjectStage::new()
            .on_event(StageEvent::Constructed { dynamic: true })
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn uninitialized_rejects_operations() {
        let err = ObjectStage::new().check(StageEvent::Shared).unwrap_err();
        assert_eq!(err, StageError::Uninitialized);
    }

    #[test]
    fn construction_happens_once() {
        let err = constructed(true)
            .check(StageEvent::Constructed { dynamic: false })
            .unwrap_err();
        assert!(matches!(err, StageError::NotAllowed { .. }));
    }

    // ===========================================
    // Update
    // ===========================================

    #[test]
    fn dynamic_update_notifies_callbacks() {
        let (stage, actions) = constructed(true).on_event(StageEvent::Updated).unwrap();
        assert_eq!(stage, ObjectStage::Dynamic);
        assert_eq!(actions, vec![StageAction::NotifyCallbacks]);
    }

    #[test]
    fn static_update_is_rejected() {
        let err = constructed(false).check(StageEvent::Updated).unwrap_err();
        assert_eq!(err, StageError::StaticPayload);
    }

    #[test]
    fn discarded_rejects_update() {
        let (stage, _) = constructed(true).on_event(StageEvent::Discarded).unwrap();
        assert!(matches!(
            stage.check(StageEvent::Updated),
            Err(StageError::NotAllowed { .. })
        ));
    }

    // ===========================================
    // Share / freeze / hold
    // ===========================================

    #[test]
    fn share_allowed_while_live_only() {
        assert!(constructed(true).check(StageEvent::Shared).is_ok());
        assert!(constructed(false).check(StageEvent::Shared).is_ok());
        let (discarded, _) = constructed(false).on_event(StageEvent::Discarded).unwrap();
        assert!(discarded.check(StageEvent::Shared).is_err());
    }

    #[test]
    fn freeze_only_from_dynamic() {
        let (stage, actions) = constructed(true).on_event(StageEvent::Frozen).unwrap();
        assert_eq!(stage, ObjectStage::Dynamic);
        assert!(actions.is_empty());
        assert!(matches!(
            constructed(false).check(StageEvent::Frozen),
            Err(StageError::NotAllowed { .. })
        ));
    }

    #[test]
    fn hold_allowed_until_deleted() {
        assert!(constructed(false).check(StageEvent::Held).is_ok());
        let (discarded, _) = constructed(true).on_event(StageEvent::Discarded).unwrap();
        assert_eq!(
            discarded.on_event(StageEvent::Held).unwrap().0,
            ObjectStage::Discarded
        );
        let (deleted, _) = constructed(true).on_event(StageEvent::Deleted).unwrap();
        assert_eq!(deleted.check(StageEvent::Held), Err(StageError::Deleted));
    }

    // ===========================================
    // Discard / delete
    // ===========================================

    #[test]
    fn discard_unsubscribes_once() {
        let (stage, actions) = constructed(true).on_event(StageEvent::Discarded).unwrap();
        assert_eq!(stage, ObjectStage::Discarded);
        assert_eq!(actions, vec![StageAction::Unsubscribe]);

        let (again, actions) = stage.on_event(StageEvent::Discarded).unwrap();
        assert_eq!(again, ObjectStage::Discarded);
        assert!(actions.is_empty());
    }

    #[test]
    fn delete_clears_everything() {
        let (stage, actions) = constructed(true).on_event(StageEvent::Deleted).unwrap();
        assert_eq!(stage, ObjectStage::Deleted);
        assert!(actions.contains(&StageAction::Unsubscribe));
        assert!(actions.contains(&StageAction::ClearState));
        assert!(actions.contains(&StageAction::ClearCallbacks));
    }

    #[test]
    fn delete_allowed_from_discarded() {
        let (discarded, _) = constructed(false).on_event(StageEvent::Discarded).unwrap();
        let (stage, _) = discarded.on_event(StageEvent::Deleted).unwrap();
        assert!(stage.is_deleted());
    }

    #[test]
    fn deleted_rejects_everything_local() {
        let (deleted, _) = constructed(true).on_event(StageEvent::Deleted).unwrap();
        for event in [
            StageEvent::Updated,
            StageEvent::Shared,
            StageEvent::Frozen,
            StageEvent::Held,
            StageEvent::Synced,
            StageEvent::Discarded,
            StageEvent::Deleted,
        ] {
            assert_eq!(deleted.check(event), Err(StageError::Deleted), "{:?}", event);
        }
    }

    #[test]
    fn remote_delete_is_idempotent() {
        let (deleted, _) = constructed(true).on_event(StageEvent::RemoteDeleted).unwrap();
        let (again, actions) = deleted.on_event(StageEvent::RemoteDeleted).unwrap();
        assert!(again.is_deleted());
        assert!(actions.is_empty());
    }

    #[test]
    fn liveness_helpers() {
        assert!(constructed(true).is_live());
        assert!(!ObjectStage::new().is_live());
        let (discarded, _) = constructed(true).on_event(StageEvent::Discarded).unwrap();
        assert!(discarded.is_discarded());
        assert!(!discarded.is_live());
    }
}
