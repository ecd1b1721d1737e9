//! Activation lifecycle state machine and deactivation reasons.

use serde::{Deserialize, Serialize};

/// Lifecycle of one in-memory activation of a connection actor.
///
/// # State Transitions
///
/// ```text
/// Creating → Activating → Valid → Deactivating → Invalid
///                ↓
///           Deactivating (activation failed)
/// ```
///
/// Only `Valid` activations process operations. `Invalid` is terminal; the
/// next access to the same key creates a new activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    /// Instance created, message loop not yet running.
    Creating,
    /// Loading the record and resuming subscriptions.
    Activating,
    /// Ready to process operations.
    Valid,
    /// Leaving the catalog.
    Deactivating,
    /// Gone.
    Invalid,
}

impl ActivationState {
    /// Check if transition to `next` is allowed.
    pub fn can_transition_to(&self, next: ActivationState) -> bool {
        use ActivationState::*;
        matches!(
            (self, next),
            (Creating, Activating)
                | (Activating, Valid)
                | (Activating, Deactivating)
                | (Valid, Deactivating)
                | (Deactivating, Invalid)
        )
    }

    /// Whether operations may run in this state.
    pub fn can_process_messages(&self) -> bool {
        matches!(self, ActivationState::Valid)
    }

    /// Whether the activation will never become `Valid` again.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ActivationState::Deactivating | ActivationState::Invalid
        )
    }
}

/// Why an activation leaves memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeactivationReason {
    /// No operation arrived within the idle timeout.
    IdleTimeout,
    /// The connection disconnected and its linger delay elapsed.
    Disconnected,
    /// Requested through the catalog.
    ExplicitRequest,
    /// The catalog is shutting down.
    NodeShutdown,
    /// Loading state or resuming the subscription failed.
    ActivationFailed,
}
