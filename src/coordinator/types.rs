//! Public types for the engine coordinator.

use crate::sync::SyncState;

/// Engine lifecycle state.
///
/// Use [`super::SubCacheEngine::state()`] to check the current state or
/// [`super::SubCacheEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Initial load from the subscription store
    Starting,
    /// Loaded, accepting matches
    Ready,
    /// Timer loop running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Shutdown complete, no further refreshes
    Stopped,
}

impl EngineState {
    /// Numeric code for the state gauge
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Starting => 1,
            Self::Ready => 2,
            Self::Running => 3,
            Self::ShuttingDown => 4,
            Self::Stopped => 5,
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Point-in-time view of engine health, no I/O involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub state: EngineState,
    pub ready: bool,
    pub sync_state: SyncState,
    pub items: usize,
    pub refreshes: u64,
    /// Subscriptions over the consecutive-failure threshold
    pub needing_attention: usize,
    /// Ready/running and no subscription needs attention
    pub healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(format!("{}", EngineState::Created), "Created");
        assert_eq!(format!("{}", EngineState::Running), "Running");
        assert_eq!(format!("{}", EngineState::Stopped), "Stopped");
    }

    #[test]
    fn test_engine_state_codes_are_ordered() {
        let states = [
            EngineState::Created,
            EngineState::Starting,
            EngineState::Ready,
            EngineState::Running,
            EngineState::ShuttingDown,
            EngineState::Stopped,
        ];
        for pair in states.windows(2) {
            assert!(pair[0].as_u8() < pair[1].as_u8());
        }
    }
}
