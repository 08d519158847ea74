//! The `running → draining → stopped` flag.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Where the process is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    Draining,
    Stopped,
}

impl ShutdownPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::Draining,
            _ => ShutdownPhase::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ShutdownPhase::Running => 0,
            ShutdownPhase::Draining => 1,
            ShutdownPhase::Stopped => 2,
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownPhase::Running => "running",
            ShutdownPhase::Draining => "draining",
            ShutdownPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Shared lifecycle flag.
///
/// Read by the HTTP handler on every request, written only by the
/// lifecycle controller. Transitions only move forward.
#[derive(Debug)]
pub struct ShutdownState {
    phase: AtomicU8,
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownState {
    pub fn new() -> Self {
        ShutdownState {
            phase: AtomicU8::new(ShutdownPhase::Running.as_u8()),
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.phase() == ShutdownPhase::Running
    }

    /// Moves `running → draining`. Returns false if already past `running`.
    pub fn begin_draining(&self) -> bool {
        self.advance_to(ShutdownPhase::Draining)
    }

    /// Moves to `stopped`. Returns false if already stopped.
    pub fn mark_stopped(&self) -> bool {
        self.advance_to(ShutdownPhase::Stopped)
    }

    fn advance_to(&self, target: ShutdownPhase) -> bool {
        let target = target.as_u8();
        self.phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < target).then_some(target)
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let state = ShutdownState::new();
        assert_eq!(state.phase(), ShutdownPhase::Running);
        assert!(state.is_running());
    }

    #[test]
    fn transitions_are_linear() {
        let state = ShutdownState::new();

        assert!(state.begin_draining());
        assert_eq!(state.phase(), ShutdownPhase::Draining);
        assert!(!state.begin_draining());

        assert!(state.mark_stopped());
        assert_eq!(state.phase(), ShutdownPhase::Stopped);

        // No way back.
        assert!(!state.begin_draining());
        assert!(!state.mark_stopped());
        assert_eq!(state.phase(), ShutdownPhase::Stopped);
    }

    #[test]
    fn stop_can_skip_draining() {
        let state = ShutdownState::new();
        assert!(state.mark_stopped());
        assert!(!state.is_running());
    }

    #[test]
    fn display_matches_serialized_form() {
        for phase in [
            ShutdownPhase::Running,
            ShutdownPhase::Draining,
            ShutdownPhase::Stopped,
        ] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase));
        }
    }
}
