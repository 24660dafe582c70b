//! System state owned by the dispatcher
//!
//! Nothing here is shared: the dispatcher holds the only `SystemState` and
//! passes it by exclusive reference. Other tasks see published snapshots.

use serde::{Deserialize, Serialize};

use super::guard::SuppressionGuard;
use super::volume::Volume;
use crate::config::VOLUME_DEFAULT;

/// Whether the device is listening for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeupState {
    /// Waiting for the wake word
    #[default]
    Unwaken,
    /// Listening for commands until the exit timer expires
    Awake,
}

impl std::fmt::Display for WakeupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WakeupState::Unwaken => write!(f, "Unwaken"),
            WakeupState::Awake => write!(f, "Awake"),
        }
    }
}

/// Whether the recogniser is mid-utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrState {
    #[default]
    Idle,
    Busy,
}

/// An exit postponed until the recogniser goes idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingExit {
    #[default]
    None,
    WaitingForAsrIdle,
}

/// Transition on the capture-hold count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEdge {
    /// First hold taken: capture must pause
    Paused,
    /// Last hold released: capture must resume
    Resumed,
    /// Count moved without crossing zero
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct SystemState {
    pub wakeup: WakeupState,
    pub asr: AsrState,
    pub pending_exit: PendingExit,
    mute_depth: u8,
    pub volume: Volume,
    pub guard: SuppressionGuard,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            wakeup: WakeupState::Unwaken,
            asr: AsrState::Idle,
            pending_exit: PendingExit::None,
            mute_depth: 0,
            volume: Volume::clamped(VOLUME_DEFAULT as i32),
            guard: SuppressionGuard::default(),
        }
    }
}

impl SystemState {
    pub fn mute_depth(&self) -> u8 {
        self.mute_depth
    }

    /// Take one capture hold
    pub fn hold_capture(&mut self) -> CaptureEdge {
        self.mute_depth = self.mute_depth.saturating_add(1);
        if self.mute_depth == 1 {
            CaptureEdge::Paused
        } else {
            CaptureEdge::Unchanged
        }
    }

    /// Drop one capture hold; releasing with none held changes nothing
    pub fn release_capture(&mut self) -> CaptureEdge {
        match self.mute_depth {
            0 => CaptureEdge::Unchanged,
            1 => {
                self.mute_depth = 0;
                CaptureEdge::Resumed
            }
            _ => {
                self.mute_depth -= 1;
                CaptureEdge::Unchanged
            }
        }
    }

    pub fn is_awake(&self) -> bool {
        self.wakeup == WakeupState::Awake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = SystemState::default();
        assert_eq!(state.wakeup, WakeupState::Unwaken);
        assert_eq!(state.asr, AsrState::Idle);
        assert_eq!(state.pending_exit, PendingExit::None);
        assert_eq!(state.mute_depth(), 0);
        assert_eq!(state.volume.level(), VOLUME_DEFAULT);
        assert!(state.guard.exit_wakeup.is_open());
        assert!(state.guard.asr_result.is_open());
    }

    #[test]
    fn test_capture_holds_nest() {
        let mut state = SystemState::default();
        assert_eq!(state.hold_capture(), CaptureEdge::Paused);
        assert_eq!(state.hold_capture(), CaptureEdge::Unchanged);
        assert_eq!(state.release_capture(), CaptureEdge::Unchanged);
        assert_eq!(state.release_capture(), CaptureEdge::Resumed);
        assert_eq!(state.mute_depth(), 0);
    }

    #[test]
    fn test_release_without_hold() {
        let mut state = SystemState::default();
        assert_eq!(state.release_capture(), CaptureEdge::Unchanged);
        assert_eq!(state.mute_depth(), 0);
    }
}
