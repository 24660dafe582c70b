//! Events module for observers of the wakeup lifecycle
//!
//! The dispatcher broadcasts a `StateEvent` for every externally visible
//! change and publishes a `Snapshot` after every handled message.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collab::ModelGroup;
use crate::power::PowerMode;
use crate::state::{AsrState, PendingExit, SystemState, WakeupState};

/// Events emitted by the dispatcher during transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Audio capture is up and the welcome sequence has started
    PowerOn,

    /// Wake word accepted from the unwaken state
    WakeupEntered,

    /// Wakeup window restarted while already awake
    WakeupRefreshed {
        /// New exit timeout in milliseconds
        timeout_ms: u64,
    },

    /// Exit timer fired mid-utterance; exit waits for the recogniser
    ExitDeferred,

    /// Back to waiting for the wake word
    WakeupExited,

    /// Recogniser switched model group
    ModelSwitched { group: ModelGroup },

    /// A command result was accepted
    CommandRecognized { command_id: u16, score: i32 },

    /// Playback volume changed
    VolumeChanged { volume: u8 },

    /// CPU clock mode changed by the dispatcher
    PowerModeChanged { mode: PowerMode },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::PowerOn => write!(f, "POWER_ON"),
            StateEvent::WakeupEntered => write!(f, "WAKEUP_ENTERED"),
            StateEvent::WakeupRefreshed { timeout_ms } => {
                write!(f, "WAKEUP_REFRESHED ({}ms)", timeout_ms)
            }
            StateEvent::ExitDeferred => write!(f, "EXIT_DEFERRED"),
            StateEvent::WakeupExited => write!(f, "WAKEUP_EXITED"),
            StateEvent::ModelSwitched { group } => write!(f, "MODEL_SWITCHED ({:?})", group),
            StateEvent::CommandRecognized { command_id, score } => {
                write!(f, "COMMAND_RECOGNIZED (id {}, score {})", command_id, score)
            }
            StateEvent::VolumeChanged { volume } => write!(f, "VOLUME_CHANGED ({})", volume),
            StateEvent::PowerModeChanged { mode } => write!(f, "POWER_MODE_CHANGED ({:?})", mode),
        }
    }
}

/// Read-only view of the dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub wakeup: WakeupState,
    pub asr: AsrState,
    pub pending_exit: PendingExit,
    pub mute_depth: u8,
    pub volume: u8,
    pub ignore_exit_wakeup: u16,
    pub ignore_asr_result: u16,
    pub power_mode: PowerMode,
    /// Time left on the exit timer, if armed
    pub exit_timer_ms: Option<u64>,
}

impl Snapshot {
    pub fn capture(
        state: &SystemState,
        power_mode: PowerMode,
        exit_timer_remaining: Option<Duration>,
    ) -> Self {
        Self {
            wakeup: state.wakeup,
            asr: state.asr,
            pending_exit: state.pending_exit,
            mute_depth: state.mute_depth(),
            volume: state.volume.level(),
            ignore_exit_wakeup: state.guard.exit_wakeup.count(),
            ignore_asr_result: state.guard.asr_result.count(),
            power_mode,
            exit_timer_ms: exit_timer_remaining.map(|d| d.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::WakeupRefreshed { timeout_ms: 10_000 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("wakeup_refreshed"));
        assert!(json.contains("10000"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"model_switched","group":"wake_word"}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, StateEvent::ModelSwitched { group: ModelGroup::WakeWord });
    }

    #[test]
    fn test_snapshot_of_initial_state() {
        let snapshot = Snapshot::capture(&SystemState::default(), PowerMode::Normal, None);
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["exit_timer_ms"], serde_json::Value::Null);
        assert_eq!(json["wakeup"], "unwaken");
        assert_eq!(json["asr"], "idle");
        assert_eq!(json["ignore_exit_wakeup"], 0);
    }
}
