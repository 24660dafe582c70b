//! Wakeup state controller
//!
//! Entering and leaving wakeup both start with an acknowledgment prompt.
//! The model-group switch that finishes the transition runs when the
//! prompt's completion message comes back through the mailbox.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{DispatchError, Dispatcher};
use crate::collab::{ModelGroup, Prompt, PROMPT_EXIT_WAKEUP};
use crate::events::StateEvent;
use crate::mailbox::{CommandHandle, Control};
use crate::state::{AsrState, PendingExit, WakeupState};

impl Dispatcher {
    /// Enter wakeup from the wake word, or refresh it when already awake
    pub fn enter_wakeup(
        &mut self,
        timeout: Duration,
        command: CommandHandle,
    ) -> Result<(), DispatchError> {
        let from_unwaken = !self.state.is_awake();

        if from_unwaken {
            match self.power.restore_full_clock() {
                Ok(_) => self.note_power_mode(),
                Err(e) => warn!(error = %e, "failed to restore full clock"),
            }
        }

        self.hold_capture();
        let done = if from_unwaken {
            Control::SwitchToNormalModel
        } else {
            Control::PromptDone
        };
        if self.config.play_enter_wakeup {
            self.play_then(Prompt::Command(command), None, done, true)?;
        } else {
            self.complete(done)?;
        }

        self.state.wakeup = WakeupState::Awake;
        self.arm_exit_timer(timeout);

        if from_unwaken {
            info!(timeout_ms = timeout.as_millis() as u64, "wakeup entered");
            self.emit(StateEvent::WakeupEntered);
        } else {
            debug!(timeout_ms = timeout.as_millis() as u64, "wakeup refreshed");
            self.emit(StateEvent::WakeupRefreshed {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Restart the exit timer at `timeout`; nothing happens while unwaken
    pub fn refresh(&mut self, timeout: Duration) {
        if self.state.is_awake() {
            self.arm_exit_timer(timeout);
        }
    }

    /// Start leaving wakeup. With `check_busy`, an utterance in progress
    /// postpones the exit until the recogniser reports idle.
    pub fn request_exit(&mut self, check_busy: bool) -> Result<(), DispatchError> {
        if !self.state.is_awake() {
            return Ok(());
        }

        if check_busy && self.state.asr == AsrState::Busy {
            info!("recogniser busy, exit deferred");
            self.state.pending_exit = PendingExit::WaitingForAsrIdle;
            self.emit(StateEvent::ExitDeferred);
            return Ok(());
        }

        info!(
            timeout_ms = self.exit_timer.period().as_millis() as u64,
            "leaving wakeup"
        );
        self.hold_capture();
        if self.config.play_exit_wakeup {
            self.play_then(
                Prompt::Tag(PROMPT_EXIT_WAKEUP),
                None,
                Control::SwitchToWakeModel,
                false,
            )
        } else {
            self.complete(Control::SwitchToWakeModel)
        }
    }

    /// Finish leaving wakeup once the exit (or welcome) prompt is done
    pub fn on_model_switch_to_wake(&mut self) -> Result<(), DispatchError> {
        // A newer recognition superseded this exit.
        let proceed = self.state.guard.exit_wakeup.is_open();

        if proceed {
            let was_awake = self.state.is_awake();
            if self.exit_timer.is_armed() {
                self.exit_timer.stop();
            }
            self.state.wakeup = WakeupState::Unwaken;
            self.state.pending_exit = PendingExit::None;
            if was_awake {
                info!("wakeup exited");
                self.emit(StateEvent::WakeupExited);
            }
            if self.config.separate_wake_model {
                self.switch_model(ModelGroup::WakeWord)?;
            }
        } else {
            debug!("stale switch to wake model dropped");
        }

        // Hold taken when the prompt started.
        self.release_capture();

        if proceed {
            self.try_reduce_power();
        }
        Ok(())
    }

    /// Finish entering wakeup once the wake acknowledgment is done
    pub fn on_model_switch_to_normal(&mut self) -> Result<(), DispatchError> {
        if self.config.separate_wake_model {
            self.switch_model(ModelGroup::Commands)?;
        }
        self.release_capture();
        Ok(())
    }

    /// Switch the recogniser's model group with capture paused. The
    /// switch itself produces one spurious result, which is suppressed
    /// until the trailing reopen message.
    fn switch_model(&mut self, group: ModelGroup) -> Result<(), DispatchError> {
        self.state.guard.asr_result.hold()?;
        self.hold_capture();
        let switched = self.collab.asr.switch_model_group(group);
        self.release_capture();

        if let Err(e) = switched {
            warn!(?group, error = %e, "model switch failed");
            self.state.guard.asr_result.release()?;
            return Ok(());
        }
        if self.sender.post_reliable(Control::ReopenAsrResult).is_err() {
            self.state.guard.asr_result.release()?;
        }

        info!(group = group.id(), "model group switched");
        self.emit(StateEvent::ModelSwitched { group });
        Ok(())
    }
}
