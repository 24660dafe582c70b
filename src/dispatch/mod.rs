//! The dispatcher: sole consumer of the mailbox and sole owner of
//! `SystemState`
//!
//! Every producer (recogniser, timers, playback callbacks, other tasks)
//! only posts messages. Anything that spans an asynchronous collaborator
//! call is split in two: a handler that issues the request and returns,
//! and a later message carrying the completion.

mod wakeup;


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::collab::{Collaborators, NvKey, PlayDone, Prompt, PROMPT_WELCOME};
use crate::commands::{CommandAction, LampCommands, VolumeRequest};
use crate::config::{Config, VOLUME_DEFAULT, VOLUME_MAX, VOLUME_MID, VOLUME_MIN};
use crate::events::{Snapshot, StateEvent};
use crate::mailbox::{AsrResult, AsrStatus, Control, Mailbox, MailboxSender, Message};
use crate::power::{PowerCoordinator, PowerMode, VadInterrupt};
use crate::state::{AsrState, CaptureEdge, PendingExit, SuppressionError, SystemState, Volume};
use crate::timer::{SoftTimer, TimerError};

/// Conditions that stop the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invariant violated: {0}")]
    Invariant(#[from] SuppressionError),
}

pub struct Dispatcher {
    config: Config,
    collab: Collaborators,
    commands: LampCommands,
    state: SystemState,
    mailbox: Mailbox,
    sender: MailboxSender,
    exit_timer: SoftTimer,
    power: Arc<PowerCoordinator>,
    /// Clock mode last announced with `PowerModeChanged`
    reported_power: PowerMode,
    events: broadcast::Sender<StateEvent>,
    snapshot: watch::Sender<Snapshot>,
}

impl Dispatcher {
    /// Create the dispatcher and the timers it owns. Fails if a timer
    /// cannot be created, which aborts boot.
    pub fn new(
        config: Config,
        collab: Collaborators,
        sender: MailboxSender,
        mailbox: Mailbox,
        events: broadcast::Sender<StateEvent>,
    ) -> Result<Self, TimerError> {
        let timer_sender = sender.clone();
        let exit_timer = SoftTimer::new(
            "exit_wakeup",
            config.exit_wakeup_timeout,
            Box::new(move || {
                if let Err(e) = timer_sender.post_reliable(Control::ExitWakeupTimerFired) {
                    warn!(error = %e, "exit timer expiry lost");
                }
            }),
        )?;

        let power = Arc::new(PowerCoordinator::new(
            config.low_power,
            config.power_settle,
            Arc::clone(&collab.asr),
            Arc::clone(&collab.capture),
            Arc::clone(&collab.clock),
            collab.capture_device,
            sender.clone(),
        )?);

        let state = SystemState::default();
        let reported_power = power.current_mode();
        let (snapshot, _) = watch::channel(Snapshot::capture(&state, reported_power, None));

        Ok(Self {
            config,
            collab,
            commands: LampCommands,
            state,
            mailbox,
            sender,
            exit_timer,
            power,
            reported_power,
            events,
            snapshot,
        })
    }

    /// Read-only view of the state, updated after every message
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Handle for the VAD-start interrupt
    pub fn vad_interrupt(&self) -> VadInterrupt {
        VadInterrupt::new(Arc::clone(&self.power))
    }

    /// Process messages until an invariant breaks. The dispatcher keeps a
    /// sender of its own for completions and reopens, so the mailbox never
    /// closes underneath it; in practice this only returns an error.
    pub async fn run(&mut self) -> Result<(), DispatchError> {
        info!(wakeup = %self.state.wakeup, "dispatcher started");

        while let Some(msg) = self.mailbox.recv().await {
            if let Err(e) = self.handle(msg) {
                error!(?msg, error = %e, "fatal error, dispatcher halting");
                return Err(e);
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    /// Route one message, then settle any deferred exit
    pub fn handle(&mut self, msg: Message) -> Result<(), DispatchError> {
        trace!(?msg, "dispatch");

        match msg {
            Message::Asr(result) => self.on_asr_result(result)?,
            Message::Control(control) => self.on_control(control)?,
            Message::AudioCaptureStarted => self.on_audio_capture_started()?,
            Message::Key(key) => self.collab.passthrough.on_key(key),
            Message::Raw(frame) => self.collab.passthrough.on_raw(&frame),
        }

        if self.state.pending_exit == PendingExit::WaitingForAsrIdle
            && self.state.asr == AsrState::Idle
        {
            self.state.pending_exit = PendingExit::None;
            self.request_exit(false)?;
        }

        // The VAD interrupt may have changed the clock behind our back.
        self.note_power_mode();
        self.publish_snapshot();
        Ok(())
    }

    fn on_asr_result(&mut self, result: AsrResult) -> Result<(), DispatchError> {
        match result.status {
            AsrStatus::Good => {
                if !self.state.guard.asr_result.is_open() {
                    debug!(
                        pending = self.state.guard.asr_result.count(),
                        "result suppressed after model switch"
                    );
                    return Ok(());
                }
                self.on_recognized(result)?;
            }
            AsrStatus::None | AsrStatus::VadEnd => self.state.asr = AsrState::Idle,
            AsrStatus::VadStart => self.state.asr = AsrState::Busy,
        }
        Ok(())
    }

    fn on_recognized(&mut self, result: AsrResult) -> Result<(), DispatchError> {
        let command = result.command;
        let was_awake = self.state.is_awake();

        // An exit-timer expiry may already be queued behind this result.
        if was_awake {
            self.state.guard.exit_wakeup.hold()?;
        }

        if self.collab.catalog.is_wake_word(command) {
            self.enter_wakeup(self.config.exit_wakeup_timeout, command)?;
        } else if was_awake {
            self.refresh(self.config.exit_wakeup_timeout);
            self.dispatch_command(result)?;
        } else {
            debug!(?command, "command ignored while waiting for wake word");
        }

        if was_awake && self.sender.post_reliable(Control::ReopenExitWakeup).is_err() {
            // No trailing reopen will arrive; close the window now.
            self.state.guard.exit_wakeup.release()?;
        }

        self.emit(StateEvent::CommandRecognized {
            command_id: self.collab.catalog.command_id(command),
            score: result.score,
        });
        Ok(())
    }

    fn dispatch_command(&mut self, result: AsrResult) -> Result<(), DispatchError> {
        let command = result.command;
        let command_id = self.collab.catalog.command_id(command);
        let semantic = self.collab.catalog.semantic(command);
        info!(command_id, ?semantic, score = result.score, "command recognised");

        match self.commands.resolve(command_id, semantic) {
            Some(action) => {
                self.apply_action(action);
                if action.announces() {
                    let variant = action.prompt_variant(self.state.volume);
                    self.announce(Prompt::Command(command), variant)?;
                }
            }
            None => self.announce(Prompt::Command(command), None)?,
        }
        Ok(())
    }

    fn apply_action(&mut self, action: CommandAction) {
        match action {
            CommandAction::Light(light) => {
                if let Err(e) = self.collab.light.control(light) {
                    warn!(?light, error = %e, "light command failed");
                }
            }
            CommandAction::Volume(request) => {
                let current = self.state.volume;
                match request {
                    VolumeRequest::Up => self.apply_volume(current.step_up()),
                    VolumeRequest::Down => self.apply_volume(current.step_down()),
                    VolumeRequest::Max => self.set_volume(VOLUME_MAX as i32),
                    VolumeRequest::Mid => self.set_volume(VOLUME_MID as i32),
                    VolumeRequest::Min => self.set_volume(VOLUME_MIN as i32),
                }
            }
            CommandAction::Prompts(enabled) => {
                if let Err(e) = self.collab.player.set_enabled(enabled) {
                    warn!(enabled, error = %e, "prompt enable failed");
                }
            }
            CommandAction::QuickExit => {
                info!("exit requested by voice");
                self.arm_exit_timer(self.config.quick_exit_timeout);
            }
        }
    }

    /// Set the volume, clamping out-of-range requests
    pub fn set_volume(&mut self, level: i32) {
        self.apply_volume(Volume::clamped(level));
    }

    fn apply_volume(&mut self, volume: Volume) {
        if volume == self.state.volume {
            return;
        }
        self.state.volume = volume;
        if let Err(e) = self.collab.player.set_gain(volume.gain()) {
            warn!(error = %e, "failed to apply playback gain");
        }
        if let Err(e) = self.collab.store.write(NvKey::Volume, volume.level() as u32) {
            warn!(error = %e, "failed to persist volume");
        }
        info!(volume = volume.level(), "volume changed");
        self.emit(StateEvent::VolumeChanged {
            volume: volume.level(),
        });
    }

    fn announce(&mut self, prompt: Prompt, variant: Option<u8>) -> Result<(), DispatchError> {
        if !self.config.announce_commands {
            return Ok(());
        }
        self.hold_capture();
        self.play_then(prompt, variant, Control::PromptDone, true)
    }

    fn on_control(&mut self, control: Control) -> Result<(), DispatchError> {
        match control {
            Control::ExitWakeupTimerFired => {
                if self.state.guard.exit_wakeup.is_open() {
                    self.request_exit(true)?;
                } else {
                    debug!("stale exit timer expiry dropped");
                }
            }
            Control::ReopenExitWakeup => self.state.guard.exit_wakeup.release()?,
            Control::ReopenAsrResult => self.state.guard.asr_result.release()?,
            Control::SwitchToWakeModel => self.on_model_switch_to_wake()?,
            Control::SwitchToNormalModel => self.on_model_switch_to_normal()?,
            Control::PromptDone => self.release_capture(),
            Control::PowerSettleElapsed => self.on_power_settle_elapsed(),
            Control::PowerPromoted => {
                debug!("clock promoted by voice activity");
                self.note_power_mode();
            }
        }
        Ok(())
    }

    fn on_audio_capture_started(&mut self) -> Result<(), DispatchError> {
        let stored = match self.collab.store.read(NvKey::Volume) {
            Ok(raw) => raw.and_then(Volume::from_stored),
            Err(e) => {
                warn!(error = %e, "failed to read stored volume");
                None
            }
        };
        let volume = stored.unwrap_or_else(|| {
            if let Err(e) = self
                .collab
                .store
                .init_default(NvKey::Volume, VOLUME_DEFAULT as u32)
            {
                warn!(error = %e, "failed to store default volume");
            }
            Volume::clamped(VOLUME_DEFAULT as i32)
        });

        self.state.volume = volume;
        if let Err(e) = self.collab.player.set_gain(volume.gain()) {
            warn!(error = %e, "failed to apply playback gain");
        }
        info!(volume = volume.level(), "audio capture started");

        self.hold_capture();
        if self.config.play_welcome {
            self.play_then(
                Prompt::Tag(PROMPT_WELCOME),
                None,
                Control::SwitchToWakeModel,
                true,
            )?;
        } else {
            self.complete(Control::SwitchToWakeModel)?;
        }

        self.emit(StateEvent::PowerOn);
        Ok(())
    }

    fn on_power_settle_elapsed(&mut self) {
        if self.state.is_awake() {
            return;
        }
        if self.power.current_mode() == PowerMode::Normal {
            self.try_reduce_power();
        }
    }

    /// Drop the clock if the device is idle, otherwise retry after the
    /// settle time
    fn try_reduce_power(&mut self) {
        if self.power.policy().target().is_none() {
            return;
        }
        let idle = !self.state.is_awake()
            && self.state.asr == AsrState::Idle
            && !self.collab.asr.is_busy()
            && self.collab.player.is_idle();
        if !idle {
            debug!("device busy, power reduction postponed");
            self.power.arm_settle();
            return;
        }
        match self.power.reduce() {
            Ok(true) => {
                info!(mode = ?self.power.current_mode(), "clock reduced");
                self.note_power_mode();
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "power reduction failed"),
        }
    }

    /// Take a capture hold; the first one mutes input and pauses recognition
    fn hold_capture(&mut self) {
        if self.state.hold_capture() == CaptureEdge::Paused {
            let device = self.collab.capture_device;
            if let Err(e) = self.collab.capture.set_muted(device, true) {
                warn!(error = %e, "failed to mute capture");
            }
            if let Err(e) = self.collab.asr.pause() {
                warn!(error = %e, "failed to pause recognition");
            }
        }
    }

    /// Drop a capture hold; the last one restores input and recognition
    fn release_capture(&mut self) {
        if self.state.release_capture() == CaptureEdge::Resumed {
            let device = self.collab.capture_device;
            if let Err(e) = self.collab.capture.set_muted(device, false) {
                warn!(error = %e, "failed to unmute capture");
            }
            if let Err(e) = self.collab.asr.resume() {
                warn!(error = %e, "failed to resume recognition");
            }
        }
    }

    /// Play a prompt whose completion posts `done`. A prompt that cannot
    /// be played completes immediately.
    fn play_then(
        &mut self,
        prompt: Prompt,
        variant: Option<u8>,
        done: Control,
        mute_while_playing: bool,
    ) -> Result<(), DispatchError> {
        let sender = self.sender.clone();
        let on_done: PlayDone = Box::new(move || {
            if let Err(e) = sender.post_reliable(done) {
                warn!(?done, error = %e, "prompt completion lost");
            }
        });

        match self
            .collab
            .player
            .play(prompt, variant, on_done, mute_while_playing)
        {
            Ok(handle) => {
                debug!(?prompt, ?variant, ?handle, "prompt started");
                Ok(())
            }
            Err(e) => {
                warn!(?prompt, error = %e, "prompt playback failed");
                self.complete(done)
            }
        }
    }

    /// Deliver a completion from the dispatcher itself. If the mailbox
    /// cannot take it the completion is handled in place so no capture
    /// hold or model switch is lost.
    fn complete(&mut self, done: Control) -> Result<(), DispatchError> {
        if self.sender.post_reliable(done).is_err() {
            self.on_control(done)?;
        }
        Ok(())
    }

    fn arm_exit_timer(&mut self, timeout: Duration) {
        self.state.pending_exit = PendingExit::None;
        self.exit_timer.restart(timeout);
    }

    /// Announce the clock mode if it differs from the last one reported
    fn note_power_mode(&mut self) {
        let mode = self.power.current_mode();
        if mode != self.reported_power {
            self.reported_power = mode;
            self.emit(StateEvent::PowerModeChanged { mode });
        }
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting state event");
        let _ = self.events.send(event);
    }

    fn publish_snapshot(&self) {
        self.snapshot
            .send_replace(Snapshot::capture(
                &self.state,
                self.power.current_mode(),
                self.exit_timer.remaining(),
            ));
    }
}
