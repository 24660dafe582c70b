//! Power mode coordination
//!
//! While waiting for the wake word the CPU clock can be lowered. Two paths
//! change the clock and both must stop and restart audio capture around
//! the switch: the dispatcher (entering/leaving wakeup, settle retries)
//! and the VAD-start interrupt. They share one lock. The interrupt path
//! never waits for it; if the lock is taken it leaves a flag that the
//! holder honours before releasing.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collab::{AsrEngine, AudioCapture, CaptureDevice, ClockControl, CollabResult};
use crate::mailbox::{Control, MailboxSender};
use crate::timer::{SoftTimer, TimerError};

/// Clock mode of the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    /// Full speed
    Normal,
    /// Reduced clock; recognition keeps running
    DownFrequency,
    /// Oscillator clock; only VAD keeps running
    OscFrequency,
}

/// Which reduced mode to use while waiting for the wake word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowPowerMode {
    Off,
    DownFrequency,
    OscFrequency,
}

impl LowPowerMode {
    /// Clock mode to drop to, if any
    pub fn target(self) -> Option<PowerMode> {
        match self {
            LowPowerMode::Off => None,
            LowPowerMode::DownFrequency => Some(PowerMode::DownFrequency),
            LowPowerMode::OscFrequency => Some(PowerMode::OscFrequency),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown low power mode {0:?} (expected off, down or osc)")]
pub struct ParseLowPowerError(String);

impl FromStr for LowPowerMode {
    type Err = ParseLowPowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(LowPowerMode::Off),
            "down" | "down_frequency" => Ok(LowPowerMode::DownFrequency),
            "osc" | "osc_frequency" => Ok(LowPowerMode::OscFrequency),
            other => Err(ParseLowPowerError(other.to_string())),
        }
    }
}

/// Owns clock transitions and the settle timer
pub struct PowerCoordinator {
    policy: LowPowerMode,
    asr: Arc<dyn AsrEngine>,
    capture: Arc<dyn AudioCapture>,
    clock: Arc<dyn ClockControl>,
    device: CaptureDevice,
    lock: Mutex<()>,
    promotion_pending: AtomicBool,
    settle: SoftTimer,
    mailbox: MailboxSender,
}

impl PowerCoordinator {
    pub fn new(
        policy: LowPowerMode,
        settle_time: Duration,
        asr: Arc<dyn AsrEngine>,
        capture: Arc<dyn AudioCapture>,
        clock: Arc<dyn ClockControl>,
        device: CaptureDevice,
        mailbox: MailboxSender,
    ) -> Result<Self, TimerError> {
        let settle_sender = mailbox.clone();
        let settle = SoftTimer::new(
            "exit_down_freq_mode",
            settle_time,
            Box::new(move || {
                if let Err(e) = settle_sender.post_reliable(Control::PowerSettleElapsed) {
                    warn!(error = %e, "power settle expiry lost");
                }
            }),
        )?;

        Ok(Self {
            policy,
            asr,
            capture,
            clock,
            device,
            lock: Mutex::new(()),
            promotion_pending: AtomicBool::new(false),
            settle,
            mailbox,
        })
    }

    pub fn policy(&self) -> LowPowerMode {
        self.policy
    }

    pub fn current_mode(&self) -> PowerMode {
        self.clock.current_mode()
    }

    #[cfg(test)]
    pub fn settle_timer(&self) -> &SoftTimer {
        &self.settle
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop capture, pause recognition, switch clock, undo in reverse
    fn switch_bracketed(&self, mode: PowerMode) -> CollabResult<()> {
        let stopped = self.capture.stop(self.device);
        let paused = self.asr.pause();
        let switched = self.clock.switch_mode(mode);
        let resumed = self.asr.resume();
        let started = self.capture.start(self.device);
        stopped.and(paused).and(switched).and(resumed).and(started)
    }

    /// Return to full speed before capture is reconfigured for wakeup
    pub fn restore_full_clock(&self) -> CollabResult<bool> {
        if self.policy == LowPowerMode::Off {
            return Ok(false);
        }
        let _held = self.lock();
        self.promotion_pending.store(false, Ordering::SeqCst);
        self.settle.stop();
        if self.clock.current_mode() == PowerMode::Normal {
            return Ok(false);
        }
        self.switch_bracketed(PowerMode::Normal)?;
        Ok(true)
    }

    /// Drop to the configured reduced mode; the caller has checked that
    /// the device is idle
    pub fn reduce(&self) -> CollabResult<bool> {
        let Some(target) = self.policy.target() else {
            return Ok(false);
        };
        let _held = self.lock();
        if self.clock.current_mode() == target {
            return Ok(false);
        }
        let result = self.switch_bracketed(target);

        // Voice activity arrived while we held the lock.
        if self.promotion_pending.swap(false, Ordering::SeqCst) {
            self.promote_locked();
        }
        result.map(|()| true)
    }

    /// Re-arm the settle timer for another try
    pub fn arm_settle(&self) {
        self.settle.start();
    }

    /// VAD-start interrupt: get back to full speed so recognition can run.
    /// Bounded and non-blocking.
    pub fn on_vad_start(&self) {
        if self.policy != LowPowerMode::OscFrequency {
            return;
        }
        match self.lock.try_lock() {
            Ok(_held) => self.promote_locked(),
            Err(TryLockError::Poisoned(poisoned)) => {
                let _held = poisoned.into_inner();
                self.promote_locked();
            }
            Err(TryLockError::WouldBlock) => {
                self.promotion_pending.store(true, Ordering::SeqCst);
            }
        }
    }

    fn promote_locked(&self) {
        if self.clock.current_mode() != PowerMode::OscFrequency {
            return;
        }
        // No way to report a failure from interrupt context; the settle
        // retry re-evaluates the clock anyway.
        let _ = self.switch_bracketed(PowerMode::Normal);
        self.settle.start();
        // A lost notice is caught up by the next message the dispatcher handles.
        let _ = self.mailbox.post_from_isr(Control::PowerPromoted);
    }
}

/// Entry point handed to the VAD interrupt
#[derive(Clone)]
pub struct VadInterrupt {
    power: Arc<PowerCoordinator>,
}

impl VadInterrupt {
    pub fn new(power: Arc<PowerCoordinator>) -> Self {
        Self { power }
    }

    pub fn vad_start(&self) {
        self.power.on_vad_start();
    }
}

#[cfg(test)]
mod tests {
    use crate::collab::{Call, PlaybackMode, SimBoard};
    use crate::mailbox::{self, Mailbox, Message};

    use super::*;

    fn coordinator(policy: LowPowerMode) -> (Arc<PowerCoordinator>, Arc<SimBoard>, Mailbox) {
        let board = Arc::new(SimBoard::new(PlaybackMode::Immediate));
        let (tx, rx) = mailbox::channel(mailbox::MAILBOX_CAPACITY);
        let power = PowerCoordinator::new(
            policy,
            Duration::from_secs(15),
            board.clone(),
            board.clone(),
            board.clone(),
            CaptureDevice::InnerCodec,
            tx,
        )
        .unwrap();
        (Arc::new(power), board, rx)
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("osc".parse::<LowPowerMode>().unwrap(), LowPowerMode::OscFrequency);
        assert_eq!("Down".parse::<LowPowerMode>().unwrap(), LowPowerMode::DownFrequency);
        assert_eq!("off".parse::<LowPowerMode>().unwrap(), LowPowerMode::Off);
        assert!("fast".parse::<LowPowerMode>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_brackets_capture() {
        let (power, board, _rx) = coordinator(LowPowerMode::DownFrequency);
        assert!(power.reduce().unwrap());
        assert_eq!(
            board.calls(),
            vec![
                Call::CaptureStop,
                Call::AsrPause,
                Call::Clock(PowerMode::DownFrequency),
                Call::AsrResume,
                Call::CaptureStart,
            ]
        );

        // Already reduced.
        board.clear_calls();
        assert!(!power.reduce().unwrap());
        assert!(board.calls().is_empty());

        assert!(power.restore_full_clock().unwrap());
        assert_eq!(power.current_mode(), PowerMode::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_policy_never_switches() {
        let (power, board, _rx) = coordinator(LowPowerMode::Off);
        assert!(!power.reduce().unwrap());
        assert!(!power.restore_full_clock().unwrap());
        power.on_vad_start();
        assert!(board.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vad_promotes_from_osc_and_arms_settle() {
        let (power, board, mut rx) = coordinator(LowPowerMode::OscFrequency);
        power.reduce().unwrap();
        board.clear_calls();

        VadInterrupt::new(Arc::clone(&power)).vad_start();
        assert_eq!(power.current_mode(), PowerMode::Normal);
        assert!(board.calls().contains(&Call::Clock(PowerMode::Normal)));
        assert_eq!(power.settle_timer().remaining(), Some(Duration::from_secs(15)));

        // The dispatcher hears about the promotion, then the settle expiry.
        assert_eq!(rx.recv().await, Some(Message::Control(Control::PowerPromoted)));
        assert_eq!(rx.recv().await, Some(Message::Control(Control::PowerSettleElapsed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vad_during_transition_is_deferred() {
        let (power, _board, _rx) = coordinator(LowPowerMode::OscFrequency);
        {
            let _held = power.lock();
            power.on_vad_start();
            assert!(power.promotion_pending.load(Ordering::SeqCst));
        }

        // The holder finishing a reduction performs the promotion.
        power.reduce().unwrap();
        assert_eq!(power.current_mode(), PowerMode::Normal);
        assert!(power.settle_timer().is_armed());
        assert!(!power.promotion_pending.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vad_ignored_at_full_speed() {
        let (power, board, _rx) = coordinator(LowPowerMode::OscFrequency);
        power.on_vad_start();
        assert!(board.calls().is_empty());
        assert!(!power.settle_timer().is_armed());
    }
}
