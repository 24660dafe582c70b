//! Message records carried by the mailbox
//!
//! Every variant is fixed-size so a full mailbox is a fixed block of
//! memory regardless of what is queued.

use serde::{Deserialize, Serialize};

/// Largest opaque frame forwarded through the mailbox
pub const RAW_FRAME_MAX: usize = 32;

/// Identifies a recognised command inside the ASR engine's catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandHandle(pub u32);

/// Outcome reported by the recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrStatus {
    /// A command was recognised
    Good,
    /// Recognition finished without a result
    None,
    /// Voice activity started; the engine is busy
    VadStart,
    /// Voice activity ended
    VadEnd,
}

/// Result record posted by the recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsrResult {
    pub status: AsrStatus,
    pub command: CommandHandle,
    pub score: i32,
}

impl AsrResult {
    /// A recognised command
    pub fn good(command: CommandHandle, score: i32) -> Self {
        Self {
            status: AsrStatus::Good,
            command,
            score,
        }
    }

    /// A status-only record (no command attached)
    pub fn status(status: AsrStatus) -> Self {
        Self {
            status,
            command: CommandHandle(0),
            score: 0,
        }
    }
}

/// Internal control requests, posted by timers, completion callbacks and
/// the dispatcher itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// The exit-wakeup timer expired
    ExitWakeupTimerFired,
    /// Balances one increment of the exit-wakeup suppression counter
    ReopenExitWakeup,
    /// Balances one increment of the ASR-result suppression counter
    ReopenAsrResult,
    /// Exit acknowledgment finished; switch to the wake-word model
    SwitchToWakeModel,
    /// Wake acknowledgment finished; switch to the command model
    SwitchToNormalModel,
    /// A generic acknowledgment finished playing
    PromptDone,
    /// The power settle timer expired
    PowerSettleElapsed,
    /// Voice activity brought the clock back to full speed
    PowerPromoted,
}

/// Key press forwarded from a button driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: u8,
    pub pressed: bool,
}

/// Opaque host-protocol frame of bounded length
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    len: u8,
    bytes: [u8; RAW_FRAME_MAX],
}

impl RawFrame {
    /// Copy `data` into a frame, rejecting payloads that do not fit
    pub fn new(data: &[u8]) -> Option<Self> {
        if data.len() > RAW_FRAME_MAX {
            return None;
        }
        let mut bytes = [0u8; RAW_FRAME_MAX];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            len: data.len() as u8,
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawFrame({:02x?})", self.as_bytes())
    }
}

/// Everything the dispatcher can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Asr(AsrResult),
    Control(Control),
    AudioCaptureStarted,
    Key(KeyEvent),
    Raw(RawFrame),
}

impl From<Control> for Message {
    fn from(control: Control) -> Self {
        Message::Control(control)
    }
}

impl From<AsrResult> for Message {
    fn from(result: AsrResult) -> Self {
        Message::Asr(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frame_bounds() {
        let frame = RawFrame::new(&[0xa5, 0x01, 0x02]).unwrap();
        assert_eq!(frame.as_bytes(), &[0xa5, 0x01, 0x02]);
        assert!(RawFrame::new(&[0u8; RAW_FRAME_MAX]).is_some());
        assert!(RawFrame::new(&[0u8; RAW_FRAME_MAX + 1]).is_none());
    }

    #[test]
    fn test_message_is_fixed_size() {
        // Queued records must not own heap data.
        fn assert_copy<T: Copy>() {}
        assert_copy::<Message>();
        assert!(std::mem::size_of::<Message>() <= 64);
    }
}
