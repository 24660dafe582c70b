//! Contracts for the subsystems the core drives but does not own
//!
//! Recognition, playback, capture, storage, lights and clocks are vendor
//! engines or separate drivers. The dispatcher only sees these traits.
//! Every call returns quickly; long-running work completes through a
//! callback that posts a message back to the mailbox.

mod sim;
mod store;

#[cfg(test)]
pub use sim::Call;
pub use sim::{PlaybackMode, SimBoard};
pub use store::JsonFileStore;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mailbox::{CommandHandle, KeyEvent, RawFrame};
use crate::power::PowerMode;

/// Failure reported by a collaborator call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{subsystem} rejected the request: {reason}")]
    Rejected {
        subsystem: &'static str,
        reason: String,
    },
}

pub type CollabResult<T> = Result<T, CollaboratorError>;

/// Active set of recognisable commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelGroup {
    /// Full command vocabulary
    Commands,
    /// Wake word only
    WakeWord,
}

impl ModelGroup {
    /// Index used by the recognition engine
    pub fn id(self) -> u8 {
        match self {
            ModelGroup::Commands => 0,
            ModelGroup::WakeWord => 1,
        }
    }
}

/// Capture device feeding the recogniser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureDevice {
    #[default]
    InnerCodec,
    OutsideCodec,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown capture device {0:?} (expected inner or outside)")]
pub struct ParseCaptureDeviceError(String);

impl std::str::FromStr for CaptureDevice {
    type Err = ParseCaptureDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(CaptureDevice::InnerCodec),
            "outside" => Ok(CaptureDevice::OutsideCodec),
            other => Err(ParseCaptureDeviceError(other.to_string())),
        }
    }
}

/// Speech recognition engine
pub trait AsrEngine: Send + Sync {
    fn pause(&self) -> CollabResult<()>;
    fn resume(&self) -> CollabResult<()>;
    fn is_busy(&self) -> bool;
    fn switch_model_group(&self, group: ModelGroup) -> CollabResult<()>;
}

/// Meaning attached to a command independently of its id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticFunction {
    VolumeUp,
    VolumeDown,
    VolumeMax,
    VolumeMid,
    VolumeMin,
    Unmute,
    Mute,
    AnnounceOn,
    AnnounceOff,
    ExitRecognition,
    LightOn,
    LightOff,
    BrightnessUp,
    BrightnessDown,
    BrightnessMax,
    BrightnessMid,
    BrightnessMin,
}

/// Lookup into the recogniser's command table
pub trait CommandCatalog: Send + Sync {
    fn is_wake_word(&self, command: CommandHandle) -> bool;
    fn command_id(&self, command: CommandHandle) -> u16;
    /// Lamp-product semantic meaning, if the command has one
    fn semantic(&self, command: CommandHandle) -> Option<SemanticFunction>;
}

/// What to play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Prompt attached to a recognised command
    Command(CommandHandle),
    /// Named system prompt such as `<welcome>`
    Tag(&'static str),
}

pub const PROMPT_WELCOME: &str = "<welcome>";
pub const PROMPT_EXIT_WAKEUP: &str = "<inactivate>";

/// Handle returned by a successful `play`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayHandle(pub u32);

/// Invoked exactly once when playback finishes
pub type PlayDone = Box<dyn FnOnce() + Send + 'static>;

/// Prompt playback engine
pub trait PromptPlayer: Send + Sync {
    /// Start playback; `variant` of `None` lets the player choose
    fn play(
        &self,
        prompt: Prompt,
        variant: Option<u8>,
        on_done: PlayDone,
        mute_while_playing: bool,
    ) -> CollabResult<PlayHandle>;
    fn is_idle(&self) -> bool;
    fn set_gain(&self, gain: u8) -> CollabResult<()>;
    fn set_enabled(&self, enabled: bool) -> CollabResult<()>;
}

/// Audio capture front end
pub trait AudioCapture: Send + Sync {
    fn start(&self, device: CaptureDevice) -> CollabResult<()>;
    fn stop(&self, device: CaptureDevice) -> CollabResult<()>;
    /// Mute the recogniser input while keeping the stream running
    fn set_muted(&self, device: CaptureDevice, muted: bool) -> CollabResult<()>;
}

/// Keys in non-volatile storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NvKey {
    Volume,
}

/// Non-volatile key-value store
pub trait NvStore: Send + Sync {
    /// `Ok(None)` when the key was never written
    fn read(&self, key: NvKey) -> CollabResult<Option<u32>>;
    fn write(&self, key: NvKey, value: u32) -> CollabResult<()>;
    fn init_default(&self, key: NvKey, value: u32) -> CollabResult<()>;
}

/// Lamp command vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCommand {
    PowerOn,
    PowerOff,
    BrightnessUp,
    BrightnessDown,
    BrightnessMax,
    BrightnessMid,
    BrightnessMin,
    CycleColor,
    ColorWhite,
    ColorCool,
    ColorWarm,
    ModeFlash,
    ModeBreath,
    ModeRainbow,
}

pub trait LightControl: Send + Sync {
    fn control(&self, command: LightCommand) -> CollabResult<()>;
}

/// CPU clock / power mode switch
pub trait ClockControl: Send + Sync {
    fn switch_mode(&self, mode: PowerMode) -> CollabResult<()>;
    fn current_mode(&self) -> PowerMode;
}

/// Receiver for messages the core forwards untouched
pub trait Passthrough: Send + Sync {
    fn on_key(&self, key: KeyEvent);
    fn on_raw(&self, frame: &RawFrame);
}

/// Everything the dispatcher talks to
#[derive(Clone)]
pub struct Collaborators {
    pub asr: Arc<dyn AsrEngine>,
    pub catalog: Arc<dyn CommandCatalog>,
    pub player: Arc<dyn PromptPlayer>,
    pub capture: Arc<dyn AudioCapture>,
    pub store: Arc<dyn NvStore>,
    pub light: Arc<dyn LightControl>,
    pub clock: Arc<dyn ClockControl>,
    pub passthrough: Arc<dyn Passthrough>,
    pub capture_device: CaptureDevice,
}

impl Collaborators {
    /// Route every contract to the simulated board
    pub fn simulated(board: &Arc<SimBoard>) -> Self {
        Self {
            asr: board.clone(),
            catalog: board.clone(),
            player: board.clone(),
            capture: board.clone(),
            store: board.clone(),
            light: board.clone(),
            clock: board.clone(),
            passthrough: board.clone(),
            capture_device: CaptureDevice::InnerCodec,
        }
    }
}
