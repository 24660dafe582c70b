//! Simulated board
//!
//! Implements every collaborator contract in memory and records each call,
//! so the daemon can run on a host and tests can assert on the exact
//! sequence of requests the core issued.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use super::{
    AsrEngine, AudioCapture, CaptureDevice, ClockControl, CollabResult, CollaboratorError,
    CommandCatalog, LightCommand, LightControl, ModelGroup, NvKey, NvStore, Passthrough, PlayDone,
    PlayHandle, Prompt, PromptPlayer, SemanticFunction,
};
use crate::mailbox::{CommandHandle, KeyEvent, RawFrame};
use crate::power::PowerMode;

/// Requests observed by the simulated board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AsrPause,
    AsrResume,
    SwitchModel(ModelGroup),
    Play {
        prompt: Prompt,
        variant: Option<u8>,
        mute: bool,
    },
    SetGain(u8),
    SetPromptsEnabled(bool),
    CaptureStart,
    CaptureStop,
    Mute(bool),
    StoreWrite(NvKey, u32),
    StoreInit(NvKey, u32),
    Light(LightCommand),
    Clock(PowerMode),
    Key(KeyEvent),
    Raw(Vec<u8>),
}

/// How playback completions are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// `on_done` runs inside `play`
    #[cfg(test)]
    Immediate,
    /// `on_done` runs when the test calls [`SimBoard::finish_playback`]
    Manual,
    /// `on_done` runs on a spawned task after the delay
    After(Duration),
}

struct SimState {
    calls: Vec<Call>,
    asr_busy: bool,
    fail_playback: bool,
    pending: VecDeque<PlayDone>,
    next_handle: u32,
    clock: PowerMode,
    store: HashMap<NvKey, u32>,
    wake_words: HashSet<CommandHandle>,
    semantics: HashMap<CommandHandle, SemanticFunction>,
}

pub struct SimBoard {
    playback: PlaybackMode,
    in_flight: Arc<AtomicUsize>,
    state: Mutex<SimState>,
}

impl SimBoard {
    /// Handle the simulated recogniser reports for the wake word
    pub const WAKE_WORD: CommandHandle = CommandHandle(1);

    pub fn new(playback: PlaybackMode) -> Self {
        let semantics = [
            (CommandHandle(2), SemanticFunction::LightOn),
            (CommandHandle(3), SemanticFunction::LightOff),
            (CommandHandle(4), SemanticFunction::VolumeUp),
            (CommandHandle(5), SemanticFunction::VolumeDown),
            (CommandHandle(6), SemanticFunction::ExitRecognition),
        ]
        .into_iter()
        .collect();

        Self {
            playback,
            in_flight: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(SimState {
                calls: Vec::new(),
                asr_busy: false,
                fail_playback: false,
                pending: VecDeque::new(),
                next_handle: 1,
                clock: PowerMode::Normal,
                store: HashMap::new(),
                wake_words: [Self::WAKE_WORD].into_iter().collect(),
                semantics,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: Call) {
        debug!(?call, "sim board");
        self.state().calls.push(call);
    }

    pub fn stored(&self, key: NvKey) -> Option<u32> {
        self.state().store.get(&key).copied()
    }
}

/// Inspection and fault injection for tests
#[cfg(test)]
impl SimBoard {
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn set_asr_busy(&self, busy: bool) {
        self.state().asr_busy = busy;
    }

    /// Make every subsequent `play` fail
    pub fn set_fail_playback(&self, fail: bool) {
        self.state().fail_playback = fail;
    }

    pub fn set_semantic(&self, command: CommandHandle, function: SemanticFunction) {
        self.state().semantics.insert(command, function);
    }

    pub fn pending_playbacks(&self) -> usize {
        self.state().pending.len()
    }

    /// Complete the oldest manual playback; false when none is pending
    pub fn finish_playback(&self) -> bool {
        let done = self.state().pending.pop_front();
        match done {
            Some(on_done) => {
                on_done();
                true
            }
            None => false,
        }
    }
}

impl AsrEngine for SimBoard {
    fn pause(&self) -> CollabResult<()> {
        self.record(Call::AsrPause);
        Ok(())
    }

    fn resume(&self) -> CollabResult<()> {
        self.record(Call::AsrResume);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.state().asr_busy
    }

    fn switch_model_group(&self, group: ModelGroup) -> CollabResult<()> {
        self.record(Call::SwitchModel(group));
        Ok(())
    }
}

impl CommandCatalog for SimBoard {
    fn is_wake_word(&self, command: CommandHandle) -> bool {
        self.state().wake_words.contains(&command)
    }

    fn command_id(&self, command: CommandHandle) -> u16 {
        command.0 as u16
    }

    fn semantic(&self, command: CommandHandle) -> Option<SemanticFunction> {
        self.state().semantics.get(&command).copied()
    }
}

impl PromptPlayer for SimBoard {
    fn play(
        &self,
        prompt: Prompt,
        variant: Option<u8>,
        on_done: PlayDone,
        mute_while_playing: bool,
    ) -> CollabResult<PlayHandle> {
        let handle = {
            let mut state = self.state();
            if state.fail_playback {
                return Err(CollaboratorError::Rejected {
                    subsystem: "player",
                    reason: format!("cannot play {prompt:?}"),
                });
            }
            state.calls.push(Call::Play {
                prompt,
                variant,
                mute: mute_while_playing,
            });
            let handle = PlayHandle(state.next_handle);
            state.next_handle += 1;
            if self.playback == PlaybackMode::Manual {
                state.pending.push_back(on_done);
                return Ok(handle);
            }
            handle
        };

        match self.playback {
            PlaybackMode::After(delay) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let in_flight = Arc::clone(&self.in_flight);
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        on_done();
                    });
                }
                Err(_) => on_done(),
            },
            _ => on_done(),
        }
        Ok(handle)
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && self.state().pending.is_empty()
    }

    fn set_gain(&self, gain: u8) -> CollabResult<()> {
        self.record(Call::SetGain(gain));
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) -> CollabResult<()> {
        self.record(Call::SetPromptsEnabled(enabled));
        Ok(())
    }
}

impl AudioCapture for SimBoard {
    fn start(&self, _device: CaptureDevice) -> CollabResult<()> {
        self.record(Call::CaptureStart);
        Ok(())
    }

    fn stop(&self, _device: CaptureDevice) -> CollabResult<()> {
        self.record(Call::CaptureStop);
        Ok(())
    }

    fn set_muted(&self, _device: CaptureDevice, muted: bool) -> CollabResult<()> {
        self.record(Call::Mute(muted));
        Ok(())
    }
}

impl NvStore for SimBoard {
    fn read(&self, key: NvKey) -> CollabResult<Option<u32>> {
        Ok(self.stored(key))
    }

    fn write(&self, key: NvKey, value: u32) -> CollabResult<()> {
        let mut state = self.state();
        state.store.insert(key, value);
        state.calls.push(Call::StoreWrite(key, value));
        Ok(())
    }

    fn init_default(&self, key: NvKey, value: u32) -> CollabResult<()> {
        let mut state = self.state();
        state.store.entry(key).or_insert(value);
        state.calls.push(Call::StoreInit(key, value));
        Ok(())
    }
}

impl LightControl for SimBoard {
    fn control(&self, command: LightCommand) -> CollabResult<()> {
        info!(?command, "lamp");
        self.record(Call::Light(command));
        Ok(())
    }
}

impl ClockControl for SimBoard {
    fn switch_mode(&self, mode: PowerMode) -> CollabResult<()> {
        let mut state = self.state();
        state.clock = mode;
        state.calls.push(Call::Clock(mode));
        Ok(())
    }

    fn current_mode(&self) -> PowerMode {
        self.state().clock
    }
}

impl Passthrough for SimBoard {
    fn on_key(&self, key: KeyEvent) {
        self.record(Call::Key(key));
    }

    fn on_raw(&self, frame: &RawFrame) {
        self.record(Call::Raw(frame.as_bytes().to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    fn flag() -> (Arc<AtomicBool>, PlayDone) {
        let done = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&done);
        (done, Box::new(move || setter.store(true, Ordering::SeqCst)))
    }

    #[test]
    fn test_manual_playback_completes_on_demand() {
        let board = SimBoard::new(PlaybackMode::Manual);
        let (done, on_done) = flag();

        board.play(Prompt::Tag("<welcome>"), None, on_done, true).unwrap();
        assert!(!board.is_idle());
        assert!(!done.load(Ordering::SeqCst));

        assert!(board.finish_playback());
        assert!(done.load(Ordering::SeqCst));
        assert!(board.is_idle());
        assert!(!board.finish_playback());
    }

    #[test]
    fn test_failed_playback_keeps_callback_unused() {
        let board = SimBoard::new(PlaybackMode::Immediate);
        board.set_fail_playback(true);
        let (done, on_done) = flag();

        assert!(board.play(Prompt::Tag("<welcome>"), None, on_done, true).is_err());
        assert!(!done.load(Ordering::SeqCst));
        assert!(board.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_playback() {
        let board = SimBoard::new(PlaybackMode::After(Duration::from_millis(300)));
        let (done, on_done) = flag();

        board.play(Prompt::Command(SimBoard::WAKE_WORD), Some(0), on_done, true).unwrap();
        assert!(!board.is_idle());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(done.load(Ordering::SeqCst));
        assert!(board.is_idle());
    }

    #[test]
    fn test_store_init_keeps_existing_value() {
        let board = SimBoard::new(PlaybackMode::Immediate);
        board.write(NvKey::Volume, 3).unwrap();
        board.init_default(NvKey::Volume, 5).unwrap();
        assert_eq!(board.read(NvKey::Volume).unwrap(), Some(3));
    }
}
