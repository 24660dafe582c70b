//! State owned by the dispatcher
//!
//! - `SystemState`: wakeup / ASR / pending-exit state, capture holds, volume
//! - `SuppressionGuard`: the two stale-message counters
//! - `Volume`: clamped playback level

mod guard;
mod machine;
mod volume;

#[cfg(test)]
pub use guard::SuppressionKind;
pub use guard::SuppressionError;
pub use machine::{AsrState, CaptureEdge, PendingExit, SystemState, WakeupState};
pub use volume::Volume;
