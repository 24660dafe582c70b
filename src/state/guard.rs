//! Suppression counters
//!
//! A counter opens a "don't care" window over a known number of stale
//! messages that may already be queued. Each increment is paired with
//! exactly one trailing reopen message; releasing an empty counter means
//! that pairing was broken and is reported, never clamped.

use serde::Serialize;

/// Which suppression window a counter guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionKind {
    ExitWakeup,
    AsrResult,
}

impl std::fmt::Display for SuppressionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuppressionKind::ExitWakeup => write!(f, "ignore_exit_wakeup"),
            SuppressionKind::AsrResult => write!(f, "ignore_asr_result"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SuppressionError {
    #[error("{0} released below zero")]
    Underflow(SuppressionKind),

    #[error("{0} overflowed")]
    Overflow(SuppressionKind),
}

/// Non-negative counter with checked release
#[derive(Debug, Clone, Copy)]
pub struct SuppressionCounter {
    kind: SuppressionKind,
    count: u16,
}

impl SuppressionCounter {
    pub const fn new(kind: SuppressionKind) -> Self {
        Self { kind, count: 0 }
    }

    pub fn hold(&mut self) -> Result<(), SuppressionError> {
        self.count = self
            .count
            .checked_add(1)
            .ok_or(SuppressionError::Overflow(self.kind))?;
        Ok(())
    }

    pub fn release(&mut self) -> Result<(), SuppressionError> {
        self.count = self
            .count
            .checked_sub(1)
            .ok_or(SuppressionError::Underflow(self.kind))?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> u16 {
        self.count
    }
}

/// The two counters consulted by the dispatcher
#[derive(Debug, Clone, Copy)]
pub struct SuppressionGuard {
    pub exit_wakeup: SuppressionCounter,
    pub asr_result: SuppressionCounter,
}

impl Default for SuppressionGuard {
    fn default() -> Self {
        Self {
            exit_wakeup: SuppressionCounter::new(SuppressionKind::ExitWakeup),
            asr_result: SuppressionCounter::new(SuppressionKind::AsrResult),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_and_release_balance() {
        let mut counter = SuppressionCounter::new(SuppressionKind::ExitWakeup);
        assert!(counter.is_open());

        counter.hold().unwrap();
        counter.hold().unwrap();
        assert_eq!(counter.count(), 2);
        assert!(!counter.is_open());

        counter.release().unwrap();
        counter.release().unwrap();
        assert!(counter.is_open());
    }

    #[test]
    fn test_release_below_zero_is_reported() {
        let mut guard = SuppressionGuard::default();
        assert_eq!(
            guard.asr_result.release(),
            Err(SuppressionError::Underflow(SuppressionKind::AsrResult))
        );
        assert_eq!(guard.asr_result.count(), 0);
        assert_eq!(
            SuppressionError::Underflow(SuppressionKind::ExitWakeup).to_string(),
            "ignore_exit_wakeup released below zero"
        );
    }
}
