//! Playback volume, clamped to the configured range

use crate::config::{VOLUME_MAX, VOLUME_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Volume(u8);

impl Volume {
    /// Clamp any request into `[VOLUME_MIN, VOLUME_MAX]`
    pub fn clamped(level: i32) -> Self {
        Self(level.clamp(VOLUME_MIN as i32, VOLUME_MAX as i32) as u8)
    }

    /// Accept a stored value only if it is in range
    pub fn from_stored(raw: u32) -> Option<Self> {
        u8::try_from(raw)
            .ok()
            .filter(|v| (VOLUME_MIN..=VOLUME_MAX).contains(v))
            .map(Self)
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn step_up(self) -> Self {
        Self::clamped(self.0 as i32 + 1)
    }

    pub fn step_down(self) -> Self {
        Self::clamped(self.0 as i32 - 1)
    }

    pub fn is_max(self) -> bool {
        self.0 == VOLUME_MAX
    }

    pub fn is_min(self) -> bool {
        self.0 == VOLUME_MIN
    }

    /// Player gain for this level
    pub fn gain(self) -> u8 {
        (82 * self.0 as u32 / VOLUME_MAX as u32 + 8) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VOLUME_DEFAULT;

    #[test]
    fn test_clamping() {
        assert_eq!(Volume::clamped(-4).level(), VOLUME_MIN);
        assert_eq!(Volume::clamped(200).level(), VOLUME_MAX);
        assert_eq!(Volume::clamped(VOLUME_DEFAULT as i32).level(), VOLUME_DEFAULT);
    }

    #[test]
    fn test_steps_saturate() {
        let top = Volume::clamped(VOLUME_MAX as i32);
        assert_eq!(top.step_up(), top);
        let bottom = Volume::clamped(VOLUME_MIN as i32);
        assert_eq!(bottom.step_down(), bottom);
    }

    #[test]
    fn test_stored_values_validated() {
        assert_eq!(Volume::from_stored(3).map(Volume::level), Some(3));
        assert_eq!(Volume::from_stored(0), None);
        assert_eq!(Volume::from_stored(VOLUME_MAX as u32 + 1), None);
        assert_eq!(Volume::from_stored(u32::MAX), None);
    }

    #[test]
    fn test_gain_curve() {
        assert_eq!(Volume::clamped(VOLUME_MAX as i32).gain(), 90);
        assert_eq!(Volume::clamped(VOLUME_MIN as i32).gain(), 19);
    }
}
