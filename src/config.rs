//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::collab::CaptureDevice;
use crate::power::LowPowerMode;

const ENV_PREFIX: &str = "VOICE_LAMP_";

/// Lowest user-selectable volume step
pub const VOLUME_MIN: u8 = 1;
/// "Medium volume" voice command target
pub const VOLUME_MID: u8 = 4;
/// Volume used when nothing valid is stored
pub const VOLUME_DEFAULT: u8 = 5;
/// Highest user-selectable volume step
pub const VOLUME_MAX: u8 = 7;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// How long the device stays awake without a recognised command
    pub exit_wakeup_timeout: Duration,

    /// Timeout armed by the "exit recognition" voice command
    pub quick_exit_timeout: Duration,

    /// Clock reduction applied while waiting for the wake word
    pub low_power: LowPowerMode,

    /// Settle time after a VAD promotion before reduction is retried
    pub power_settle: Duration,

    /// Codec the recogniser listens on
    pub capture_device: CaptureDevice,

    /// Wake word and commands live in separate model groups
    pub separate_wake_model: bool,

    /// Play the welcome prompt once audio capture is up
    pub play_welcome: bool,

    /// Acknowledge the wake word audibly
    pub play_enter_wakeup: bool,

    /// Announce the return to wake-word listening
    pub play_exit_wakeup: bool,

    /// Acknowledge ordinary commands audibly
    pub announce_commands: bool,

    /// Directory for persistent device data
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exit_wakeup_timeout: Duration::from_millis(10_000),
            quick_exit_timeout: Duration::from_millis(100),
            low_power: LowPowerMode::DownFrequency,
            power_settle: Duration::from_millis(15_000),
            capture_device: CaptureDevice::default(),
            separate_wake_model: true,
            play_welcome: true,
            play_enter_wakeup: true,
            play_exit_wakeup: true,
            announce_commands: true,
            data_dir: PathBuf::from(".").join("voice-lamp"),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(home) = lookup("HOME") {
            config.data_dir = PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("voice-lamp");
        }
        if let Some(dir) = var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(ms) = var("EXIT_WAKEUP_MS") {
            config.exit_wakeup_timeout = parse_millis("EXIT_WAKEUP_MS", &ms)?;
        }
        if let Some(ms) = var("QUICK_EXIT_MS") {
            config.quick_exit_timeout = parse_millis("QUICK_EXIT_MS", &ms)?;
        }
        if let Some(ms) = var("POWER_SETTLE_MS") {
            config.power_settle = parse_millis("POWER_SETTLE_MS", &ms)?;
        }
        if let Some(mode) = var("LOW_POWER") {
            config.low_power = LowPowerMode::from_str(&mode)
                .with_context(|| format!("invalid {ENV_PREFIX}LOW_POWER"))?;
        }

        if let Some(device) = var("CAPTURE_DEVICE") {
            config.capture_device = CaptureDevice::from_str(&device)
                .with_context(|| format!("invalid {ENV_PREFIX}CAPTURE_DEVICE"))?;
        }

        let flags: [(&str, &mut bool); 5] = [
            ("SEPARATE_WAKE_MODEL", &mut config.separate_wake_model),
            ("PLAY_WELCOME", &mut config.play_welcome),
            ("PLAY_ENTER_WAKEUP", &mut config.play_enter_wakeup),
            ("PLAY_EXIT_WAKEUP", &mut config.play_exit_wakeup),
            ("ANNOUNCE_COMMANDS", &mut config.announce_commands),
        ];
        for (name, slot) in flags {
            if let Some(value) = var(name) {
                *slot = parse_flag(name, &value)?;
            }
        }

        Ok(config)
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {ENV_PREFIX}{name}: {value:?}"))?;
    if ms == 0 {
        bail!("{ENV_PREFIX}{name} must be greater than zero");
    }
    Ok(Duration::from_millis(ms))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("invalid {ENV_PREFIX}{name}: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/lamp")])).unwrap();
        assert_eq!(config.exit_wakeup_timeout, Duration::from_secs(10));
        assert_eq!(config.low_power, LowPowerMode::DownFrequency);
        assert!(config.separate_wake_model);
        assert_eq!(config.capture_device, CaptureDevice::InnerCodec);
        assert!(config.data_dir.to_string_lossy().contains("voice-lamp"));
        assert!(config.data_dir.starts_with("/home/lamp"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("VOICE_LAMP_EXIT_WAKEUP_MS", "2500"),
            ("VOICE_LAMP_LOW_POWER", "osc"),
            ("VOICE_LAMP_ANNOUNCE_COMMANDS", "off"),
            ("VOICE_LAMP_DATA_DIR", "/tmp/lamp"),
            ("VOICE_LAMP_CAPTURE_DEVICE", "outside"),
        ]))
        .unwrap();
        assert_eq!(config.capture_device, CaptureDevice::OutsideCodec);
        assert_eq!(config.exit_wakeup_timeout, Duration::from_millis(2500));
        assert_eq!(config.low_power, LowPowerMode::OscFrequency);
        assert!(!config.announce_commands);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/lamp"));
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(Config::from_lookup(lookup(&[("VOICE_LAMP_EXIT_WAKEUP_MS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("VOICE_LAMP_EXIT_WAKEUP_MS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("VOICE_LAMP_PLAY_WELCOME", "maybe")])).is_err());
        assert!(Config::from_lookup(lookup(&[("VOICE_LAMP_LOW_POWER", "turbo")])).is_err());
        assert!(Config::from_lookup(lookup(&[("VOICE_LAMP_CAPTURE_DEVICE", "usb")])).is_err());
    }
}
