//! Ordinary command handling for the lamp
//!
//! Maps a recognised command to the action it requests. Command-id
//! bindings win over semantic ones. Applying the action and choosing the
//! acknowledgment prompt is left to the dispatcher.

use crate::collab::{LightCommand, SemanticFunction};
use crate::state::Volume;

/// Requested volume change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRequest {
    Up,
    Down,
    Max,
    Mid,
    Min,
}

/// What a recognised command asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Light(LightCommand),
    Volume(VolumeRequest),
    /// Turn spoken prompts on or off
    Prompts(bool),
    /// Leave wakeup almost immediately
    QuickExit,
}

impl CommandAction {
    /// Whether the command is acknowledged with its prompt
    pub fn announces(self) -> bool {
        !matches!(self, CommandAction::QuickExit)
    }

    /// Prompt variant to play once the action has been applied
    pub fn prompt_variant(self, volume_after: Volume) -> Option<u8> {
        match self {
            CommandAction::Volume(VolumeRequest::Up) => Some(volume_after.is_max() as u8),
            CommandAction::Volume(VolumeRequest::Down) => Some(volume_after.is_min() as u8),
            _ => None,
        }
    }
}

/// Command table of the lamp product
#[derive(Debug, Clone, Copy, Default)]
pub struct LampCommands;

impl LampCommands {
    pub fn resolve(
        &self,
        command_id: u16,
        semantic: Option<SemanticFunction>,
    ) -> Option<CommandAction> {
        Self::by_command_id(command_id).or_else(|| semantic.map(Self::by_semantic))
    }

    fn by_command_id(command_id: u16) -> Option<CommandAction> {
        let light = match command_id {
            16 => LightCommand::CycleColor,
            17 => LightCommand::ColorWhite,
            18 => LightCommand::ColorCool,
            19 => LightCommand::ColorWarm,
            20 => LightCommand::ModeFlash,
            21 => LightCommand::ModeBreath,
            22 => LightCommand::ModeRainbow,
            _ => return None,
        };
        Some(CommandAction::Light(light))
    }

    fn by_semantic(function: SemanticFunction) -> CommandAction {
        use SemanticFunction::*;

        match function {
            VolumeUp => CommandAction::Volume(VolumeRequest::Up),
            VolumeDown => CommandAction::Volume(VolumeRequest::Down),
            VolumeMax => CommandAction::Volume(VolumeRequest::Max),
            VolumeMid => CommandAction::Volume(VolumeRequest::Mid),
            VolumeMin => CommandAction::Volume(VolumeRequest::Min),
            Unmute | AnnounceOn => CommandAction::Prompts(true),
            Mute | AnnounceOff => CommandAction::Prompts(false),
            ExitRecognition => CommandAction::QuickExit,
            LightOn => CommandAction::Light(LightCommand::PowerOn),
            LightOff => CommandAction::Light(LightCommand::PowerOff),
            BrightnessUp => CommandAction::Light(LightCommand::BrightnessUp),
            BrightnessDown => CommandAction::Light(LightCommand::BrightnessDown),
            BrightnessMax => CommandAction::Light(LightCommand::BrightnessMax),
            BrightnessMid => CommandAction::Light(LightCommand::BrightnessMid),
            BrightnessMin => CommandAction::Light(LightCommand::BrightnessMin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VOLUME_MAX, VOLUME_MIN};

    #[test]
    fn test_command_id_table() {
        let table = LampCommands;
        assert_eq!(
            table.resolve(16, None),
            Some(CommandAction::Light(LightCommand::CycleColor))
        );
        assert_eq!(
            table.resolve(22, None),
            Some(CommandAction::Light(LightCommand::ModeRainbow))
        );
        assert_eq!(table.resolve(99, None), None);
    }

    #[test]
    fn test_command_id_takes_precedence() {
        let action = LampCommands.resolve(17, Some(SemanticFunction::LightOff));
        assert_eq!(action, Some(CommandAction::Light(LightCommand::ColorWhite)));
    }

    #[test]
    fn test_semantic_table() {
        let table = LampCommands;
        assert_eq!(
            table.resolve(3, Some(SemanticFunction::Mute)),
            Some(CommandAction::Prompts(false))
        );
        assert_eq!(
            table.resolve(3, Some(SemanticFunction::BrightnessMid)),
            Some(CommandAction::Light(LightCommand::BrightnessMid))
        );
        assert_eq!(
            table.resolve(3, Some(SemanticFunction::ExitRecognition)),
            Some(CommandAction::QuickExit)
        );
        assert!(!CommandAction::QuickExit.announces());
    }

    #[test]
    fn test_volume_prompt_variant_marks_limits() {
        let up = CommandAction::Volume(VolumeRequest::Up);
        assert_eq!(up.prompt_variant(Volume::clamped(VOLUME_MAX as i32)), Some(1));
        assert_eq!(up.prompt_variant(Volume::clamped(3)), Some(0));

        let down = CommandAction::Volume(VolumeRequest::Down);
        assert_eq!(down.prompt_variant(Volume::clamped(VOLUME_MIN as i32)), Some(1));

        let light = CommandAction::Light(LightCommand::PowerOn);
        assert_eq!(light.prompt_variant(Volume::clamped(3)), None);
    }
}
