//! Line-oriented driver for the simulated board
//!
//! Each stdin line becomes one mailbox message, standing in for the
//! recogniser and key matrix on a host build:
//!
//! ```text
//! wake            wake word recognised
//! cmd <handle>    command recognised
//! vad | vadend    utterance started / ended
//! silence         recogniser finished with no result
//! key <code>      key press
//! raw <hex..>     passthrough frame
//! status          log the current snapshot
//! ```

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::collab::SimBoard;
use crate::events::Snapshot;
use crate::mailbox::{
    AsrResult, AsrStatus, CommandHandle, KeyEvent, MailboxSender, Message, RawFrame,
};
use crate::power::VadInterrupt;

const CONSOLE_SCORE: i32 = 100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown input {0:?}")]
    Unknown(String),

    #[error("bad argument for {verb}: {arg:?}")]
    BadArgument { verb: &'static str, arg: String },
}

/// One parsed console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Post(Message),
    Status,
}

/// Parse one console line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<Input>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next().unwrap_or_default();

    let msg = match verb {
        "wake" => AsrResult::good(SimBoard::WAKE_WORD, CONSOLE_SCORE).into(),
        "cmd" => {
            let handle = parse_arg("cmd", arg)?;
            AsrResult::good(CommandHandle(handle), CONSOLE_SCORE).into()
        }
        "vad" => AsrResult::status(AsrStatus::VadStart).into(),
        "vadend" => AsrResult::status(AsrStatus::VadEnd).into(),
        "silence" => AsrResult::status(AsrStatus::None).into(),
        "key" => Message::Key(KeyEvent {
            code: parse_arg("key", arg)?,
            pressed: true,
        }),
        "status" => return Ok(Some(Input::Status)),
        "raw" => {
            let bytes = std::iter::once(arg)
                .chain(words)
                .map(|b| u8::from_str_radix(b, 16))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| bad("raw", line))?;
            Message::Raw(RawFrame::new(&bytes).ok_or_else(|| bad("raw", line))?)
        }
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(Input::Post(msg)))
}

fn parse_arg<T: std::str::FromStr>(verb: &'static str, arg: &str) -> Result<T, ParseError> {
    arg.parse().map_err(|_| bad(verb, arg))
}

fn bad(verb: &'static str, arg: &str) -> ParseError {
    ParseError::BadArgument {
        verb,
        arg: arg.to_string(),
    }
}

/// Feed stdin into the mailbox until EOF. Speech onset also raises the
/// VAD interrupt, as the codec does on the board.
pub async fn run(
    sender: MailboxSender,
    vad: VadInterrupt,
    snapshot: watch::Receiver<Snapshot>,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(Some(Input::Post(msg))) => {
                if matches!(msg, Message::Asr(result) if result.status == AsrStatus::VadStart) {
                    vad.vad_start();
                }
                // A full mailbox is already logged by the sender.
                let _ = sender.post(msg);
            }
            Ok(Some(Input::Status)) => {
                let current = *snapshot.borrow();
                info!(?current, "status");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ignoring console input"),
        }
    }
    info!("console closed");
    Ok(())
}
