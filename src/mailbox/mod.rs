//! Bounded FIFO mailbox feeding the dispatcher
//!
//! Many producers (tasks, timer callbacks, interrupt handlers), one
//! consumer. Sends never wait. For external events a full mailbox drops
//! the message, which is equivalent to the event never having happened.
//! Completions and counter reopens go through [`MailboxSender::post_reliable`],
//! which hands a saturated send to a task that waits for a free slot.

mod message;

pub use message::{AsrResult, AsrStatus, CommandHandle, Control, KeyEvent, Message, RawFrame};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Number of message slots
pub const MAILBOX_CAPACITY: usize = 16;

/// Errors returned to producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox is full")]
    Full,

    #[error("mailbox consumer has stopped")]
    Closed,
}

/// How a reliable post was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// In the mailbox now
    Queued,
    /// Mailbox full; a task delivers it once a slot frees up
    Deferred,
}

/// Create a mailbox with `capacity` slots
pub fn channel(capacity: usize) -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (MailboxSender { tx }, Mailbox { rx })
}

/// Producer side; cheap to clone
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Message>,
}

impl MailboxSender {
    /// Post from task context with zero wait; a full mailbox drops the
    /// message and logs it
    pub fn post(&self, msg: impl Into<Message>) -> Result<(), MailboxError> {
        let msg = msg.into();
        self.post_from_isr(msg).map_err(|e| {
            warn!(?msg, error = %e, "mailbox message dropped");
            e
        })
    }

    /// Post from interrupt or timer-service context; never blocks, never
    /// logs, reports saturation to the caller
    pub fn post_from_isr(&self, msg: impl Into<Message>) -> Result<(), MailboxError> {
        self.tx.try_send(msg.into()).map_err(|e| match e {
            TrySendError::Full(_) => MailboxError::Full,
            TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Post a message that must not be lost. Never waits: when the mailbox
    /// is full the send moves to a spawned task and lands behind whatever
    /// is queued. Fails with `Full` only when no runtime is available to
    /// host that task.
    pub fn post_reliable(&self, msg: impl Into<Message>) -> Result<Delivery, MailboxError> {
        let msg = msg.into();
        match self.tx.try_send(msg) {
            Ok(()) => Ok(Delivery::Queued),
            Err(TrySendError::Closed(_)) => Err(MailboxError::Closed),
            Err(TrySendError::Full(msg)) => {
                let runtime = Handle::try_current().map_err(|_| MailboxError::Full)?;
                let tx = self.tx.clone();
                debug!(?msg, "mailbox full, delivery deferred");
                runtime.spawn(async move {
                    if tx.send(msg).await.is_err() {
                        debug!(?msg, "mailbox closed before deferred delivery");
                    }
                });
                Ok(Delivery::Deferred)
            }
        }
    }
}

/// Consumer side, owned by the dispatcher
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Message>,
}

impl Mailbox {
    /// Wait for the next message; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Take the next message if one is queued
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Refuse further posts; queued messages stay readable
    #[cfg(test)]
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_fifo_order() {
        let (tx, mut rx) = channel(MAILBOX_CAPACITY);
        assert_ok!(tx.post(Control::ExitWakeupTimerFired));
        assert_ok!(tx.post_from_isr(Control::ReopenExitWakeup));
        assert_ok!(tx.post(Message::AudioCaptureStarted));

        assert_eq!(rx.try_recv(), Some(Message::Control(Control::ExitWakeupTimerFired)));
        assert_eq!(rx.try_recv(), Some(Message::Control(Control::ReopenExitWakeup)));
        assert_eq!(rx.try_recv(), Some(Message::AudioCaptureStarted));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_full_mailbox_drops() {
        let (tx, mut rx) = channel(MAILBOX_CAPACITY);
        for _ in 0..MAILBOX_CAPACITY {
            assert_ok!(tx.post(Control::PromptDone));
        }
        assert_eq!(assert_err!(tx.post_from_isr(Control::PromptDone)), MailboxError::Full);
        assert_eq!(assert_err!(tx.post(Control::PromptDone)), MailboxError::Full);

        // Draining one slot makes room again.
        assert!(rx.try_recv().is_some());
        assert_ok!(tx.post(Control::PromptDone));
    }

    #[tokio::test]
    async fn test_reliable_post_waits_for_room() {
        let (tx, mut rx) = channel(2);
        assert_eq!(assert_ok!(tx.post_reliable(Control::ReopenExitWakeup)), Delivery::Queued);
        assert_ok!(tx.post(Control::PromptDone));
        assert_eq!(
            assert_ok!(tx.post_reliable(Control::SwitchToNormalModel)),
            Delivery::Deferred
        );

        assert_eq!(rx.recv().await, Some(Message::Control(Control::ReopenExitWakeup)));
        assert_eq!(rx.recv().await, Some(Message::Control(Control::PromptDone)));
        assert_eq!(rx.recv().await, Some(Message::Control(Control::SwitchToNormalModel)));
    }

    #[test]
    fn test_reliable_post_without_runtime() {
        let (tx, _rx) = channel(1);
        assert_ok!(tx.post(Control::PromptDone));
        assert_eq!(assert_err!(tx.post_reliable(Control::PromptDone)), MailboxError::Full);
    }

    #[test]
    fn test_closed_mailbox() {
        let (tx, rx) = channel(4);
        drop(rx);
        assert_eq!(assert_err!(tx.post(Control::PromptDone)), MailboxError::Closed);
        assert_eq!(
            assert_err!(tx.post_reliable(Control::PromptDone)),
            MailboxError::Closed
        );
    }
}
