//! One-shot software timers
//!
//! Each timer is backed by a single task spawned at creation. Arming and
//! stopping only touch a small locked record and wake that task, so they
//! are safe to call from timer callbacks and interrupt handlers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Callback invoked in the timer-service task on expiry
pub type TimerCallback = Box<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("timer {name:?} needs a running tokio runtime")]
    NoRuntime { name: &'static str },
}

#[derive(Debug)]
struct Schedule {
    period: Duration,
    deadline: Option<Instant>,
}

struct Shared {
    name: &'static str,
    schedule: Mutex<Schedule>,
    wake: Notify,
}

impl Shared {
    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        // A poisoned schedule is still a valid pair of plain values.
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A one-shot timer with a changeable period
pub struct SoftTimer {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl SoftTimer {
    /// Create a stopped timer
    pub fn new(
        name: &'static str,
        period: Duration,
        callback: TimerCallback,
    ) -> Result<Self, TimerError> {
        let runtime = Handle::try_current().map_err(|_| TimerError::NoRuntime { name })?;
        let shared = Arc::new(Shared {
            name,
            schedule: Mutex::new(Schedule {
                period,
                deadline: None,
            }),
            wake: Notify::new(),
        });
        let task = runtime.spawn(run_timer(Arc::clone(&shared), callback));
        Ok(Self { shared, task })
    }

    /// Arm the timer for its current period, replacing any pending expiry
    pub fn start(&self) {
        let mut schedule = self.shared.schedule();
        schedule.deadline = Some(Instant::now() + schedule.period);
        drop(schedule);
        self.shared.wake.notify_one();
    }

    /// Disarm the timer; a no-op when already stopped
    pub fn stop(&self) {
        self.shared.schedule().deadline = None;
        self.shared.wake.notify_one();
    }

    /// Stop, change period, start
    pub fn restart(&self, period: Duration) {
        let mut schedule = self.shared.schedule();
        schedule.period = period;
        schedule.deadline = Some(Instant::now() + period);
        drop(schedule);
        self.shared.wake.notify_one();
    }

    pub fn is_armed(&self) -> bool {
        self.shared.schedule().deadline.is_some()
    }

    pub fn period(&self) -> Duration {
        self.shared.schedule().period
    }

    /// Time left before expiry, if armed
    pub fn remaining(&self) -> Option<Duration> {
        self.shared
            .schedule()
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Drop for SoftTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for SoftTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftTimer")
            .field("name", &self.shared.name)
            .field("schedule", &*self.shared.schedule())
            .finish()
    }
}

async fn run_timer(shared: Arc<Shared>, callback: TimerCallback) {
    loop {
        let deadline = shared.schedule().deadline;
        let Some(deadline) = deadline else {
            shared.wake.notified().await;
            continue;
        };

        tokio::select! {
            _ = sleep_until(deadline) => {
                let fire = {
                    let mut schedule = shared.schedule();
                    // Re-armed while we were waking up: not our expiry.
                    if schedule.deadline == Some(deadline) {
                        schedule.deadline = None;
                        true
                    } else {
                        false
                    }
                };
                if fire {
                    trace!(timer = shared.name, "timer expired");
                    callback();
                }
            }
            _ = shared.wake.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_timer(period: Duration) -> (SoftTimer, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = SoftTimer::new(
            "test",
            period,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        (timer, fired)
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_creation_requires_runtime() {
        let result = SoftTimer::new("orphan", Duration::from_secs(1), Box::new(|| {}));
        assert!(matches!(result, Err(TimerError::NoRuntime { name: "orphan" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_period() {
        let (timer, fired) = counting_timer(Duration::from_secs(10));
        assert!(!timer.is_armed());

        timer.start();
        assert_eq!(timer.remaining(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_deadline() {
        let (timer, fired) = counting_timer(Duration::from_secs(10));
        timer.start();

        tokio::time::advance(Duration::from_secs(8)).await;
        timer.restart(Duration::from_secs(5));
        assert_eq!(timer.period(), Duration::from_secs(5));
        assert_eq!(timer.remaining(), Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_expiry() {
        let (timer, fired) = counting_timer(Duration::from_secs(1));
        timer.start();
        timer.stop();
        assert!(!timer.is_armed());
        assert_eq!(timer.remaining(), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
