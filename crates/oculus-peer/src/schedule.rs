//! Injectable timers for retry and settle delays.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// How long to wait before the next reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Fixed(Duration),
    /// Doubles from `base` on every attempt, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(Duration::from_secs(3))
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { base, max } => base
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(max),
        }
    }
}

/// Handle to a pending timer. Cancelling a fired task is a no-op.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    fn new(abort: Option<AbortHandle>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            abort,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub trait Scheduler: Send + Sync + fmt::Debug {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;
}

/// Wall-clock scheduler backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                task();
            }
        });
        ScheduledTask {
            cancelled,
            abort: Some(handle.abort_handle()),
        }
    }
}

struct Pending {
    delay: Duration,
    handle: ScheduledTask,
    task: Task,
}

/// Scheduler that only runs tasks when told to.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<Vec<Pending>>>,
    history: Arc<Mutex<Vec<Duration>>>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled tasks that are neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| !p.handle.is_cancelled())
            .count()
    }

    /// Every delay ever requested, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs the oldest live task. Returns `false` if nothing was pending.
    pub fn fire_next(&self) -> bool {
        let next = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.retain(|p| !p.handle.is_cancelled());
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };
        match next {
            Some(pending) => {
                trace!("firing manual task after {:?}", pending.delay);
                (pending.task)();
                true
            }
            None => false,
        }
    }

    /// Runs every task pending right now. Tasks they schedule stay queued.
    pub fn fire_all(&self) -> usize {
        let drained: Vec<Pending> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.drain(..).collect()
        };
        let mut fired = 0;
        for pending in drained {
            if !pending.handle.is_cancelled() {
                (pending.task)();
                fired += 1;
            }
        }
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let handle = ScheduledTask::new(None);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Pending {
                delay,
                handle: handle.clone(),
                task,
            });
        handle
    }
}
