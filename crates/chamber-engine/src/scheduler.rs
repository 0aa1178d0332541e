//! Process-wide registry of periodic timers keyed by entity.
//!
//! Every open voting session and every open meeting owns one timer. A timer
//! is armed when the entity opens, replaced when it is re-armed (restart
//! recovery or a new runoff stage), and cancelled when the entity closes.
//!
//! Ticks of the same key never overlap: each key has a gate that a tick holds
//! while it runs, and the gate is handed over when a timer is replaced, so a
//! new timer waits for the old timer's in-flight tick to finish.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Identifies the entity a timer belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Expiry check of a proposal's voting session.
    Vote(String),
    /// Status refresh of a meeting's registration window.
    Meeting(String),
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKey::Vote(id) => write!(f, "vote:{}", id),
            TimerKey::Meeting(id) => write!(f, "meeting:{}", id),
        }
    }
}

/// Whether a timer keeps running after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not expired yet; status was re-rendered.
    Refreshed,
    /// Expired; this tick closed or finalized the entity.
    Closed,
    /// The entity was already closed. Nothing to do.
    Stale,
    /// The entity no longer exists.
    Missing,
    /// A storage call failed; the tick will be retried.
    Failed,
}

struct TimerEntry {
    generation: u64,
    token: CancellationToken,
    gate: Arc<AsyncMutex<()>>,
}

struct Inner {
    timers: Mutex<HashMap<TimerKey, TimerEntry>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, HashMap<TimerKey, TimerEntry>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the entry for `key` if it still belongs to `generation`.
    fn release(&self, key: &TimerKey, generation: u64) {
        let mut timers = self.timers();
        if timers.get(key).is_some_and(|e| e.generation == generation) {
            timers.remove(key);
        }
    }
}

/// Cooperative timer registry.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("armed", &self.armed_count())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Arm a periodic timer for `key`, replacing any timer already armed.
    ///
    /// The first tick fires immediately, then every `period`. The timer stops
    /// when `tick` returns [`TickControl::Stop`], when it is cancelled, or
    /// when the scheduler shuts down. Must be called inside a Tokio runtime.
    pub fn arm<F, Fut>(&self, key: TimerKey, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = self.inner.shutdown.child_token();

        let gate = {
            let mut timers = self.inner.timers();
            let gate = match timers.remove(&key) {
                Some(previous) => {
                    previous.token.cancel();
                    debug!(timer = %key, "Replacing armed timer");
                    previous.gate
                }
                None => Arc::new(AsyncMutex::new(())),
            };
            timers.insert(
                key.clone(),
                TimerEntry {
                    generation,
                    token: token.clone(),
                    gate: Arc::clone(&gate),
                },
            );
            gate
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let _running = gate.lock().await;
                if token.is_cancelled() {
                    break;
                }
                if tick().await == TickControl::Stop {
                    break;
                }
            }

            inner.release(&key, generation);
            debug!(timer = %key, "Timer stopped");
        });
    }

    /// Cancel the timer for `key`.
    ///
    /// A tick that is already running finishes; no further tick starts.
    /// Returns false if no live timer was armed.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        match self.inner.timers().get(key) {
            Some(entry) if !entry.token.is_cancelled() => {
                entry.token.cancel();
                debug!(timer = %key, "Timer cancelled");
                true
            }
            _ => false,
        }
    }

    /// Whether a live timer is armed for `key`.
    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.inner
            .timers()
            .get(key)
            .is_some_and(|entry| !entry.token.is_cancelled())
    }

    /// Number of live timers.
    pub fn armed_count(&self) -> usize {
        self.inner
            .timers()
            .values()
            .filter(|entry| !entry.token.is_cancelled())
            .count()
    }

    /// Cancel every timer. Timers armed afterwards stop immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// Consecutive-failure policy shared by the engine's tickers.
///
/// A ticker stops once its entity is closed or gone, and after
/// `max_failures` storage failures in a row.
#[derive(Debug)]
pub(crate) struct FailureBudget {
    max_failures: u32,
    consecutive: AtomicU32,
}

impl FailureBudget {
    pub(crate) fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            consecutive: AtomicU32::new(0),
        }
    }

    pub(crate) fn control(&self, key: &TimerKey, outcome: TickOutcome) -> TickControl {
        match outcome {
            TickOutcome::Refreshed => {
                let previous = self.consecutive.swap(0, Ordering::SeqCst);
                if previous > 0 {
                    debug!(timer = %key, "Tick recovered after {} failures", previous);
                }
                TickControl::Continue
            }
            TickOutcome::Closed | TickOutcome::Stale | TickOutcome::Missing => TickControl::Stop,
            TickOutcome::Failed => {
                let failures = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.max_failures {
                    error!(
                        timer = %key,
                        "Tick failed {} times in a row, cancelling timer", failures
                    );
                    TickControl::Stop
                } else {
                    warn!(timer = %key, "Tick failed (failures: {})", failures);
                    TickControl::Continue
                }
            }
        }
    }
}
