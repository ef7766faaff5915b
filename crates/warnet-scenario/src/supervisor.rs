//! Per-tank worker supervision.
//!
//! A scenario that fans out one worker per tank must survive any single
//! worker dying. The [`Supervisor`] owns the workers, checks them every
//! interval and restarts the dead ones with a bounded backoff until its
//! cancellation token fires.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use warnet_core::TankId;

use crate::handle::LogBuffer;

/// Supervision timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between liveness checks.
    pub interval: Duration,
    /// Delay before a second restart of the same worker.
    pub initial_restart_backoff: Duration,
    /// Upper bound on the restart delay.
    pub max_restart_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_restart_backoff: Duration::from_secs(1),
            max_restart_backoff: Duration::from_secs(300),
        }
    }
}

impl SupervisorConfig {
    /// Sets the check interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Builds the future a worker runs. Called once per start and restart.
pub trait WorkerFactory: Send + Sync + 'static {
    /// The worker body for `tank`. It should return when `cancel` fires.
    fn worker(&self, tank: TankId, cancel: CancellationToken) -> BoxFuture<'static, ()>;
}

impl<F> WorkerFactory for F
where
    F: Fn(TankId, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    fn worker(&self, tank: TankId, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        self(tank, cancel)
    }
}

struct Slot {
    task: JoinHandle<()>,
    started_at: Instant,
    not_before: Instant,
    backoff: Duration,
    restarts: u32,
}

type Slots = Arc<Mutex<BTreeMap<TankId, Slot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, BTreeMap<TankId, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read and kill access to a running supervisor's workers.
#[derive(Clone)]
pub struct SupervisorHandle {
    slots: Slots,
}

impl SupervisorHandle {
    /// Whether the worker for `tank` is running.
    pub fn is_alive(&self, tank: TankId) -> bool {
        lock(&self.slots)
            .get(&tank)
            .is_some_and(|slot| !slot.task.is_finished())
    }

    /// Number of running workers.
    pub fn active_count(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| !slot.task.is_finished())
            .count()
    }

    /// Times the worker for `tank` was restarted.
    pub fn restarts(&self, tank: TankId) -> u32 {
        lock(&self.slots).get(&tank).map_or(0, |slot| slot.restarts)
    }

    /// Aborts the worker for `tank` as if it crashed.
    pub fn kill(&self, tank: TankId) -> bool {
        match lock(&self.slots).get(&tank) {
            Some(slot) => {
                slot.task.abort();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("active", &self.active_count())
            .finish()
    }
}

/// Keeps one worker per tank alive.
pub struct Supervisor {
    config: SupervisorConfig,
    factory: Arc<dyn WorkerFactory>,
    tanks: Vec<TankId>,
    slots: Slots,
    logs: Option<LogBuffer>,
}

impl Supervisor {
    /// Creates a supervisor for `tanks`. Nothing runs until [`Supervisor::run`].
    pub fn new(
        config: SupervisorConfig,
        factory: impl WorkerFactory,
        tanks: impl IntoIterator<Item = TankId>,
    ) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            tanks: tanks.into_iter().collect(),
            slots: Arc::default(),
            logs: None,
        }
    }

    /// Mirrors restart notices into `logs`.
    pub fn with_logs(mut self, logs: LogBuffer) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Handle for observing the workers.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            slots: self.slots.clone(),
        }
    }

    fn start(&self, tank: TankId, cancel: &CancellationToken) -> JoinHandle<()> {
        let worker = self.factory.worker(tank, cancel.child_token());
        tokio::spawn(worker.instrument(tracing::info_span!("worker", tank = tank.0)))
    }

    fn note(&self, line: String) {
        if let Some(logs) = &self.logs {
            logs.push(line);
        }
    }

    /// Starts every worker and supervises them until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let now = Instant::now();
        {
            let mut slots = lock(&self.slots);
            for &tank in &self.tanks {
                let task = self.start(tank, &cancel);
                slots.insert(
                    tank,
                    Slot {
                        task,
                        started_at: now,
                        not_before: now,
                        backoff: self.config.initial_restart_backoff,
                        restarts: 0,
                    },
                );
            }
        }
        info!(workers = self.tanks.len(), "started workers");

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.check(&cancel),
            }
        }

        let slots = std::mem::take(&mut *lock(&self.slots));
        for (tank, slot) in slots {
            slot.task.abort();
            debug!(tank = tank.0, "worker stopped");
        }
        info!("supervisor stopped");
    }

    fn check(&self, cancel: &CancellationToken) {
        let now = Instant::now();
        let mut restarted = Vec::new();
        {
            let mut slots = lock(&self.slots);
            for (&tank, slot) in slots.iter_mut() {
                if !slot.task.is_finished() || now < slot.not_before {
                    continue;
                }
                // A worker that stayed up past the backoff ceiling starts over.
                if now.duration_since(slot.started_at) > self.config.max_restart_backoff {
                    slot.backoff = self.config.initial_restart_backoff;
                }
                slot.task = self.start(tank, cancel);
                slot.started_at = now;
                slot.not_before = now + slot.backoff;
                slot.backoff = (slot.backoff * 2).min(self.config.max_restart_backoff);
                slot.restarts += 1;
                restarted.push((tank, slot.restarts));
            }
        }
        for (tank, restarts) in restarted {
            warn!(tank = tank.0, restarts, "restarting worker for tank {}", tank.0);
            self.note(format!("restarting worker for tank {}", tank.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn forever(_tank: TankId, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        async move { cancel.cancelled().await }.boxed()
    }

    fn tanks(n: u32) -> Vec<TankId> {
        (0..n).map(TankId).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_worker_restarted_within_one_interval() {
        let logs = LogBuffer::default();
        let supervisor = Supervisor::new(SupervisorConfig::default(), forever, tanks(3))
            .with_logs(logs.clone());
        let handle = supervisor.handle();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.active_count(), 3);

        assert!(handle.kill(TankId(2)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_alive(TankId(2)));
        assert!(handle.is_alive(TankId(1)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(handle.is_alive(TankId(2)));
        assert_eq!(handle.restarts(TankId(2)), 1);
        assert_eq!(handle.restarts(TankId(1)), 0);
        assert!(logs.contents().contains("restarting worker for tank 2"));

        cancel.cancel();
        run.await.unwrap();
        assert_eq!(handle.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_backoff_is_bounded() {
        // Workers that die immediately.
        let crashing = |_tank: TankId, _cancel: CancellationToken| async {}.boxed();
        let config = SupervisorConfig {
            interval: Duration::from_secs(1),
            initial_restart_backoff: Duration::from_secs(2),
            max_restart_backoff: Duration::from_secs(4),
        };
        let supervisor = Supervisor::new(config, crashing, tanks(1));
        let handle = supervisor.handle();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(supervisor.run(cancel.clone()));

        // Restarts at 1s, 3s, 7s, 11s, 15s ... once the delay hits its cap.
        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(handle.restarts(TankId(0)), 5);

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_all_workers() {
        let supervisor = Supervisor::new(SupervisorConfig::default(), forever, tanks(2));
        let handle = supervisor.handle();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(supervisor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.active_count(), 2);

        cancel.cancel();
        run.await.unwrap();
        assert!(!handle.is_alive(TankId(0)));
        assert!(!handle.kill(TankId(0)));
    }
}
