//! Periodic self-healing task
//!
//! The period lives in a watch channel so `reset` takes effect right away:
//! the next tick fires one full new period after the reset. Resetting to the
//! current period keeps the pending deadline. Each tick runs on
//! the blocking pool since a pass does synchronous file and runtime I/O.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const DEFAULT_MONITORING_INTERVAL: Duration = Duration::from_secs(15);

pub struct WorkloadMonitor {
    period: watch::Sender<Duration>,
    cancel: CancellationToken,
}

impl WorkloadMonitor {
    /// Spawns the task on `handle`
    pub fn spawn<F>(handle: &Handle, period: Duration, tick: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let period = non_zero(period);
        let (period_tx, mut period_rx) = watch::channel(period);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tick = Arc::new(tick);

        info!("workload monitor started (interval: {}s)", period.as_secs());
        handle.spawn(async move {
            let mut interval = new_interval(*period_rx.borrow_and_update());

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = period_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let period = *period_rx.borrow_and_update();
                        debug!("workload monitor interval reset to {}s", period.as_secs());
                        interval = new_interval(period);
                    }
                    _ = interval.tick() => {
                        let tick = tick.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || (*tick)()).await {
                            error!("workload monitor pass panicked: {}", e);
                        }
                    }
                }
            }

            debug!("workload monitor stopped");
        });

        Self {
            period: period_tx,
            cancel,
        }
    }

    /// No-op when `period` is already the current one
    pub fn reset(&self, period: Duration) {
        let period = non_zero(period);
        self.period.send_if_modified(|current| {
            if *current == period {
                return false;
            }
            *current = period;
            true
        });
    }

    pub fn period(&self) -> Duration {
        *self.period.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for WorkloadMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn non_zero(period: Duration) -> Duration {
    if period.is_zero() {
        DEFAULT_MONITORING_INTERVAL
    } else {
        period
    }
}

fn new_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
