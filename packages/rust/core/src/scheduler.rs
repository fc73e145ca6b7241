//! Periodic and manual cycle triggering.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::controller::{PipelineController, StatusSnapshot};
use crate::report::{CycleReport, Trigger};

struct TimerHandle {
    stop_tx: watch::Sender<bool>,
    /// Resolves to the cycles the timer spawned that may still be running.
    task: JoinHandle<JoinSet<()>>,
}

/// Drives a [`PipelineController`] on a fixed interval and on demand.
///
/// Timer ticks never queue: a tick that finds a cycle in flight is skipped.
/// Manual triggers wait for the in-flight cycle, then run their own.
pub struct Scheduler {
    controller: Arc<PipelineController>,
    timer: Mutex<Option<TimerHandle>>,
    /// Timer cycles left over from stopped timers.
    stopped_cycles: Mutex<Vec<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(controller: Arc<PipelineController>) -> Self {
        Self {
            controller,
            timer: Mutex::new(None),
            stopped_cycles: Mutex::new(Vec::new()),
        }
    }

    pub fn controller(&self) -> &Arc<PipelineController> {
        &self.controller
    }

    /// Start the timer. The first cycle begins immediately. Returns `false`
    /// if the timer was already running.
    pub async fn start(&self) -> bool {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            warn!("scheduler already started");
            return false;
        }

        let interval = self.controller.interval();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(tick_loop(Arc::clone(&self.controller), interval, stop_rx));
        *timer = Some(TimerHandle { stop_tx, task });
        self.controller.set_running(true).await;

        info!(interval_secs = interval.as_secs(), "scheduler started");
        true
    }

    /// Stop the timer. A cycle already in flight runs to completion.
    /// Returns `false` if the timer was not running.
    pub async fn stop(&self) -> bool {
        let Some(handle) = self.timer.lock().await.take() else {
            return false;
        };
        let _ = handle.stop_tx.send(true);
        match handle.task.await {
            Ok(cycles) => self.stopped_cycles.lock().await.push(cycles),
            Err(e) => warn!(error = %e, "timer task ended abnormally"),
        }
        self.controller.set_running(false).await;
        info!("scheduler stopped");
        true
    }

    /// Run a cycle now, after any cycle in flight has finished.
    pub async fn trigger_manual(&self) -> CycleReport {
        info!("manual scan triggered");
        self.controller.run_cycle(Trigger::Manual).await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.controller.status().await
    }

    /// Wait until no cycle is in flight. After [`Scheduler::stop`] this
    /// includes timer cycles that were spawned but had not started yet.
    pub async fn wait_idle(&self) {
        let pending = std::mem::take(&mut *self.stopped_cycles.lock().await);
        for mut cycles in pending {
            while let Some(joined) = cycles.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "timer cycle ended abnormally");
                }
            }
        }
        self.controller.wait_idle().await;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Dropping a JoinSet aborts its tasks; cycles must run to completion.
        for cycles in self.stopped_cycles.get_mut().iter_mut() {
            cycles.detach_all();
        }
    }
}

async fn tick_loop(
    controller: Arc<PipelineController>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                while cycles.try_join_next().is_some() {}
                let controller = Arc::clone(&controller);
                cycles.spawn(async move {
                    if controller.try_run_cycle(Trigger::Timer).await.is_none() {
                        warn!("previous cycle still running, skipping tick");
                    }
                });
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    debug!(pending = cycles.len(), "timer loop exiting");
                    break;
                }
            }
        }
    }
    cycles
}
