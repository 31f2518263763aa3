//! Periodic task scheduling on the Tokio runtime.
//!
//! Each bridge task is a synchronous body run on a fixed period.  Bodies do
//! a bounded amount of work per tick, so they run directly on the runtime
//! rather than on blocking threads.  Missed ticks are skipped, not bunched
//! up, so a stalled task never bursts afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndl_core::BridgeQueue;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::application::ports::{StatusIndicator, WaitPolicy};
use crate::application::pump::{Heartbeat, HostDrain, SerialPoller, StatusUpdater};
use crate::application::registry::ChannelRegistry;
use crate::application::signal::SharedMode;

/// Spawns `body` to run every `period`, first after `first_delay`, until
/// `running` clears.
pub fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    first_delay: Duration,
    running: Arc<AtomicBool>,
    mut body: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("task '{name}' started (period {period:?})");
        loop {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            body();
        }
        debug!("task '{name}' stopped");
    })
}

/// Periods and sizes for the bridge tasks.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub serial_poll: Duration,
    pub host_flush: Duration,
    pub flush_batch: usize,
    pub max_payload: usize,
    pub serial_write_wait: Duration,
    pub heartbeat: Duration,
    pub status: Duration,
}

/// Everything the periodic tasks share.
pub struct BridgeTasks {
    pub registry: Arc<ChannelRegistry>,
    pub to_network: Arc<BridgeQueue>,
    pub to_host: Arc<BridgeQueue>,
    pub indicator: Arc<dyn StatusIndicator>,
    pub mode: Arc<SharedMode>,
}

/// Handles of the running periodic tasks.
pub struct TaskSet {
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every task to observe the cleared `running` flag.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("periodic task ended abnormally: {e}");
            }
        }
    }

    /// Waits until `grace` has passed for the tasks to stop, then aborts
    /// the ones still running.  Returns how many were aborted.
    pub async fn stop(self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let mut aborted = 0;
        for mut handle in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("periodic task ended abnormally: {e}"),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            warn!("aborted {aborted} periodic task(s) after {grace:?}");
        }
        aborted
    }
}

impl BridgeTasks {
    /// Starts the serial poll, host flush, heartbeat and status tasks.
    pub fn spawn(self, settings: &TaskSettings, running: &Arc<AtomicBool>) -> TaskSet {
        let mut poller = SerialPoller::new(Arc::clone(&self.registry), Arc::clone(&self.to_network));
        let mut drain = HostDrain::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.to_host),
            settings.max_payload,
            settings.flush_batch,
            WaitPolicy::Bounded(settings.serial_write_wait),
        );
        let heartbeat = Heartbeat::new(Arc::clone(&self.to_host));
        let mut status = StatusUpdater::new(Arc::clone(&self.indicator), Arc::clone(&self.mode));

        let handles = vec![
            spawn_periodic(
                "serial-poll",
                settings.serial_poll,
                Duration::ZERO,
                Arc::clone(running),
                move || {
                    poller.poll_once();
                },
            ),
            spawn_periodic(
                "host-flush",
                settings.host_flush,
                Duration::ZERO,
                Arc::clone(running),
                move || {
                    drain.drain_once();
                },
            ),
            spawn_heartbeat(heartbeat, settings.heartbeat, Arc::clone(running)),
            spawn_periodic(
                "status",
                settings.status,
                Duration::ZERO,
                Arc::clone(running),
                move || {
                    status.sample();
                },
            ),
        ];
        TaskSet { handles }
    }
}

/// Runs `heartbeat` every `interval`, the first beat one interval from now.
pub fn spawn_heartbeat(
    heartbeat: Heartbeat,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    spawn_periodic("heartbeat", interval, interval, running, move || {
        if let Err(e) = heartbeat.beat() {
            warn!("heartbeat dropped: {e}");
        }
    })
}
