//! Cross-task signals: the re-provision request, the button debouncer, and
//! the shared connectivity mode.
//!
//! The re-provision signal is the only cancellation mechanism in the
//! runtime.  Loops check it at every iteration boundary and `select!` on
//! [`ReprovisionSignal::fired`] inside their bounded waits.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ndl_core::Mode;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Edge-triggered, idempotent request to return to provisioning.
#[derive(Debug, Default)]
pub struct ReprovisionSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ReprovisionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter.  Firing an already set signal
    /// has no further effect.
    pub fn fire(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("re-provision requested");
        }
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Acknowledges the request.  Called when provisioning starts.
    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Resolves once the flag is set (immediately if it already is).
    pub async fn fired(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// Turns raw falling edges into re-provision requests.
///
/// Edges closer than `window` to the last accepted edge are contact bounce
/// and are ignored.
#[derive(Debug)]
pub struct ButtonDebouncer {
    window: Duration,
    last_accepted: Mutex<Option<Instant>>,
    signal: Arc<ReprovisionSignal>,
}

impl ButtonDebouncer {
    pub fn new(window: Duration, signal: Arc<ReprovisionSignal>) -> Self {
        Self {
            window,
            last_accepted: Mutex::new(None),
            signal,
        }
    }

    pub fn on_edge(&self) -> bool {
        self.on_edge_at(Instant::now())
    }

    /// Handles an edge observed at `now`; returns whether it was accepted.
    pub fn on_edge_at(&self, now: Instant) -> bool {
        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < self.window {
                debug!("button edge ignored (bounce)");
                return false;
            }
        }
        *last = Some(now);
        drop(last);
        self.signal.fire();
        true
    }
}

/// The current [`Mode`], readable from any task.
///
/// Only the control loop writes it.
#[derive(Debug)]
pub struct SharedMode(AtomicU8);

impl Default for SharedMode {
    fn default() -> Self {
        Self(AtomicU8::new(Mode::Init as u8))
    }
}

impl SharedMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Mode {
        Mode::try_from(self.0.load(Ordering::Acquire)).unwrap_or(Mode::Init)
    }

    pub fn set(&self, mode: Mode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}
