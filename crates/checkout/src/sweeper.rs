//! Background reservation-expiry sweep.
//!
//! A dedicated thread wakes every `interval`, asks the target to expire
//! overdue holds, and records what happened. Failures never stop the loop;
//! the affected holds are picked up again on the next tick.

use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use unitcart_catalog::ProductCatalog;
use unitcart_events::{EventBus, EventEnvelope};
use unitcart_infra::EventStore;

use crate::error::CheckoutError;
use crate::gateway::PaymentGateway;
use crate::orchestrator::CheckoutOrchestrator;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: u64,
    pub released: u64,
    pub committed: u64,
    pub failures: u64,
}

/// Anything that can expire overdue reservations.
pub trait ExpirySweep: Send + Sync {
    fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CheckoutError>;
}

impl<C, S, B, G> ExpirySweep for CheckoutOrchestrator<C, S, B, G>
where
    C: ProductCatalog,
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    G: PaymentGateway,
{
    fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CheckoutError> {
        self.expire_reservations(now)
    }
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Thread name, also used in logs.
    pub name: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            name: "reservation-sweeper".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweeperStats {
    pub ticks: u64,
    pub holds_expired: u64,
    pub holds_released: u64,
    pub holds_committed: u64,
    pub failures: u64,
    pub uptime_secs: u64,
}

impl SweeperStats {
    fn record(&mut self, report: SweepReport) {
        self.holds_expired += report.expired;
        self.holds_released += report.released;
        self.holds_committed += report.committed;
        self.failures += report.failures;
    }
}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stop the loop and wait for the thread to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> SweeperStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct ReservationSweeper;

impl ReservationSweeper {
    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn spawn<T>(target: Arc<T>, config: SweeperConfig) -> io::Result<SweeperHandle>
    where
        T: ExpirySweep + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let loop_stats = Arc::clone(&stats);

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || sweeper_loop(target.as_ref(), &config, &shutdown_rx, &loop_stats))?;

        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweeper_loop<T>(
    target: &T,
    config: &SweeperConfig,
    shutdown_rx: &mpsc::Receiver<()>,
    stats: &Mutex<SweeperStats>,
) where
    T: ExpirySweep + ?Sized,
{
    info!(sweeper = %config.name, interval_ms = config.interval.as_millis() as u64, "reservation sweeper started");
    let started = Instant::now();

    loop {
        let outcome = target.sweep(Utc::now());
        if let Ok(mut s) = stats.lock() {
            s.ticks += 1;
            s.uptime_secs = started.elapsed().as_secs();
            match &outcome {
                Ok(report) => s.record(*report),
                Err(_) => s.failures += 1,
            }
        }
        match outcome {
            Ok(report) => debug!(sweeper = %config.name, ?report, "sweep tick"),
            Err(err) => warn!(sweeper = %config.name, error = %err, "sweep failed; retrying next tick"),
        }

        match shutdown_rx.recv_timeout(config.interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(sweeper = %config.name, "reservation sweeper stopped");
}
