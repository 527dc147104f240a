use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::poll::cycle::{PollConfig, PollCycle, PollOutcome};
use waybill_common::error::WaybillResult;
use waybill_db::cursor::repositories::CursorRepository;
use waybill_db::shipment::repositories::ShipmentRepository;

/// The unit of work the scheduler drives. Split out so scheduler tests
/// can run against a scripted runner.
#[async_trait]
pub trait PollRunner: Send + Sync {
    async fn run_cycle(&self) -> WaybillResult<PollOutcome>;
}

#[async_trait]
impl<C, R> PollRunner for PollCycle<C, R>
where
    C: CursorRepository,
    R: ShipmentRepository,
{
    async fn run_cycle(&self) -> WaybillResult<PollOutcome> {
        self.run().await
    }
}

/// Object-safe control handle exposed to the HTTP layer.
pub trait PollControl: Send + Sync {
    fn trigger_immediate_poll(&self);
    fn stats(&self) -> SchedulerStats;
    fn is_polling(&self) -> bool;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub records_processed: u64,
    pub records_errored: u64,
    pub triggers_ignored: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<PollOutcome>,
}

struct SchedulerState {
    started: AtomicBool,
    polling: AtomicBool,
    immediate_requested: AtomicBool,
    wake: Notify,
    shutdown: CancellationToken,
    stats: Mutex<SchedulerStats>,
}

/// Drives poll cycles on a fixed interval, never more than one at a
/// time. A trigger while idle wakes the loop right away; a trigger while
/// a cycle runs latches exactly one follow-up cycle, however many
/// triggers arrive. When a cycle reports more pages waiting, the next
/// cycle is scheduled after a short catch-up delay instead of the full
/// interval.
pub struct PollScheduler<P> {
    runner: Arc<P>,
    interval: Duration,
    catchup_delay: Duration,
    state: Arc<SchedulerState>,
}

impl<P: PollRunner + 'static> PollScheduler<P> {
    pub fn new(runner: P, config: &PollConfig) -> Self {
        Self {
            runner: Arc::new(runner),
            interval: config.interval(),
            catchup_delay: config.catchup_delay(),
            state: Arc::new(SchedulerState {
                started: AtomicBool::new(false),
                polling: AtomicBool::new(false),
                immediate_requested: AtomicBool::new(false),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                stats: Mutex::new(SchedulerStats::default()),
            }),
        }
    }

    /// Spawns the scheduling loop. Idempotent: a second call is a no-op
    /// returning `None`.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.state.started.swap(true, Ordering::SeqCst) {
            warn!("poll scheduler already started");
            return None;
        }
        info!(interval_secs = self.interval.as_secs(), "poll scheduler started");
        let runner = self.runner.clone();
        let state = self.state.clone();
        let interval = self.interval;
        let catchup_delay = self.catchup_delay;
        Some(tokio::spawn(run_loop(runner, state, interval, catchup_delay)))
    }

    /// Stops the loop. Idempotent; any pending timer or latched request
    /// dies with the loop.
    pub fn stop(&self) {
        self.state.shutdown.cancel();
        info!("poll scheduler stopped");
    }
}

impl<P: PollRunner + 'static> PollControl for PollScheduler<P> {
    fn trigger_immediate_poll(&self) {
        if self.state.polling.load(Ordering::SeqCst) {
            if self.state.immediate_requested.swap(true, Ordering::SeqCst) {
                // already latched; extra requests collapse into the one
                // pending follow-up cycle
                debug!("immediate poll already latched, ignoring trigger");
                let mut stats = self.state.stats.lock().unwrap();
                stats.triggers_ignored += 1;
            } else {
                info!("cycle in flight, latched immediate poll");
                // The cycle may have ended between the load above and
                // the latch, leaving nothing to consume it until the
                // next interval. Wake the loop if that happened; a
                // leftover permit costs at most one extra cycle.
                if !self.state.polling.load(Ordering::SeqCst) {
                    self.state.wake.notify_one();
                }
            }
        } else {
            self.state.wake.notify_one();
        }
    }

    fn stats(&self) -> SchedulerStats {
        self.state.stats.lock().unwrap().clone()
    }

    fn is_polling(&self) -> bool {
        self.state.polling.load(Ordering::SeqCst)
    }
}

async fn run_loop<P: PollRunner>(
    runner: Arc<P>,
    state: Arc<SchedulerState>,
    interval: Duration,
    catchup_delay: Duration,
) {
    let mut delay = interval;
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = state.wake.notified() => {}
        }

        // Run one cycle, plus exactly one more if a trigger latched while
        // it was in flight.
        let mut next_delay = interval;
        loop {
            state.polling.store(true, Ordering::SeqCst);
            let result = runner.run_cycle().await;
            state.polling.store(false, Ordering::SeqCst);

            match result {
                Ok(outcome) => {
                    next_delay = if outcome.has_more_pages {
                        catchup_delay
                    } else {
                        interval
                    };
                    let mut stats = state.stats.lock().unwrap();
                    stats.cycles_completed += 1;
                    stats.records_processed += outcome.processed as u64;
                    stats.records_errored += outcome.errored as u64;
                    stats.last_cycle_at = Some(Utc::now());
                    stats.last_outcome = Some(outcome);
                }
                Err(e) => {
                    error!(error = %e, "poll cycle failed");
                    next_delay = interval;
                    let mut stats = state.stats.lock().unwrap();
                    stats.cycles_failed += 1;
                    stats.last_cycle_at = Some(Utc::now());
                }
            }

            if state.shutdown.is_cancelled() {
                return;
            }
            if !state.immediate_requested.swap(false, Ordering::SeqCst) {
                break;
            }
            info!("running latched immediate poll");
        }
        delay = next_delay;
    }
}
