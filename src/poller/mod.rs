//! Poll scheduler.
//!
//! The poller owns the time-window bookkeeping. On every tick it acquires a
//! credential, drains `[last_run, now)` with the configured retrieval mode,
//! publishes each record as it arrives and then advances `last_run`.
//!
//! Window advance rules:
//! - credential exchange failed: window unchanged, the next tick retries it;
//! - export mode: window always advances once every category was attempted,
//!   even if some categories failed;
//! - search mode: window advances only if the single search succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::mapping::FlatRecord;
use crate::retrieval::{EventType, RecordSink, RetrievalEngine, RetrievalMode, TimeWindow};
use crate::sink::{EventSink, SinkEvent};

#[cfg(test)]
mod tests;

/// Whether the poller is waiting for a tick or working through one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PollerState {
    #[default]
    Idle,
    Cycle,
}

/// Status information for monitoring.
#[derive(Clone, Debug, Default)]
pub struct PollerStatus {
    pub state: PollerState,
    /// Start of the next window to drain
    pub last_run: Option<DateTime<Utc>>,
    /// When the last cycle finished
    pub last_cycle: Option<DateTime<Utc>>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    pub cycle_count: u64,
    pub error_count: u64,
    /// Events handed to the sink successfully
    pub published: u64,
}

/// Result of one poll cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No credential; nothing drained, window unchanged.
    AuthFailed,
    /// Window advanced. `failed_types` lists export categories whose drain failed.
    Completed {
        published: u64,
        failed_types: Vec<EventType>,
    },
    /// Search drain failed; window unchanged.
    SearchFailed { published: u64 },
}

impl CycleOutcome {
    pub fn published(&self) -> u64 {
        match self {
            CycleOutcome::AuthFailed => 0,
            CycleOutcome::Completed { published, .. } => *published,
            CycleOutcome::SearchFailed { published } => *published,
        }
    }
}

/// Stamps each record and publishes it, counting outcomes.
struct Publisher<'a> {
    sink: &'a dyn EventSink,
    published: u64,
    dropped: u64,
}

impl<'a> Publisher<'a> {
    fn new(sink: &'a dyn EventSink) -> Self {
        Self {
            sink,
            published: 0,
            dropped: 0,
        }
    }
}

#[async_trait]
impl RecordSink for Publisher<'_> {
    async fn accept(&mut self, record: FlatRecord) {
        match self.sink.publish(SinkEvent::stamped(record)).await {
            Ok(()) => self.published += 1,
            Err(e) => {
                self.dropped += 1;
                warn!(error = %e, "Failed to publish event");
            }
        }
    }
}

/// Repeating poll loop for one vendor tenant.
pub struct Poller {
    engine: RetrievalEngine,
    sink: Arc<dyn EventSink>,
    mode: RetrievalMode,
    batch_size: u32,
    period: Duration,
    last_run: DateTime<Utc>,
    status: Arc<Mutex<PollerStatus>>,
}

impl Poller {
    /// Creates a poller whose first window starts `lookback_secs` before `started_at`.
    pub fn new(
        engine: RetrievalEngine,
        sink: Arc<dyn EventSink>,
        config: &PollerConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        let lookback = ChronoDuration::from_std(Duration::from_secs(config.lookback_secs))
            .unwrap_or_else(|_| ChronoDuration::zero());
        let last_run = started_at.checked_sub_signed(lookback).unwrap_or(started_at);
        Self {
            engine,
            sink,
            mode: config.mode,
            batch_size: config.batch_size,
            period: Duration::from_secs(config.period_secs),
            last_run,
            status: Arc::new(Mutex::new(PollerStatus {
                last_run: Some(last_run),
                ..PollerStatus::default()
            })),
        }
    }

    /// Start of the next window to drain.
    pub fn last_run(&self) -> DateTime<Utc> {
        self.last_run
    }

    /// Returns a clone of the status tracker for external monitoring.
    pub fn status(&self) -> Arc<Mutex<PollerStatus>> {
        Arc::clone(&self.status)
    }

    /// Spawns the poll loop. It runs until `shutdown` flips to true or its
    /// sender is dropped.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// The poll loop. The stop signal is checked between ticks, never during
    /// a cycle.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            mode = ?self.mode,
            period_secs = self.period.as_secs(),
            batch_size = self.batch_size,
            last_run = %self.last_run,
            "Starting poller"
        );

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.run_cycle(Utc::now()).await;
        }

        info!(last_run = %self.last_run, "Poller stopped");
    }

    /// Runs one cycle over `[last_run, now)` and updates the status tracker.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        self.status.lock().await.state = PollerState::Cycle;
        info!(last_run = %self.last_run, end = %now, "Starting poll cycle");

        let outcome = self.cycle(now).await;

        let mut status = self.status.lock().await;
        status.state = PollerState::Idle;
        status.last_run = Some(self.last_run);
        status.last_cycle = Some(Utc::now());
        status.cycle_count += 1;
        status.published += outcome.published();
        if matches!(
            &outcome,
            CycleOutcome::Completed { failed_types, .. } if failed_types.is_empty()
        ) {
            status.last_error = None;
        }

        info!(
            last_run = %self.last_run,
            published = outcome.published(),
            "End of poll cycle"
        );
        outcome
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        if let Err(e) = self.engine.authenticate().await {
            error!(error = %e, "Failed to acquire access token, check credentials");
            self.record_error(format!("Credential exchange failed: {}", e)).await;
            return CycleOutcome::AuthFailed;
        }

        let window = TimeWindow::ending_at(self.last_run, now);
        let sink = Arc::clone(&self.sink);
        let mut publisher = Publisher::new(sink.as_ref());

        let outcome = match self.mode {
            RetrievalMode::Export => {
                let mut failed_types = Vec::new();
                for event_type in EventType::CATEGORIES {
                    if let Err(e) = self
                        .engine
                        .drain_export(&window, event_type, self.batch_size, &mut publisher)
                        .await
                    {
                        error!(event_type = %event_type, error = %e, "Export drain failed");
                        self.record_error(format!("Export of {} failed: {}", event_type, e))
                            .await;
                        failed_types.push(event_type);
                    }
                }
                self.last_run = window.end();
                CycleOutcome::Completed {
                    published: publisher.published,
                    failed_types,
                }
            }
            RetrievalMode::Search => {
                match self
                    .engine
                    .drain_search(&window, self.batch_size, &mut publisher)
                    .await
                {
                    Ok(_) => {
                        self.last_run = window.end();
                        CycleOutcome::Completed {
                            published: publisher.published,
                            failed_types: Vec::new(),
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Search drain failed, window kept for next cycle");
                        self.record_error(format!("Search failed: {}", e)).await;
                        CycleOutcome::SearchFailed {
                            published: publisher.published,
                        }
                    }
                }
            }
        };

        if publisher.dropped > 0 {
            warn!(dropped = publisher.dropped, "Some events could not be published");
        }
        debug!(published = publisher.published, "Cycle drained");
        outcome
    }

    async fn record_error(&self, message: String) {
        let mut status = self.status.lock().await;
        status.last_error = Some(message);
        status.error_count += 1;
    }
}
