//! Event scanner
//!
//! Two fixed-rate scans look for transitions that are due and not yet notified:
//! starts in `[now, now + lookahead]` and ends in `[now - lookback, now]`. Each
//! scan groups what it finds by user, dispatches one job per user and then sets
//! the transition marker to the cycle's `now`. Markers are set once the job has
//! been handed over, whatever the subscribers later answer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use eventhook_core::models::{Event, Transition};
use eventhook_core::telemetry::scan_cycle_span;
use eventhook_core::traits::EventStore;
use eventhook_core::{group_by_user, StoreError, TimeSource};

use crate::dispatch::{DispatchError, NotificationJob, NotificationSink};

/// How end markers are committed within one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// One all-or-nothing update after every batch of the cycle was dispatched
    #[default]
    Atomic,
    /// One update per event, right after its batch was dispatched
    PerEvent,
}

impl FromStr for CommitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(Self::Atomic),
            "per_event" | "per-event" => Ok(Self::PerEvent),
            other => Err(format!("expected 'atomic' or 'per_event', got '{}'", other)),
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::PerEvent => write!(f, "per_event"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub start_interval: Duration,
    pub end_interval: Duration,
    /// How far ahead the start scan looks
    pub start_lookahead: chrono::Duration,
    /// How far back the end scan looks
    pub end_lookback: chrono::Duration,
    /// Commit mode of the end scan; the start scan is always atomic
    pub end_commit: CommitMode,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            start_interval: Duration::from_secs(60),
            end_interval: Duration::from_secs(60),
            start_lookahead: chrono::Duration::minutes(5),
            end_lookback: chrono::Duration::minutes(1),
            end_commit: CommitMode::Atomic,
        }
    }
}

impl ScannerConfig {
    pub fn with_intervals(mut self, start: Duration, end: Duration) -> Self {
        self.start_interval = start;
        self.end_interval = end;
        self
    }

    pub fn with_start_lookahead(mut self, lookahead: chrono::Duration) -> Self {
        self.start_lookahead = lookahead;
        self
    }

    pub fn with_end_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.end_lookback = lookback;
        self
    }

    pub fn with_end_commit(mut self, mode: CommitMode) -> Self {
        self.end_commit = mode;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Window bounds fall outside the representable time range
    #[error("cannot compute {transition} window at {now}")]
    Window { transition: Transition, now: DateTime<Tz> },
}

/// Inclusive query window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from: DateTime<Tz>,
    pub to: DateTime<Tz>,
}

/// Summary of one scan cycle
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub cycle_id: Uuid,
    pub transition: Transition,
    /// The cycle's `now`, also the value written to markers
    pub now: DateTime<Tz>,
    pub window: ScanWindow,
    /// Events found by the query
    pub selected: usize,
    /// Jobs dispatched (one per user)
    pub batches: usize,
    /// Markers newly set
    pub marked: u64,
}

pub struct EventScanner {
    events: Arc<dyn EventStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn TimeSource>,
    config: ScannerConfig,
}

impl EventScanner {
    pub fn new(
        events: Arc<dyn EventStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn TimeSource>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            events,
            sink,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Window scanned for `transition` at `now`
    pub fn window(&self, transition: Transition, now: DateTime<Tz>) -> Result<ScanWindow, ScanError> {
        let window = match transition {
            Transition::Start => now
                .checked_add_signed(self.config.start_lookahead)
                .map(|to| ScanWindow { from: now, to }),
            Transition::End => now
                .checked_sub_signed(self.config.end_lookback)
                .map(|from| ScanWindow { from, to: now }),
        };
        window.ok_or(ScanError::Window { transition, now })
    }

    /// Notify events starting within the lookahead
    pub async fn process_starting_events(&self) -> Result<ScanReport, ScanError> {
        self.scan(Transition::Start).await
    }

    /// Notify events that ended within the lookback
    pub async fn process_ending_events(&self) -> Result<ScanReport, ScanError> {
        self.scan(Transition::End).await
    }

    async fn scan(&self, transition: Transition) -> Result<ScanReport, ScanError> {
        let cycle_id = Uuid::now_v7();
        self.scan_cycle(transition, cycle_id)
            .instrument(scan_cycle_span(transition, cycle_id))
            .await
    }

    async fn scan_cycle(&self, transition: Transition, cycle_id: Uuid) -> Result<ScanReport, ScanError> {
        let now = self.clock.now();
        let window = self.window(transition, now)?;
        let zone = self.clock.zone();

        debug!(
            from = %zone.format(&window.from),
            to = %zone.format(&window.to),
            "Scanning for unprocessed events"
        );

        let events = match transition {
            Transition::Start => {
                self.events
                    .find_unprocessed_starting_between(window.from, window.to)
                    .await?
            }
            Transition::End => {
                self.events
                    .find_unprocessed_ending_between(window.from, window.to)
                    .await?
            }
        };

        let mut report = ScanReport {
            cycle_id,
            transition,
            now,
            window,
            selected: events.len(),
            batches: 0,
            marked: 0,
        };

        if events.is_empty() {
            debug!("No events to notify");
            return Ok(report);
        }

        info!(count = events.len(), "Found events to notify");

        let per_event = transition == Transition::End && self.config.end_commit == CommitMode::PerEvent;
        let mut pending: Vec<i64> = Vec::with_capacity(events.len());

        for (user_id, group) in group_by_user(events) {
            let ids: Vec<i64> = group.iter().map(|e| e.id).collect();
            self.dispatch(cycle_id, transition, user_id, group).await?;
            report.batches += 1;

            if per_event {
                for id in ids {
                    report.marked += self.events.mark_notified(transition, &[id], now).await?;
                }
            } else {
                pending.extend(ids);
            }
        }

        if !pending.is_empty() {
            report.marked = self.events.mark_notified(transition, &pending, now).await?;
        }

        info!(
            batches = report.batches,
            marked = report.marked,
            "Scan cycle complete"
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        cycle_id: Uuid,
        transition: Transition,
        user_id: String,
        events: Vec<Event>,
    ) -> Result<(), DispatchError> {
        debug!(%user_id, events = events.len(), "Dispatching batch");
        self.sink
            .dispatch(NotificationJob {
                cycle_id,
                kind: transition.event_type(),
                user_id,
                events,
            })
            .await
    }

    /// Run both scans on their timers until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            start_interval_ms = self.config.start_interval.as_millis() as u64,
            end_interval_ms = self.config.end_interval.as_millis() as u64,
            end_commit = %self.config.end_commit,
            "Starting event scanner"
        );

        let start = tokio::spawn(Arc::clone(&self).scan_loop(
            Transition::Start,
            self.config.start_interval,
            shutdown.clone(),
        ));
        let end = tokio::spawn(Arc::clone(&self).scan_loop(
            Transition::End,
            self.config.end_interval,
            shutdown,
        ));

        let (start, end) = tokio::join!(start, end);
        for result in [start, end] {
            if let Err(e) = result {
                error!(error = %e, "Scan loop panicked");
            }
        }

        info!("Event scanner stopped");
    }

    async fn scan_loop(
        self: Arc<Self>,
        transition: Transition,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(period);
        // A slow cycle delays the next one instead of causing a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan(transition).await {
                        error!(%transition, error = %e, "Scan cycle failed, will retry next cycle");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(%transition, "Scan loop exited");
    }
}
