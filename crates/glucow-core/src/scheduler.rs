//! Periodic glucose sync.
//!
//! [`SyncScheduler`] owns two background tasks:
//!
//! - **fetch loop**: fetches immediately on start, then sleeps until the next
//!   wall-clock minute boundary and fetches again. An out-of-cycle request
//!   (sent when a sensor's grace period ends) wakes it early. Only this task
//!   calls the source, so fetches never overlap.
//! - **tick loop**: once per second refreshes the countdowns and sensor
//!   expiry text, advances the sensor lifecycle and re-renders the latest
//!   reading when the settings change. It does no I/O.
//!
//! Each fetch runs the full pipeline:
//!
//! ```text
//! credentials -> connection -> sensor lifecycle -> latest measurement
//!   -> trend vs. previous stored reading -> range classification
//!   -> history append -> health export -> notification -> publish
//! ```
//!
//! Fetch failures are logged, counted and published in the snapshot; the
//! history and sinks are left untouched and the next minute retries.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use glucow_core::mock::{MemoryHistory, MockSource, RecordingHealthSink, RecordingNotifier, StaticCredentials};
//! use glucow_core::scheduler::{Collaborators, SyncScheduler, SyncSettings};
//! use glucow_core::clock::SystemClock;
//! use tokio::sync::watch;
//!
//! # async fn example() {
//! let (_settings_tx, settings_rx) = watch::channel(SyncSettings::default());
//! let scheduler = SyncScheduler::new(
//!     Collaborators {
//!         source: Arc::new(MockSource::new()),
//!         history: Arc::new(MemoryHistory::new()),
//!         credentials: Arc::new(StaticCredentials::none()),
//!         health: Arc::new(RecordingHealthSink::new()),
//!         notifier: Arc::new(RecordingNotifier::new()),
//!         clock: Arc::new(SystemClock),
//!     },
//!     settings_rx,
//! );
//!
//! scheduler.start();
//! let mut updates = scheduler.subscribe();
//! updates.changed().await.ok();
//! println!("{:?}", scheduler.snapshot().latest);
//! scheduler.stop();
//! # }
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use glucow_types::{ClinicalBands, DisplayUnit, Reading, SensorState, Trend};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, SyncEvent};
use crate::ranges::{Classification, classify_reading};
use crate::sensor::{SensorLifecycle, SensorPhase, SensorTransition};
use crate::sinks::{HealthSink, NotificationSink, ReadingSink};
use crate::source::{CredentialProvider, Credentials, GlucoseSource};
use crate::trend::{TrendDelta, compute_delta};
use crate::units::{format_delta, format_value, to_display};

const READING_TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour repr:12 padding:none]:[minute]:[second] [period]");

/// User settings a fetch is evaluated with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSettings {
    pub unit: DisplayUnit,
    /// Canonical (mg/dL) bands.
    pub bands: ClinicalBands,
    /// Publish the range message as text.
    pub show_text_reading: bool,
    /// Record new readings with the health sink.
    pub health_export: bool,
    /// Send a notification for every new reading.
    pub notifications: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            unit: DisplayUnit::default(),
            bands: ClinicalBands::default(),
            show_text_reading: true,
            health_export: false,
            notifications: true,
        }
    }
}

/// The latest reading, rendered for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    pub reading: Reading,
    /// Value in the display unit at display precision.
    pub display_value: String,
    pub unit: DisplayUnit,
    pub trend: Trend,
    pub arrow: &'static str,
    pub delta_mgdl: f64,
    /// Signed delta in the display unit.
    pub delta_display: String,
    pub classification: Classification,
    /// Measurement time, e.g. "3:04:05 PM".
    pub reading_time: String,
}

impl LatestReading {
    fn render(reading: Reading, delta: TrendDelta, settings: &SyncSettings) -> Self {
        let unit = settings.unit;
        Self {
            reading,
            display_value: format_value(unit, reading.value_mgdl),
            unit,
            trend: delta.trend,
            arrow: delta.trend.arrow(),
            delta_mgdl: delta.delta_mgdl,
            delta_display: format_delta(unit, delta.delta_mgdl),
            classification: classify_reading(reading.value_mgdl, unit, &settings.bands, delta.trend),
            reading_time: reading
                .timestamp
                .format(READING_TIME_FORMAT)
                .unwrap_or_default(),
        }
    }

    fn delta(&self) -> TrendDelta {
        TrendDelta {
            trend: self.trend,
            delta_mgdl: self.delta_mgdl,
        }
    }
}

/// Display-ready state published after every fetch and tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub running: bool,
    pub patient_name: Option<String>,
    pub latest: Option<LatestReading>,
    /// Range message, when text readings are enabled.
    pub text_reading: Option<String>,
    /// Countdown to the next scheduled fetch, e.g. "42s".
    pub next_update_in: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_fetch_at: Option<OffsetDateTime>,
    pub sensor: SensorState,
    pub sensor_phase: SensorPhase,
    pub sensor_kind: String,
    /// "Xm Ys" while the sensor warms up.
    pub grace_countdown: Option<String>,
    pub expiry_text: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_fetch_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Result of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    /// No credentials stored.
    Skipped,
    /// A new reading was stored.
    Updated,
    /// The source returned a reading already stored.
    Duplicate,
    /// The fetch failed; nothing was stored.
    Failed,
}

/// Injected collaborators.
pub struct Collaborators {
    pub source: Arc<dyn GlucoseSource>,
    pub history: Arc<dyn ReadingSink>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub health: Arc<dyn HealthSink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Periodic fetch scheduler.
pub struct SyncScheduler {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

struct Inner {
    deps: Collaborators,
    settings: watch::Receiver<SyncSettings>,
    lifecycle: Mutex<SensorLifecycle>,
    snapshot: watch::Sender<SyncSnapshot>,
    events: EventDispatcher,
    fetch_now: Notify,
    fetch_lock: tokio::sync::Mutex<()>,
    consecutive_failures: AtomicU32,
}

impl SyncScheduler {
    /// Create a scheduler. Nothing runs until [`start`](Self::start).
    pub fn new(deps: Collaborators, settings: watch::Receiver<SyncSettings>) -> Self {
        let now = deps.clock.now();
        let lifecycle = SensorLifecycle::new();
        let initial = SyncSnapshot {
            sensor_kind: lifecycle.state().kind.to_string(),
            expiry_text: lifecycle.expiry_text(now),
            ..Default::default()
        };
        let (snapshot, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                deps,
                settings,
                lifecycle: Mutex::new(lifecycle),
                snapshot,
                events: EventDispatcher::default(),
                fetch_now: Notify::new(),
                fetch_lock: tokio::sync::Mutex::new(()),
                consecutive_failures: AtomicU32::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    /// Spawn the fetch and tick loops. Returns `false` if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = lock(&self.running);
        if running.is_some() {
            debug!("Scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handles = vec![
            tokio::spawn(fetch_loop(Arc::clone(&self.inner), cancel.clone())),
            tokio::spawn(tick_loop(Arc::clone(&self.inner), cancel.clone())),
        ];
        *running = Some(Running { cancel, handles });

        self.inner.snapshot.send_modify(|s| s.running = true);
        self.inner.events.send(SyncEvent::Started);
        info!("Sync scheduler started");
        true
    }

    /// Cancel both loops. Returns `false` if not running.
    ///
    /// A fetch already in flight is allowed to finish.
    pub fn stop(&self) -> bool {
        let Some(running) = lock(&self.running).take() else {
            return false;
        };
        running.cancel.cancel();
        self.inner.snapshot.send_modify(|s| {
            s.running = false;
            s.next_fetch_at = None;
            s.next_update_in = None;
        });
        self.inner.events.send(SyncEvent::Stopped);
        info!("Sync scheduler stopped");
        true
    }

    /// Stop and wait for both loops to exit.
    pub async fn shutdown(&self) {
        let handles = match lock(&self.running).as_mut() {
            Some(running) => std::mem::take(&mut running.handles),
            None => Vec::new(),
        };
        self.stop();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Whether the loops are running.
    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Run one fetch now, outside the schedule.
    ///
    /// Serialized with the fetch loop.
    pub async fn fetch_once(&self) -> FetchOutcome {
        self.inner.fetch_once().await
    }

    /// Ask the fetch loop to fetch as soon as possible.
    pub fn request_fetch(&self) {
        self.inner.fetch_now.notify_one();
    }

    /// Current published state.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Watch the published state.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Subscribe to sync events.
    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.running).take() {
            running.cancel.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn fetch_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        inner.fetch_once().await;

        let now = inner.deps.clock.now();
        let next = next_minute_boundary(now);
        // `stop` cancels before it clears the schedule, so checking under the
        // watch lock never republishes a cleared schedule.
        let published = inner.snapshot.send_if_modified(|s| {
            if cancel.is_cancelled() {
                return false;
            }
            s.next_fetch_at = Some(next);
            s.next_update_in = Some(format_countdown(next - now));
            true
        });
        if !published {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(until_next_minute(now)) => {}
            _ = inner.fetch_now.notified() => {
                debug!("Out-of-cycle fetch requested");
            }
        }
    }
    debug!("Fetch loop exited");
}

async fn tick_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut settings = inner.settings.clone();
    let mut settings_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => inner.tick(),
            changed = settings.changed(), if settings_open => match changed {
                Ok(()) => {
                    let current = settings.borrow_and_update().clone();
                    inner.apply_settings(&current);
                }
                Err(_) => settings_open = false,
            },
        }
    }
    debug!("Tick loop exited");
}

impl Inner {
    fn tick(&self) {
        let now = self.deps.clock.now();
        let (transition, phase, state, grace, expiry) = {
            let mut lifecycle = lock(&self.lifecycle);
            let transition = lifecycle.advance(now);
            (
                transition,
                lifecycle.phase(),
                lifecycle.state().clone(),
                lifecycle.grace_countdown(now),
                lifecycle.expiry_text(now),
            )
        };

        if let Some(transition) = transition {
            self.emit_transition(transition, phase);
            if transition == SensorTransition::GraceEnded {
                self.fetch_now.notify_one();
            }
        }

        self.snapshot.send_if_modified(|s| {
            let before = s.clone();
            s.next_update_in = s.next_fetch_at.map(|at| format_countdown(at - now));
            s.sensor_kind = state.kind.to_string();
            s.sensor = state;
            s.sensor_phase = phase;
            s.grace_countdown = grace;
            s.expiry_text = expiry;
            *s != before
        });
    }

    fn apply_settings(&self, settings: &SyncSettings) {
        let mut unit_changed = None;
        self.snapshot.send_modify(|s| {
            if let Some(latest) = s.latest.take() {
                if latest.unit != settings.unit {
                    unit_changed = Some(settings.unit);
                }
                let rendered = LatestReading::render(latest.reading, latest.delta(), settings);
                s.text_reading = settings
                    .show_text_reading
                    .then(|| rendered.classification.message.to_string());
                s.latest = Some(rendered);
            }
        });
        if let Some(unit) = unit_changed {
            info!(%unit, "Display unit changed");
            self.events.send(SyncEvent::UnitChanged { unit });
        }
    }

    async fn fetch_once(&self) -> FetchOutcome {
        let _guard = self.fetch_lock.lock().await;

        let Some(credentials) = self.deps.credentials.credentials() else {
            debug!("No credentials stored, skipping fetch");
            self.events.send(SyncEvent::Skipped);
            return FetchOutcome::Skipped;
        };

        match self.fetch(&credentials).await {
            Ok(outcome) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                outcome
            }
            Err(e) => {
                self.record_failure(&e);
                FetchOutcome::Failed
            }
        }
    }

    async fn fetch(&self, credentials: &Credentials) -> Result<FetchOutcome> {
        let settings = self.settings.borrow().clone();
        let connection = self.deps.source.connection(credentials).await?;

        let now = self.deps.clock.now();
        let (transition, phase, state, grace, expiry) = {
            let mut lifecycle = lock(&self.lifecycle);
            let transition = connection
                .sensor
                .as_ref()
                .and_then(|metadata| lifecycle.observe(metadata, now));
            (
                transition,
                lifecycle.phase(),
                lifecycle.state().clone(),
                lifecycle.grace_countdown(now),
                lifecycle.expiry_text(now),
            )
        };
        if let Some(transition) = transition {
            self.emit_transition(transition, phase);
        }
        self.deps
            .credentials
            .cache_sensor_display(state.serial.as_deref(), &expiry);

        let reading = self
            .deps
            .source
            .latest_measurement(credentials, &connection.patient_id)
            .await?;

        let previous = self.deps.history.latest_before(reading.timestamp).await;
        let delta = compute_delta(previous.as_ref(), &reading);
        let latest = LatestReading::render(reading, delta, &settings);
        let appended = self.deps.history.append(reading).await;

        if appended {
            debug!(
                value_mgdl = reading.value_mgdl,
                trend = ?delta.trend,
                "New reading at {}",
                reading.timestamp
            );
            if settings.health_export {
                self.export(&reading).await;
            }
            if settings.notifications {
                self.notify(&latest).await;
            }
            self.events.send(SyncEvent::Reading {
                reading,
                trend: delta.trend,
                delta_mgdl: delta.delta_mgdl,
            });
        } else {
            debug!("Reading at {} already stored", reading.timestamp);
            self.events.send(SyncEvent::Duplicate { reading });
        }

        let patient_name = connection.patient_name();
        self.snapshot.send_modify(|s| {
            s.patient_name = Some(patient_name);
            s.text_reading = settings
                .show_text_reading
                .then(|| latest.classification.message.to_string());
            s.latest = Some(latest);
            s.sensor_kind = state.kind.to_string();
            s.sensor = state;
            s.sensor_phase = phase;
            s.grace_countdown = grace;
            s.expiry_text = expiry;
            s.last_fetch_at = Some(now);
            s.success_count += 1;
        });

        Ok(if appended {
            FetchOutcome::Updated
        } else {
            FetchOutcome::Duplicate
        })
    }

    async fn export(&self, reading: &Reading) {
        if let Err(e) = self
            .deps
            .health
            .record(reading.value_mgdl, reading.timestamp)
            .await
        {
            warn!("Health export failed: {}", e);
        }
    }

    async fn notify(&self, latest: &LatestReading) {
        let title = notification_title(latest.unit, latest.reading.value_mgdl, latest.trend);
        if let Err(e) = self.deps.notifier.notify(&title, &latest.delta_display).await {
            warn!("Notification failed: {}", e);
        }
    }

    fn record_failure(&self, err: &Error) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures <= 3 {
            warn!("Failed to fetch glucose data: {} (attempt {})", err, failures);
        } else if failures == 4 {
            error!(
                "Failed to fetch glucose data after {} attempts, will continue trying silently",
                failures
            );
        }

        let now = self.deps.clock.now();
        let message = err.to_string();
        self.snapshot.send_modify(|s| {
            s.failure_count += 1;
            s.last_error_at = Some(now);
            s.last_error = Some(message.clone());
        });
        self.events.send(SyncEvent::FetchFailed { error: message });
    }

    fn emit_transition(&self, transition: SensorTransition, phase: SensorPhase) {
        self.events.send(SyncEvent::Sensor { transition, phase });
    }
}

/// Notification title, e.g. "7.2 mmol/L ⬆️".
pub fn notification_title(unit: DisplayUnit, value_mgdl: f64, trend: Trend) -> String {
    format!("{:.1} {} {}", to_display(unit, value_mgdl), unit, trend.arrow())
}

/// The first whole minute strictly after `now`.
///
/// ```
/// use glucow_core::scheduler::next_minute_boundary;
/// use time::macros::datetime;
///
/// assert_eq!(
///     next_minute_boundary(datetime!(2025-01-05 10:00:30.5 UTC)),
///     datetime!(2025-01-05 10:01:00 UTC)
/// );
/// assert_eq!(
///     next_minute_boundary(datetime!(2025-01-05 10:01:00 UTC)),
///     datetime!(2025-01-05 10:02:00 UTC)
/// );
/// ```
pub fn next_minute_boundary(now: OffsetDateTime) -> OffsetDateTime {
    let into_minute = time::Duration::seconds(i64::from(now.second()))
        + time::Duration::nanoseconds(i64::from(now.nanosecond()));
    now - into_minute + time::Duration::MINUTE
}

/// Time from `now` to [`next_minute_boundary`].
pub fn until_next_minute(now: OffsetDateTime) -> Duration {
    (next_minute_boundary(now) - now).unsigned_abs()
}

/// Render a countdown as whole seconds ("42s"), "0s" once due.
pub fn format_countdown(remaining: time::Duration) -> String {
    let secs = remaining.whole_seconds();
    if secs <= 0 {
        "0s".to_string()
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::mock::{
        MemoryHistory, MockFailure, MockSource, RecordingHealthSink, RecordingNotifier,
        StaticCredentials,
    };
    use crate::sensor::SensorMetadata;
    use glucow_types::Band;
    use time::macros::datetime;

    const START: OffsetDateTime = datetime!(2025-01-05 10:00:30 UTC);

    struct Harness {
        scheduler: SyncScheduler,
        source: Arc<MockSource>,
        history: Arc<MemoryHistory>,
        credentials: Arc<StaticCredentials>,
        health: Arc<RecordingHealthSink>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<MockClock>,
        settings: watch::Sender<SyncSettings>,
    }

    fn harness(settings: SyncSettings) -> Harness {
        let source = Arc::new(MockSource::new());
        let history = Arc::new(MemoryHistory::new());
        let credentials = Arc::new(StaticCredentials::new(
            Credentials::new("token", "user", "hash").unwrap(),
        ));
        let health = Arc::new(RecordingHealthSink::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(MockClock::new(START));
        let (settings_tx, settings_rx) = watch::channel(settings);

        let scheduler = SyncScheduler::new(
            Collaborators {
                source: source.clone(),
                history: history.clone(),
                credentials: credentials.clone(),
                health: health.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
            },
            settings_rx,
        );

        Harness {
            scheduler,
            source,
            history,
            credentials,
            health,
            notifier,
            clock,
            settings: settings_tx,
        }
    }

    fn mgdl_settings() -> SyncSettings {
        SyncSettings {
            unit: DisplayUnit::MgPerDl,
            health_export: true,
            ..Default::default()
        }
    }

    fn reading(at: OffsetDateTime, value: f64) -> Reading {
        Reading::new(at, value)
    }

    #[tokio::test]
    async fn test_fetch_pipeline_sharp_rise() {
        let h = harness(mgdl_settings());

        h.source.set_reading(reading(datetime!(2025-01-05 10:00:00 UTC), 100.0)).await;
        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Updated);

        h.source.set_reading(reading(datetime!(2025-01-05 10:05:00 UTC), 130.0)).await;
        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Updated);

        let snapshot = h.scheduler.snapshot();
        let latest = snapshot.latest.unwrap();
        assert_eq!(latest.trend, Trend::SharpUp);
        assert_eq!(latest.delta_mgdl, 30.0);
        assert_eq!(latest.display_value, "130");
        assert_eq!(latest.delta_display, "+30.0");
        assert_eq!(latest.reading_time, "10:05:00 AM");
        assert_eq!(latest.classification.band, Some(Band::InRange));
        assert_eq!(snapshot.text_reading.as_deref(), Some("Glucose in range"));
        assert_eq!(snapshot.patient_name.as_deref(), Some("Test Patient"));
        assert_eq!(snapshot.success_count, 2);

        assert_eq!(h.history.readings().await.len(), 2);

        let notifications = h.notifier.notifications().await;
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[1], ("130.0 mg/dL ⬆️".to_string(), "+30.0".to_string()));

        let records = h.health.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], (130.0, datetime!(2025-01-05 10:05:00 UTC)));
    }

    #[tokio::test]
    async fn test_first_reading_has_unknown_trend() {
        let h = harness(SyncSettings::default());
        h.source.set_reading(reading(datetime!(2025-01-05 10:00:00 UTC), 90.0)).await;
        h.scheduler.fetch_once().await;

        let latest = h.scheduler.snapshot().latest.unwrap();
        assert_eq!(latest.trend, Trend::Unknown);
        assert_eq!(latest.display_value, "5.0");
        assert_eq!(latest.unit, DisplayUnit::MmolPerL);

        let notifications = h.notifier.notifications().await;
        assert_eq!(notifications[0].0, "5.0 mmol/L ❓");
    }

    #[tokio::test]
    async fn test_missing_credentials_skips_silently() {
        let h = harness(SyncSettings::default());
        h.credentials.set(None);

        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Skipped);
        assert_eq!(h.source.connection_calls(), 0);
        let snapshot = h.scheduler.snapshot();
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_status_error_leaves_state_untouched() {
        let h = harness(mgdl_settings());
        h.source.set_reading(reading(datetime!(2025-01-05 10:00:00 UTC), 100.0)).await;
        h.scheduler.fetch_once().await;
        let before = h.history.readings().await;

        h.source.set_reading(reading(datetime!(2025-01-05 10:01:00 UTC), 180.0)).await;
        h.source.set_failure(Some(MockFailure::Status(Some(2)))).await;
        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Failed);

        assert_eq!(h.history.readings().await, before);
        assert_eq!(h.notifier.notifications().await.len(), 1);
        assert_eq!(h.health.records().await.len(), 1);

        let snapshot = h.scheduler.snapshot();
        assert_eq!(snapshot.failure_count, 1);
        assert!(snapshot.last_error.unwrap().contains("Some(2)"));
        assert_eq!(snapshot.latest.unwrap().reading.value_mgdl, 100.0);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let h = harness(SyncSettings::default());
        h.source.set_failure(Some(MockFailure::NoConnections)).await;
        for _ in 0..5 {
            assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Failed);
        }
        assert_eq!(h.scheduler.snapshot().failure_count, 5);

        h.source.set_failure(None).await;
        h.source.set_reading(reading(START, 120.0)).await;
        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Updated);
        let snapshot = h.scheduler.snapshot();
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.failure_count, 5);
    }

    #[tokio::test]
    async fn test_refetching_same_measurement_is_duplicate() {
        let h = harness(mgdl_settings());
        h.source.set_reading(reading(datetime!(2025-01-05 10:00:00 UTC), 100.0)).await;
        h.scheduler.fetch_once().await;
        h.source.set_reading(reading(datetime!(2025-01-05 10:05:00 UTC), 130.0)).await;
        h.scheduler.fetch_once().await;

        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Duplicate);
        assert_eq!(h.history.readings().await.len(), 2);
        assert_eq!(h.notifier.notifications().await.len(), 2);

        // Trend is still computed against the older reading.
        let latest = h.scheduler.snapshot().latest.unwrap();
        assert_eq!(latest.trend, Trend::SharpUp);
        assert_eq!(latest.delta_mgdl, 30.0);
    }

    #[tokio::test]
    async fn test_sinks_respect_settings() {
        let h = harness(SyncSettings {
            health_export: false,
            notifications: false,
            show_text_reading: false,
            ..Default::default()
        });
        h.source.set_reading(reading(START, 120.0)).await;
        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Updated);

        assert!(h.health.records().await.is_empty());
        assert!(h.notifier.notifications().await.is_empty());
        assert!(h.scheduler.snapshot().text_reading.is_none());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_abort_fetch() {
        let h = harness(mgdl_settings());
        h.notifier.set_should_fail(true);
        h.health.set_should_fail(true);
        h.source.set_reading(reading(START, 120.0)).await;

        assert_eq!(h.scheduler.fetch_once().await, FetchOutcome::Updated);
        assert_eq!(h.history.readings().await.len(), 1);
        assert_eq!(h.scheduler.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_sensor_metadata_is_published_and_cached() {
        let h = harness(SyncSettings::default());
        h.source
            .set_sensor(Some(SensorMetadata {
                activation_unix: Some(START.unix_timestamp() - 7200),
                serial: Some("0M0001ABCD".to_string()),
                product_code: Some(1),
            }))
            .await;
        h.source.set_reading(reading(START, 120.0)).await;
        h.scheduler.fetch_once().await;

        let snapshot = h.scheduler.snapshot();
        assert_eq!(snapshot.sensor_phase, SensorPhase::Active);
        assert_eq!(snapshot.sensor_kind, "Freestyle Libre 2");
        assert_eq!(snapshot.expiry_text, "13 days, 23 hours");

        let cached = h.credentials.cached_sensor_display().unwrap();
        assert_eq!(cached.0.as_deref(), Some("0M0001ABCD"));
        assert_eq!(cached.1, "13 days, 23 hours");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_align_to_minute_boundaries() {
        let h = harness(SyncSettings::default());
        h.source.set_reading(reading(START, 120.0)).await;

        assert!(h.scheduler.start());
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(h.source.connection_calls(), 1);

        let snapshot = h.scheduler.snapshot();
        assert_eq!(snapshot.next_fetch_at, Some(datetime!(2025-01-05 10:01:00 UTC)));
        assert_eq!(snapshot.next_update_in.as_deref(), Some("25s"));

        // 10:01:00
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.source.connection_calls(), 2);

        // 10:02:00
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.source.connection_calls(), 3);
        assert_eq!(h.clock.now(), datetime!(2025-01-05 10:02:00.5 UTC));

        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_end_triggers_out_of_cycle_fetch() {
        let h = harness(SyncSettings::default());
        // Grace period ends 10 seconds after START.
        h.source
            .set_sensor(Some(SensorMetadata {
                activation_unix: Some(START.unix_timestamp() - 3590),
                serial: None,
                product_code: Some(4),
            }))
            .await;
        h.source.set_reading(reading(START, 120.0)).await;
        let mut events = h.scheduler.events();

        h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.scheduler.snapshot().sensor_phase, SensorPhase::GracePeriod);
        assert_eq!(h.scheduler.snapshot().grace_countdown.as_deref(), Some("0m 10s"));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.source.connection_calls(), 2);
        assert_eq!(h.scheduler.snapshot().sensor_phase, SensorPhase::Active);
        assert!(h.scheduler.snapshot().grace_countdown.is_none());

        let mut grace_ended = 0;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::Sensor {
                transition: SensorTransition::GraceEnded,
                ..
            } = event
            {
                grace_ended += 1;
            }
        }
        assert_eq!(grace_ended, 1);

        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_are_idempotent() {
        let h = harness(SyncSettings::default());
        h.source.set_reading(reading(START, 120.0)).await;

        assert!(h.scheduler.start());
        assert!(!h.scheduler.start());
        assert!(h.scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.scheduler.stop());
        assert!(!h.scheduler.stop());
        assert!(!h.scheduler.snapshot().running);

        let calls = h.source.connection_calls();
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(h.source.connection_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_fetch_keeps_schedule_cleared() {
        let h = harness(SyncSettings::default());
        h.source.set_reading(reading(START, 120.0)).await;
        h.source.set_latency(Duration::from_secs(2));

        h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.source.connection_calls(), 1);
        assert!(h.scheduler.stop());

        // Let the in-flight fetch finish and a few ticks elapse.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = h.scheduler.snapshot();
        assert!(!snapshot.running);
        assert!(snapshot.next_fetch_at.is_none());
        assert!(snapshot.next_update_in.is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.source.connection_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_fetch_runs_out_of_cycle() {
        let h = harness(SyncSettings::default());
        h.source.set_reading(reading(START, 120.0)).await;

        h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.source.connection_calls(), 1);

        h.scheduler.request_fetch();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.source.connection_calls(), 2);

        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_change_rerenders_latest() {
        let h = harness(mgdl_settings());
        h.source.set_reading(reading(START, 90.0)).await;
        let mut events = h.scheduler.events();

        h.scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.scheduler.snapshot().latest.unwrap().display_value, "90");

        h.settings.send_modify(|s| s.unit = DisplayUnit::MmolPerL);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let latest = h.scheduler.snapshot().latest.unwrap();
        assert_eq!(latest.display_value, "5.0");
        assert_eq!(latest.unit, DisplayUnit::MmolPerL);
        // Stored values never change with the display unit.
        assert_eq!(h.history.readings().await[0].value_mgdl, 90.0);

        let mut saw_unit_change = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SyncEvent::UnitChanged { unit: DisplayUnit::MmolPerL }) {
                saw_unit_change = true;
            }
        }
        assert!(saw_unit_change);

        h.scheduler.shutdown().await;
    }

    #[test]
    fn test_minute_helpers() {
        assert_eq!(
            until_next_minute(datetime!(2025-01-05 10:00:30 UTC)),
            Duration::from_secs(30)
        );
        assert_eq!(
            until_next_minute(datetime!(2025-01-05 10:00:59.75 UTC)),
            Duration::from_millis(250)
        );
        assert_eq!(
            next_minute_boundary(datetime!(2025-01-05 23:59:59 UTC)),
            datetime!(2025-01-06 00:00:00 UTC)
        );
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(time::Duration::seconds(42)), "42s");
        assert_eq!(format_countdown(time::Duration::milliseconds(42_900)), "42s");
        assert_eq!(format_countdown(time::Duration::ZERO), "0s");
        assert_eq!(format_countdown(time::Duration::seconds(-3)), "0s");
    }

    #[test]
    fn test_notification_title() {
        assert_eq!(
            notification_title(DisplayUnit::MmolPerL, 130.0, Trend::Up),
            "7.2 mmol/L ↗️"
        );
        assert_eq!(
            notification_title(DisplayUnit::MgPerDl, 65.0, Trend::SharpDown),
            "65.0 mg/dL ⬇️"
        );
    }
}
