//! Application state shared across handlers and background tasks.
//!
//! # Live settings
//!
//! The display unit lives in a [`UnitSetting`]. A background task forwards
//! every change into the scheduler's [`SyncSettings`] channel, which makes
//! the scheduler re-render the latest reading without refetching.
//!
//! # Persistence
//!
//! With `storage.autosave` on, a second task saves the history after every
//! new reading. The history is always saved once more on shutdown. The file
//! is written on a blocking thread, one save at a time.

use std::sync::Arc;

use glucow_core::{
    Clock, Collaborators, EventReceiver, GlucoseSource, HealthSink, NotificationSink, SyncEvent,
    SyncScheduler, SyncSettings, UnitSetting,
};
use glucow_store::{HistoryStore, PreferenceStore};
use glucow_types::DisplayUnit;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, HealthExportConfig, NotificationsConfig};
use crate::sinks::{
    HistorySink, LogHealthExporter, LogNotifier, PreferenceCredentials, WebhookHealthExporter,
};

/// Shared application state.
pub struct AppState {
    /// Configuration the service was started with.
    pub config: Config,
    /// Reading history (Mutex because the scheduler appends concurrently).
    pub history: Arc<Mutex<HistoryStore>>,
    /// Preferences, shared with the history store.
    pub prefs: PreferenceStore,
    /// Live display unit.
    pub unit: UnitSetting,
    /// Settings the scheduler reads on every fetch.
    pub settings: watch::Sender<SyncSettings>,
    /// The sync engine.
    pub scheduler: SyncScheduler,
    /// When the service started.
    pub started_at: OffsetDateTime,
    save_lock: Mutex<()>,
    stop_tx: watch::Sender<bool>,
}

impl AppState {
    /// Create new application state.
    ///
    /// The display unit is the one last chosen through [`AppState::set_unit`],
    /// falling back to `display.unit`. If the history was last saved under a
    /// different unit the change is reconciled before anything else reads it.
    pub fn new(
        config: Config,
        history: HistoryStore,
        source: Arc<dyn GlucoseSource>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let prefs = history.prefs().clone();
        let unit = prefs.display_unit().unwrap_or(config.display.unit);
        if let Some(saved) = history.saved_unit() {
            history.reconcile_unit_change(saved, unit);
        }

        let mut sync_settings = config.sync_settings();
        sync_settings.unit = unit;
        let (settings, settings_rx) = watch::channel(sync_settings);
        let history = Arc::new(Mutex::new(history));
        let started_at = clock.now();

        let scheduler = SyncScheduler::new(
            Collaborators {
                source,
                history: Arc::new(HistorySink::new(Arc::clone(&history))),
                credentials: Arc::new(PreferenceCredentials::new(prefs.clone())),
                health: health_sink(&config.health_export),
                notifier: notification_sink(&config.notifications),
                clock,
            },
            settings_rx,
        );
        let (stop_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            history,
            prefs,
            unit: UnitSetting::new(unit),
            settings,
            scheduler,
            started_at,
            save_lock: Mutex::new(()),
            stop_tx,
        })
    }

    /// Change the display unit and remember it. Returns `true` if it changed.
    pub fn set_unit(&self, unit: DisplayUnit) -> bool {
        let changed = self.unit.set(unit);
        if changed && let Err(e) = self.prefs.set_display_unit(unit) {
            warn!("Failed to persist display unit: {}", e);
        }
        changed
    }

    /// Save the history under the current unit. Returns the reading count.
    ///
    /// The history lock is only held while serializing.
    pub async fn save_history(&self) -> glucow_store::Result<usize> {
        let _saving = self.save_lock.lock().await;
        let pending = self.history.lock().await.prepare_save()?;
        let path = pending.path().to_path_buf();
        let unit = self.unit.get();

        tokio::task::spawn_blocking(move || pending.write(unit))
            .await
            .map_err(|e| glucow_store::Error::Write {
                path,
                source: std::io::Error::other(e),
            })?
    }

    /// Spawn the unit forwarder and, with autosave on, the history persister.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(forward_unit_changes(
            Arc::clone(self),
            self.unit.subscribe(),
            self.stop_tx.subscribe(),
        ))];
        if self.config.storage.autosave {
            handles.push(tokio::spawn(persist_new_readings(
                Arc::clone(self),
                self.scheduler.events(),
                self.stop_tx.subscribe(),
            )));
        } else {
            debug!("History autosave disabled");
        }
        handles
    }

    /// Stop the scheduler and background tasks, then save the history.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        self.stop_tx.send_replace(true);
        self.scheduler.shutdown().await;
        for handle in handles {
            let _ = handle.await;
        }

        // Background tasks have exited.
        let _saving = self.save_lock.lock().await;
        let history = self.history.lock().await;
        if history.save(self.unit.get()) {
            info!("Saved {} readings on shutdown", history.len());
        }
    }
}

fn health_sink(config: &HealthExportConfig) -> Arc<dyn HealthSink> {
    if let Some(url) = &config.webhook_url {
        match WebhookHealthExporter::new(url.as_str()) {
            Ok(exporter) => {
                info!("Exporting health records to {}", url);
                return Arc::new(exporter);
            }
            Err(e) => warn!("Health webhook unavailable, logging records instead: {}", e),
        }
    }
    Arc::new(LogHealthExporter)
}

fn notification_sink(config: &NotificationsConfig) -> Arc<dyn NotificationSink> {
    if config.desktop {
        #[cfg(feature = "notifications")]
        return Arc::new(crate::sinks::DesktopNotifier);

        #[cfg(not(feature = "notifications"))]
        warn!("Desktop notifications need the `notifications` feature, logging instead");
    }
    Arc::new(LogNotifier)
}

async fn forward_unit_changes(
    state: Arc<AppState>,
    mut units: watch::Receiver<DisplayUnit>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut previous = *units.borrow_and_update();

    loop {
        tokio::select! {
            changed = units.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *units.borrow_and_update();
                state
                    .history
                    .lock()
                    .await
                    .reconcile_unit_change(previous, current);
                state.settings.send_modify(|s| s.unit = current);
                previous = current;
            }
            _ = stop_rx.changed() => break,
        }
    }
    debug!("Unit forwarder stopped");
}

async fn persist_new_readings(
    state: Arc<AppState>,
    mut events: EventReceiver,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SyncEvent::Reading { .. }) => {
                    if let Err(e) = state.save_history().await {
                        error!("Failed to save history: {}", e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!("History persister missed {} events", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = stop_rx.changed() => break,
        }
    }
    debug!("History persister stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use glucow_core::mock::MockSource;
    use glucow_core::{FetchOutcome, MockClock};
    use glucow_store::keys;
    use glucow_types::Reading;
    use std::time::Duration;
    use time::macros::datetime;

    pub(crate) struct TestState {
        pub dir: tempfile::TempDir,
        pub source: Arc<MockSource>,
        pub state: Arc<AppState>,
    }

    pub(crate) fn create_test_state_with(config: impl FnOnce(&mut Config)) -> TestState {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.storage.data_dir = dir.path().to_path_buf();
        config(&mut cfg);

        let prefs = PreferenceStore::open(cfg.storage.preferences_path());
        let history = HistoryStore::open(cfg.storage.history_path(), prefs);
        let source = Arc::new(MockSource::new());
        let state = AppState::new(
            cfg,
            history,
            source.clone(),
            Arc::new(MockClock::new(datetime!(2025-01-05 10:00:30 UTC))),
        );
        TestState { dir, source, state }
    }

    pub(crate) fn create_test_state() -> TestState {
        create_test_state_with(|_| {})
    }

    pub(crate) fn store_credentials(state: &AppState) {
        state.prefs.set_string(keys::AUTH_TOKEN, "token").unwrap();
        state.prefs.set_string(keys::USER_ID, "user").unwrap();
        state.prefs.set_string(keys::ACCOUNT_ID_HASH, "hash").unwrap();
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let t = create_test_state();
        assert_eq!(t.state.unit.get(), DisplayUnit::MmolPerL);
        assert_eq!(t.state.settings.borrow().unit, DisplayUnit::MmolPerL);
        assert!(!t.state.scheduler.is_running());
        assert!(t.state.history.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_credentials_is_skipped() {
        let t = create_test_state();
        assert_eq!(t.state.scheduler.fetch_once().await, FetchOutcome::Skipped);
        assert_eq!(t.source.connection_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_appends_to_history() {
        let t = create_test_state();
        store_credentials(&t.state);
        t.source
            .set_reading(Reading::new(datetime!(2025-01-05 10:00 UTC), 100.0))
            .await;

        assert_eq!(t.state.scheduler.fetch_once().await, FetchOutcome::Updated);
        assert_eq!(t.state.scheduler.fetch_once().await, FetchOutcome::Duplicate);
        assert_eq!(t.state.history.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sensor_display_cached_in_prefs() {
        let t = create_test_state();
        store_credentials(&t.state);
        t.source
            .set_reading(Reading::new(datetime!(2025-01-05 10:00 UTC), 100.0))
            .await;
        t.state.scheduler.fetch_once().await;

        assert!(t.state.prefs.get_string(keys::SENSOR_EXPIRY_TEXT).is_some());
    }

    #[tokio::test]
    async fn test_save_history_records_unit() {
        let t = create_test_state();
        t.state
            .history
            .lock()
            .await
            .append(Reading::new(datetime!(2025-01-05 10:00 UTC), 100.0));

        assert_eq!(t.state.save_history().await.unwrap(), 1);
        assert_eq!(t.state.prefs.unit(), Some(DisplayUnit::MmolPerL));
        assert!(t.dir.path().join("glucose_readings.json").exists());
    }

    #[tokio::test]
    async fn test_unit_change_reaches_scheduler_settings() {
        let t = create_test_state();
        let handles = t.state.spawn_background();
        let mut settings = t.state.settings.subscribe();

        assert!(t.state.set_unit(DisplayUnit::MgPerDl));
        assert!(!t.state.set_unit(DisplayUnit::MgPerDl));

        tokio::time::timeout(Duration::from_secs(5), settings.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settings.borrow().unit, DisplayUnit::MgPerDl);

        t.state.shutdown(handles).await;
    }

    #[tokio::test]
    async fn test_autosave_on_new_reading() {
        let t = create_test_state();
        store_credentials(&t.state);
        let handles = t.state.spawn_background();
        assert_eq!(handles.len(), 2);

        t.source
            .set_reading(Reading::new(datetime!(2025-01-05 10:00 UTC), 100.0))
            .await;
        t.state.scheduler.fetch_once().await;

        let path = t.dir.path().join("glucose_readings.json");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        t.state.shutdown(handles).await;
    }

    #[tokio::test]
    async fn test_unit_choice_survives_restart() {
        let t = create_test_state();
        assert!(t.state.set_unit(DisplayUnit::MgPerDl));
        assert_eq!(t.state.prefs.display_unit(), Some(DisplayUnit::MgPerDl));

        let mut cfg = t.state.config.clone();
        cfg.display.unit = DisplayUnit::MmolPerL;
        let prefs = PreferenceStore::open(cfg.storage.preferences_path());
        let history = HistoryStore::open(cfg.storage.history_path(), prefs);
        let restarted = AppState::new(
            cfg,
            history,
            Arc::new(MockSource::new()),
            Arc::new(MockClock::new(datetime!(2025-01-05 10:00:30 UTC))),
        );

        assert_eq!(restarted.unit.get(), DisplayUnit::MgPerDl);
        assert_eq!(restarted.settings.borrow().unit, DisplayUnit::MgPerDl);
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_valid_file() {
        let t = create_test_state();
        {
            let mut history = t.state.history.lock().await;
            history.append(Reading::new(datetime!(2025-01-05 10:00 UTC), 100.0));
            history.append(Reading::new(datetime!(2025-01-05 10:05 UTC), 105.0));
        }

        let (a, b) = tokio::join!(t.state.save_history(), t.state.save_history());
        assert_eq!(a.unwrap(), 2);
        assert_eq!(b.unwrap(), 2);

        // The history stays usable while nothing is being written.
        assert!(
            t.state
                .history
                .lock()
                .await
                .append(Reading::new(datetime!(2025-01-05 10:10 UTC), 110.0))
        );

        let prefs = PreferenceStore::open(t.dir.path().join("preferences.json"));
        let reopened = HistoryStore::open(t.dir.path().join("glucose_readings.json"), prefs);
        assert_eq!(reopened.len(), 2);
        assert!(!t.dir.path().join("glucose_readings.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_autosave_disabled() {
        let t = create_test_state_with(|c| c.storage.autosave = false);
        assert_eq!(t.state.spawn_background().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_saves_history() {
        let t = create_test_state_with(|c| c.storage.autosave = false);
        let handles = t.state.spawn_background();
        t.state
            .history
            .lock()
            .await
            .append(Reading::new(datetime!(2025-01-05 10:00 UTC), 100.0));

        t.state.shutdown(handles).await;

        let prefs = PreferenceStore::open(t.dir.path().join("preferences.json"));
        let reopened = HistoryStore::open(t.dir.path().join("glucose_readings.json"), prefs);
        assert_eq!(reopened.len(), 1);
    }
}
