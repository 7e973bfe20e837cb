use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use anyhow::Result;
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    db::{ScanRecord, TargetScanStyle},
    settings::SettingsStore,
};

use super::{ExperimentConfig, ExperimentMode, ExperimentState};

const EVENT_CAPACITY: usize = 64;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSnapshot {
    pub mode: ExperimentMode,
    pub experiment_id: Option<String>,
    pub config: ExperimentConfig,
    pub scan_count: usize,
    pub can_start: bool,
}

impl From<&ExperimentState> for ExperimentSnapshot {
    fn from(state: &ExperimentState) -> Self {
        Self {
            mode: state.mode,
            experiment_id: state.experiment_id.clone(),
            config: state.config.clone(),
            scan_count: state.scan_count(),
            can_start: state.can_start(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ExperimentEvent {
    StateChanged(ExperimentSnapshot),
    ScanRecorded(ScanRecord),
    StatisticsRefresh(u64),
}

/// Shared handle over the experiment session.
///
/// Each operation takes the state lock once and never awaits while holding
/// it. Calls that are invalid for the current mode are ignored.
#[derive(Clone)]
pub struct ExperimentController {
    state: Arc<Mutex<ExperimentState>>,
    settings: Arc<SettingsStore>,
    events: broadcast::Sender<ExperimentEvent>,
    statistics_refresh: Arc<AtomicU64>,
    clock: Clock,
}

impl ExperimentController {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        let user_name = settings.user_name().unwrap_or_default();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(ExperimentState::new(user_name))),
            settings,
            events,
            statistics_refresh: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    /// Replace the wall clock used to stamp scans.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExperimentEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        ExperimentSnapshot::from(&*self.lock_state())
    }

    pub fn mode(&self) -> ExperimentMode {
        self.lock_state().mode
    }

    pub fn can_start(&self) -> bool {
        self.lock_state().can_start()
    }

    pub fn scan_count(&self) -> usize {
        self.lock_state().scan_count()
    }

    /// Scans of the running session in capture order.
    pub fn scans(&self) -> Vec<ScanRecord> {
        self.lock_state().scans.clone()
    }

    pub fn scans_newest_first(&self) -> Vec<ScanRecord> {
        let mut scans = self.scans();
        scans.reverse();
        scans
    }

    /// Sets the operator name and writes it to the settings file. The
    /// in-memory value is kept even when the write fails.
    pub fn update_user_name(&self, user_name: &str) -> Result<()> {
        self.mutate(|state| state.config.user_name = user_name.to_string());
        self.settings.set_user_name(user_name)
    }

    pub fn update_target_scan_style(&self, style: Option<TargetScanStyle>) {
        self.mutate(|state| state.config.target_scan_style = style);
    }

    pub fn update_target_cluster_size(&self, size: Option<u64>) {
        self.mutate(|state| state.config.target_cluster_size = size);
    }

    /// Starts a session under a fresh experiment id, or returns `None` when
    /// the config cannot start one. Starting while running begins a new
    /// session and drops the unsaved scans.
    pub fn start_experiment(&self) -> Option<String> {
        let experiment_id = Uuid::new_v4().to_string();
        let (snapshot, discarded) = {
            let mut state = self.lock_state();
            let discarded = match state.mode {
                ExperimentMode::Running => state.scan_count(),
                ExperimentMode::Config => 0,
            };
            if !state.begin_session(experiment_id.clone()) {
                debug!("Ignoring start request with incomplete configuration");
                return None;
            }
            (ExperimentSnapshot::from(&*state), discarded)
        };

        if discarded > 0 {
            warn!("Restarted experiment; {discarded} unsaved scans discarded");
        }
        info!("Experiment {experiment_id} started");
        self.emit(ExperimentEvent::StateChanged(snapshot));
        Some(experiment_id)
    }

    pub fn record_scan(&self, barcode: &str) -> Option<ScanRecord> {
        let timestamp_ms = (self.clock)();
        let (record, snapshot) = {
            let mut state = self.lock_state();
            match state.record_scan(barcode, timestamp_ms) {
                Some(record) => (record, ExperimentSnapshot::from(&*state)),
                None => {
                    debug!("Ignoring scan in {:?} mode", state.mode);
                    return None;
                }
            }
        };

        self.emit(ExperimentEvent::ScanRecorded(record.clone()));
        self.emit(ExperimentEvent::StateChanged(snapshot));
        Some(record)
    }

    /// Ends the session and returns its scans in capture order. Valid with
    /// zero scans, and in `Config` mode where it only clears style and size.
    pub fn complete_experiment(&self) -> Vec<ScanRecord> {
        let (scans, experiment_id, snapshot) = {
            let mut state = self.lock_state();
            let experiment_id = state.experiment_id.clone();
            let scans = state.complete();
            (scans, experiment_id, ExperimentSnapshot::from(&*state))
        };

        if let Some(experiment_id) = experiment_id {
            info!(
                "Experiment {experiment_id} completed with {} scans",
                scans.len()
            );
        }
        self.emit(ExperimentEvent::StateChanged(snapshot));
        scans
    }

    /// Clears the whole config including the stored operator name.
    pub fn reset_form(&self) -> Result<()> {
        self.mutate(ExperimentState::reset_form);
        self.settings.clear_user_name()
    }

    /// Tells subscribers that stored totals changed. Returns the new
    /// refresh counter.
    pub fn trigger_statistics_refresh(&self) -> u64 {
        let value = self.statistics_refresh.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(ExperimentEvent::StatisticsRefresh(value));
        value
    }

    fn mutate<F>(&self, update: F)
    where
        F: FnOnce(&mut ExperimentState),
    {
        let snapshot = {
            let mut state = self.lock_state();
            update(&mut *state);
            ExperimentSnapshot::from(&*state)
        };
        self.emit(ExperimentEvent::StateChanged(snapshot));
    }

    fn emit(&self, event: ExperimentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, ExperimentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
