use serde::{Deserialize, Serialize};

use crate::db::{ScanRecord, TargetScanStyle};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentMode {
    #[default]
    Config,
    Running,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    pub user_name: String,
    /// `None` while the operator has not picked a style yet.
    pub target_scan_style: Option<TargetScanStyle>,
    pub target_cluster_size: Option<u64>,
}

impl ExperimentConfig {
    /// Whether a session may start with this configuration. Compliant runs
    /// need a cluster size of at least one; non-compliant runs accept any.
    pub fn can_start(&self) -> bool {
        if self.user_name.trim().is_empty() {
            return false;
        }

        match self.target_scan_style {
            None => false,
            Some(TargetScanStyle::Compliant) => {
                matches!(self.target_cluster_size, Some(size) if size >= 1)
            }
            Some(TargetScanStyle::NonCompliant) => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentState {
    pub mode: ExperimentMode,
    pub config: ExperimentConfig,
    pub experiment_id: Option<String>,
    pub scans: Vec<ScanRecord>,
    #[serde(skip)]
    first_scan_timestamp: i64,
    #[serde(skip)]
    last_scan_timestamp: i64,
}

impl ExperimentState {
    pub fn new(user_name: String) -> Self {
        Self {
            config: ExperimentConfig {
                user_name,
                ..ExperimentConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn can_start(&self) -> bool {
        self.config.can_start()
    }

    pub fn scan_count(&self) -> usize {
        self.scans.len()
    }

    /// Enters `Running` under a fresh id with an empty scan list. Starting
    /// again while running discards the in-flight scans. Returns `false` and
    /// leaves the state untouched when the config is incomplete.
    pub fn begin_session(&mut self, experiment_id: String) -> bool {
        if !self.can_start() {
            return false;
        }

        self.experiment_id = Some(experiment_id);
        self.scans.clear();
        self.reset_clocks();
        self.mode = ExperimentMode::Running;
        true
    }

    /// Appends a scan captured at `timestamp_ms`, snapshotting the current
    /// config into the record. Ignored outside `Running`.
    pub fn record_scan(&mut self, barcode: &str, timestamp_ms: i64) -> Option<ScanRecord> {
        if self.mode != ExperimentMode::Running {
            return None;
        }
        let experiment_id = self.experiment_id.clone()?;
        let target_scan_style = self.config.target_scan_style?;

        let scan_index = self.scans.len() as u64;
        let (delta_ms, elapsed_ms) = if scan_index == 0 {
            self.first_scan_timestamp = timestamp_ms;
            self.last_scan_timestamp = timestamp_ms;
            (None, 0)
        } else {
            let delta = timestamp_ms - self.last_scan_timestamp;
            let elapsed = timestamp_ms - self.first_scan_timestamp;
            self.last_scan_timestamp = timestamp_ms;
            (Some(delta), elapsed)
        };

        let record = ScanRecord {
            experiment_id,
            user_name: self.config.user_name.clone(),
            target_scan_style,
            target_cluster_size: self.config.target_cluster_size,
            scan_index,
            timestamp_ms,
            delta_ms,
            elapsed_ms,
            barcode: barcode.to_string(),
        };
        self.scans.push(record.clone());
        Some(record)
    }

    /// Hands back the session's scans and returns to `Config`. The operator
    /// name is kept for the next session.
    pub fn complete(&mut self) -> Vec<ScanRecord> {
        let scans = std::mem::take(&mut self.scans);
        self.config.target_scan_style = None;
        self.config.target_cluster_size = None;
        self.experiment_id = None;
        self.reset_clocks();
        self.mode = ExperimentMode::Config;
        scans
    }

    /// Clears every config field, including the operator name.
    pub fn reset_form(&mut self) {
        self.config = ExperimentConfig::default();
    }

    fn reset_clocks(&mut self) {
        self.first_scan_timestamp = 0;
        self.last_scan_timestamp = 0;
    }
}
