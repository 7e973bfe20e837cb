//! Scan record data model.
//!
//! A `ScanRecord` is produced by the experiment controller when a barcode is
//! captured and is the unit persisted by the ledger and written to CSV.

use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetScanStyle {
    Compliant,
    NonCompliant,
}

impl TargetScanStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetScanStyle::Compliant => "compliant",
            TargetScanStyle::NonCompliant => "non_compliant",
        }
    }
}

impl fmt::Display for TargetScanStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetScanStyle {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "compliant" => Ok(TargetScanStyle::Compliant),
            "non_compliant" => Ok(TargetScanStyle::NonCompliant),
            other => Err(anyhow!("unknown target scan style '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub experiment_id: String,
    pub user_name: String,
    pub target_scan_style: TargetScanStyle,
    pub target_cluster_size: Option<u64>,
    pub scan_index: u64,
    pub timestamp_ms: i64,
    /// `None` only for the first scan of an experiment.
    pub delta_ms: Option<i64>,
    pub elapsed_ms: i64,
    /// Raw captured text, never trimmed or normalized.
    pub barcode: String,
}

impl ScanRecord {
    /// Primary key in the scan store. Re-saving a record with the same key
    /// overwrites the previous row.
    pub fn storage_key(&self) -> String {
        format!("{}_{}", self.experiment_id, self.scan_index)
    }
}
