use std::{
    collections::HashSet,
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

use crate::{
    db::{Database, ScanRecord},
    log_info,
};

use super::export::{export_file_name, render_csv, EXPORT_FILE_PREFIX};

const ENABLE_LOGS: bool = true;

/// Storage the ledger needs: last-write-wins puts by key and full reads.
pub trait ScanStore: Send + Sync {
    fn put_all(&self, scans: &[ScanRecord]) -> impl Future<Output = Result<usize>> + Send;
    fn get_all(&self) -> impl Future<Output = Result<Vec<ScanRecord>>> + Send;
    fn delete_all(&self) -> impl Future<Output = Result<usize>> + Send;
    fn count(&self) -> impl Future<Output = Result<u64>> + Send;
}

impl ScanStore for Database {
    async fn put_all(&self, scans: &[ScanRecord]) -> Result<usize> {
        self.upsert_scans(scans).await
    }

    async fn get_all(&self) -> Result<Vec<ScanRecord>> {
        self.get_all_scans().await
    }

    async fn delete_all(&self) -> Result<usize> {
        self.delete_all_scans().await
    }

    async fn count(&self) -> Result<u64> {
        self.count_scans().await
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatistics {
    pub total_scans: u64,
    pub total_experiments: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    NothingToExport,
    Written { path: PathBuf, rows: usize },
}

/// Durable record of every scan across sessions.
#[derive(Clone)]
pub struct ScanLedger<S = Database> {
    store: S,
    export_dir: PathBuf,
}

impl<S: ScanStore> ScanLedger<S> {
    pub fn new(store: S, export_dir: PathBuf) -> Self {
        Self { store, export_dir }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Persist scans keyed by `experimentId_scanIndex`. An empty batch does
    /// no I/O.
    pub async fn save_scans(&self, scans: &[ScanRecord]) -> Result<usize> {
        if scans.is_empty() {
            return Ok(0);
        }
        let saved = self
            .store
            .put_all(scans)
            .await
            .context("failed to save scans")?;
        log_info!("Saved {saved} scans to the ledger");
        Ok(saved)
    }

    pub async fn get_all_scans(&self) -> Result<Vec<ScanRecord>> {
        self.store.get_all().await.context("failed to load scans")
    }

    pub async fn get_total_scan_count(&self) -> Result<u64> {
        self.store.count().await.context("failed to count scans")
    }

    /// Distinct experiment ids across every stored scan.
    pub async fn get_total_experiment_count(&self) -> Result<u64> {
        let scans = self.get_all_scans().await?;
        let experiments: HashSet<&str> = scans.iter().map(|s| s.experiment_id.as_str()).collect();
        Ok(experiments.len() as u64)
    }

    pub async fn statistics(&self) -> Result<LedgerStatistics> {
        let (total_scans, total_experiments) = tokio::join!(
            self.get_total_scan_count(),
            self.get_total_experiment_count()
        );
        Ok(LedgerStatistics {
            total_scans: total_scans?,
            total_experiments: total_experiments?,
        })
    }

    pub async fn delete_all_data(&self) -> Result<()> {
        let removed = self
            .store
            .delete_all()
            .await
            .context("failed to delete stored scans")?;
        log_info!("Deleted {removed} stored scans");
        Ok(())
    }

    /// Write every stored scan to a timestamped CSV file in the export
    /// directory.
    pub async fn export_to_csv(&self) -> Result<ExportOutcome> {
        let mut scans = self.get_all_scans().await?;
        if scans.is_empty() {
            log_info!("No data to export");
            return Ok(ExportOutcome::NothingToExport);
        }

        let csv = render_csv(&mut scans);
        let path = self
            .export_dir
            .join(export_file_name(EXPORT_FILE_PREFIX, Local::now()));

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create export directory {}",
                    self.export_dir.display()
                )
            })?;
        tokio::fs::write(&path, csv)
            .await
            .with_context(|| format!("failed to write export {}", path.display()))?;

        log_info!("Exported {} scans to {}", scans.len(), path.display());
        Ok(ExportOutcome::Written {
            path,
            rows: scans.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TargetScanStyle;
    use anyhow::anyhow;
    use tempfile::TempDir;

    fn scan(experiment_id: &str, scan_index: u64, timestamp_ms: i64, barcode: &str) -> ScanRecord {
        ScanRecord {
            experiment_id: experiment_id.into(),
            user_name: "TestUser".into(),
            target_scan_style: TargetScanStyle::Compliant,
            target_cluster_size: Some(5),
            scan_index,
            timestamp_ms,
            delta_ms: if scan_index == 0 { None } else { Some(1000) },
            elapsed_ms: if scan_index == 0 { 0 } else { 1000 },
            barcode: barcode.into(),
        }
    }

    fn ledger(temp_dir: &TempDir) -> ScanLedger {
        let db = Database::new(temp_dir.path().join("scans.sqlite3")).unwrap();
        ScanLedger::new(db, temp_dir.path().join("exports"))
    }

    struct FailingStore;

    impl ScanStore for FailingStore {
        async fn put_all(&self, _scans: &[ScanRecord]) -> Result<usize> {
            Err(anyhow!("disk full"))
        }

        async fn get_all(&self) -> Result<Vec<ScanRecord>> {
            Err(anyhow!("disk unreadable"))
        }

        async fn delete_all(&self) -> Result<usize> {
            Err(anyhow!("disk unreadable"))
        }

        async fn count(&self) -> Result<u64> {
            Err(anyhow!("disk unreadable"))
        }
    }

    #[tokio::test]
    async fn round_trip_and_idempotent_resave() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ledger(&temp_dir);
        let input = vec![
            scan("exp-1", 0, 1000, "A"),
            scan("exp-1", 1, 2000, "B"),
            scan("exp-2", 0, 3000, "C"),
        ];

        assert_eq!(ledger.save_scans(&input).await.unwrap(), 3);
        let mut stored = ledger.get_all_scans().await.unwrap();
        stored.sort_by(|a, b| a.storage_key().cmp(&b.storage_key()));
        assert_eq!(stored, input);

        ledger.save_scans(&input).await.unwrap();
        assert_eq!(ledger.get_total_scan_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn experiment_count_deduplicates_ids() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ledger(&temp_dir);
        ledger
            .save_scans(&[
                scan("e1", 0, 1000, "A"),
                scan("e1", 1, 2000, "B"),
                scan("e2", 0, 3000, "C"),
            ])
            .await
            .unwrap();

        assert_eq!(ledger.get_total_experiment_count().await.unwrap(), 2);
        assert_eq!(
            ledger.statistics().await.unwrap(),
            LedgerStatistics {
                total_scans: 3,
                total_experiments: 2
            }
        );
    }

    #[tokio::test]
    async fn empty_save_is_a_no_op_even_on_a_broken_store() {
        let ledger = ScanLedger::new(FailingStore, PathBuf::from("unused"));
        assert_eq!(ledger.save_scans(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn storage_failures_propagate() {
        let ledger = ScanLedger::new(FailingStore, PathBuf::from("unused"));
        assert!(ledger.save_scans(&[scan("e1", 0, 1, "A")]).await.is_err());
        assert!(ledger.get_all_scans().await.is_err());
        assert!(ledger.statistics().await.is_err());
        assert!(ledger.export_to_csv().await.is_err());
    }

    #[tokio::test]
    async fn delete_all_then_reuse() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ledger(&temp_dir);
        ledger.save_scans(&[scan("e1", 0, 1000, "A")]).await.unwrap();

        ledger.delete_all_data().await.unwrap();
        assert!(ledger.get_all_scans().await.unwrap().is_empty());
        assert_eq!(ledger.get_total_experiment_count().await.unwrap(), 0);

        ledger.save_scans(&[scan("e2", 0, 1000, "B")]).await.unwrap();
        assert_eq!(ledger.get_total_scan_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_delete_and_reads_stay_consistent() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ledger(&temp_dir);
        ledger.save_scans(&[scan("e1", 0, 1000, "A")]).await.unwrap();

        let batch = [scan("e2", 0, 2000, "B")];
        let (deleted, count, saved) = tokio::join!(
            ledger.delete_all_data(),
            ledger.get_total_scan_count(),
            ledger.save_scans(&batch),
        );
        deleted.unwrap();
        count.unwrap();
        saved.unwrap();

        assert!(ledger.get_total_scan_count().await.unwrap() <= 1);
        ledger.save_scans(&[scan("e3", 0, 3000, "C")]).await.unwrap();
        assert!(ledger.get_total_scan_count().await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn export_without_data_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ledger(&temp_dir);

        assert_eq!(
            ledger.export_to_csv().await.unwrap(),
            ExportOutcome::NothingToExport
        );
        assert!(!ledger.export_dir().exists());
    }

    #[tokio::test]
    async fn export_writes_sorted_escaped_csv() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ledger(&temp_dir);
        ledger
            .save_scans(&[
                scan("exp-1", 1, 2000, "Test \"User\""),
                scan("exp-1", 0, 1000, "BARCODE,WITH,COMMA"),
            ])
            .await
            .unwrap();

        let (path, rows) = match ledger.export_to_csv().await.unwrap() {
            ExportOutcome::Written { path, rows } => (path, rows),
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(rows, 2);

        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("scan-lab-observations_"));
        assert!(file_name.ends_with(".csv"));
        assert_eq!(file_name.len(), "scan-lab-observations_YYYY-MM-DD_HHMMSS.csv".len());

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("experimentId,userName,"));
        assert!(lines[1].contains(",1000,"));
        assert!(lines[1].ends_with("\"BARCODE,WITH,COMMA\""));
        assert!(lines[2].ends_with("\"Test \"\"User\"\"\""));
    }
}
