use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_style, to_i64, to_optional_u64, to_u64},
    models::ScanRecord,
};

fn row_to_scan(row: &Row) -> Result<ScanRecord> {
    let target_scan_style: String = row.get("target_scan_style")?;
    let target_cluster_size: Option<i64> = row.get("target_cluster_size")?;
    let scan_index: i64 = row.get("scan_index")?;

    Ok(ScanRecord {
        experiment_id: row.get("experiment_id")?,
        user_name: row.get("user_name")?,
        target_scan_style: parse_style(&target_scan_style)?,
        target_cluster_size: to_optional_u64(target_cluster_size, "target_cluster_size")?,
        scan_index: to_u64(scan_index, "scan_index")?,
        timestamp_ms: row.get("timestamp_ms")?,
        delta_ms: row.get("delta_ms")?,
        elapsed_ms: row.get("elapsed_ms")?,
        barcode: row.get("barcode")?,
    })
}

impl Database {
    /// Insert or overwrite scans keyed by `experimentId_scanIndex`.
    ///
    /// All rows are written in one transaction; on failure nothing is kept.
    pub async fn upsert_scans(&self, scans: &[ScanRecord]) -> Result<usize> {
        if scans.is_empty() {
            return Ok(0);
        }

        let scans = scans.to_vec();
        self.execute(move |conn| {
            let saved_at = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;

            for scan in &scans {
                tx.execute(
                    "INSERT INTO scans (
                        id,
                        experiment_id,
                        user_name,
                        target_scan_style,
                        target_cluster_size,
                        scan_index,
                        timestamp_ms,
                        delta_ms,
                        elapsed_ms,
                        barcode,
                        saved_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(id) DO UPDATE SET
                        experiment_id = excluded.experiment_id,
                        user_name = excluded.user_name,
                        target_scan_style = excluded.target_scan_style,
                        target_cluster_size = excluded.target_cluster_size,
                        scan_index = excluded.scan_index,
                        timestamp_ms = excluded.timestamp_ms,
                        delta_ms = excluded.delta_ms,
                        elapsed_ms = excluded.elapsed_ms,
                        barcode = excluded.barcode,
                        saved_at = excluded.saved_at",
                    params![
                        scan.storage_key(),
                        scan.experiment_id,
                        scan.user_name,
                        scan.target_scan_style.as_str(),
                        scan.target_cluster_size.map(to_i64).transpose()?,
                        to_i64(scan.scan_index)?,
                        scan.timestamp_ms,
                        scan.delta_ms,
                        scan.elapsed_ms,
                        scan.barcode,
                        saved_at,
                    ],
                )
                .with_context(|| format!("failed to write scan {}", scan.storage_key()))?;
            }

            tx.commit().context("failed to commit scans")?;
            debug!("Stored {} scans", scans.len());
            Ok(scans.len())
        })
        .await
    }

    /// Every stored scan, in no particular order.
    pub async fn get_all_scans(&self) -> Result<Vec<ScanRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT experiment_id, user_name, target_scan_style, target_cluster_size,
                        scan_index, timestamp_ms, delta_ms, elapsed_ms, barcode
                 FROM scans",
            )?;

            let mut rows = stmt.query([])?;
            let mut scans = Vec::new();
            while let Some(row) = rows.next()? {
                scans.push(row_to_scan(row)?);
            }

            Ok(scans)
        })
        .await
    }

    pub async fn count_scans(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))?;
            to_u64(count, "scan count")
        })
        .await
    }

    /// Remove every stored scan. The connection stays open, so the store is
    /// immediately usable afterwards.
    pub async fn delete_all_scans(&self) -> Result<usize> {
        self.execute(|conn| {
            let removed = conn
                .execute("DELETE FROM scans", [])
                .context("failed to delete scans")?;
            Ok(removed)
        })
        .await
    }
}
