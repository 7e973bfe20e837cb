//! CSV rendering for stored scans.
//!
//! The column order, the escaping rule and the file name pattern are read by
//! downstream analysis scripts and must stay stable.

use std::cmp::Ordering;

use chrono::{DateTime, Local};

use crate::db::ScanRecord;

pub const EXPORT_FILE_PREFIX: &str = "scan-lab-observations";

pub const CSV_HEADERS: [&str; 9] = [
    "experimentId",
    "userName",
    "targetScanStyle",
    "targetClusterSize",
    "scanIndex",
    "timestampMs",
    "deltaMs",
    "elapsedMs",
    "barcode",
];

/// Quote a field containing a comma, quote or newline, doubling inner quotes.
pub fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Export order: timestamp, then scan index, then experiment id.
pub fn export_order(a: &ScanRecord, b: &ScanRecord) -> Ordering {
    a.timestamp_ms
        .cmp(&b.timestamp_ms)
        .then_with(|| a.scan_index.cmp(&b.scan_index))
        .then_with(|| a.experiment_id.cmp(&b.experiment_id))
}

fn optional_field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_row(scan: &ScanRecord) -> String {
    [
        escape_csv(&scan.experiment_id),
        escape_csv(&scan.user_name),
        escape_csv(scan.target_scan_style.as_str()),
        optional_field(scan.target_cluster_size),
        scan.scan_index.to_string(),
        scan.timestamp_ms.to_string(),
        optional_field(scan.delta_ms),
        scan.elapsed_ms.to_string(),
        escape_csv(&scan.barcode),
    ]
    .join(",")
}

/// Sorts `scans` into export order and renders the header plus one row per
/// scan, joined by `\n` with no trailing newline.
pub fn render_csv(scans: &mut [ScanRecord]) -> String {
    scans.sort_by(export_order);

    let mut lines = Vec::with_capacity(scans.len() + 1);
    lines.push(CSV_HEADERS.join(","));
    lines.extend(scans.iter().map(csv_row));
    lines.join("\n")
}

/// `<prefix>_YYYY-MM-DD_HHMMSS.csv` in local time.
pub fn export_file_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.csv", prefix, at.format("%Y-%m-%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TargetScanStyle;
    use chrono::TimeZone;

    fn scan(experiment_id: &str, scan_index: u64, timestamp_ms: i64, barcode: &str) -> ScanRecord {
        ScanRecord {
            experiment_id: experiment_id.into(),
            user_name: "TestUser".into(),
            target_scan_style: TargetScanStyle::Compliant,
            target_cluster_size: Some(5),
            scan_index,
            timestamp_ms,
            delta_ms: None,
            elapsed_ms: 0,
            barcode: barcode.into(),
        }
    }

    #[test]
    fn escapes_only_when_needed() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("BARCODE,WITH,COMMA"), "\"BARCODE,WITH,COMMA\"");
        assert_eq!(escape_csv("Test \"User\""), "\"Test \"\"User\"\"\"");
        assert_eq!(escape_csv("two\nlines"), "\"two\nlines\"");
        assert_eq!(escape_csv(" spaced "), " spaced ");
    }

    #[test]
    fn carriage_return_alone_is_not_quoted() {
        assert_eq!(escape_csv("a\rb"), "a\rb");
        assert_eq!(escape_csv("a\r\nb"), "\"a\r\nb\"");
    }

    #[test]
    fn renders_sorted_rows_with_escaping() {
        let mut late = scan("exp-1", 1, 2000, "Test \"User\"");
        late.delta_ms = Some(1000);
        late.elapsed_ms = 1000;
        let mut scans = vec![late, scan("exp-1", 0, 1000, "BARCODE,WITH,COMMA")];

        let csv = render_csv(&mut scans);
        let lines: Vec<&str> = csv.split('\n').collect();

        assert_eq!(
            lines,
            vec![
                "experimentId,userName,targetScanStyle,targetClusterSize,scanIndex,timestampMs,deltaMs,elapsedMs,barcode",
                "exp-1,TestUser,compliant,5,0,1000,,0,\"BARCODE,WITH,COMMA\"",
                "exp-1,TestUser,compliant,5,1,2000,1000,1000,\"Test \"\"User\"\"\"",
            ]
        );
    }

    #[test]
    fn null_cluster_size_renders_empty() {
        let mut record = scan("exp-1", 0, 1000, "A");
        record.target_cluster_size = None;
        record.target_scan_style = TargetScanStyle::NonCompliant;

        assert_eq!(csv_row(&record), "exp-1,TestUser,non_compliant,,0,1000,,0,A");
    }

    #[test]
    fn ties_break_on_index_then_experiment() {
        let mut scans = vec![
            scan("b", 1, 500, "4"),
            scan("b", 0, 500, "2"),
            scan("a", 1, 500, "3"),
            scan("a", 0, 500, "1"),
            scan("z", 0, 100, "0"),
        ];
        scans.sort_by(export_order);

        let order: Vec<&str> = scans.iter().map(|s| s.barcode.as_str()).collect();
        assert_eq!(order, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn file_name_uses_second_precision() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(
            export_file_name(EXPORT_FILE_PREFIX, at),
            "scan-lab-observations_2024-03-07_090501.csv"
        );
    }
}
