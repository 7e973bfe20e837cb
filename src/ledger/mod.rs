pub mod export;
pub mod store;

pub use export::{escape_csv, export_file_name, render_csv, EXPORT_FILE_PREFIX};
pub use store::{ExportOutcome, LedgerStatistics, ScanLedger, ScanStore};
