mod connection;
pub mod helpers;
pub mod models;
mod repositories;
mod schema;

pub use connection::Database;
pub use models::{ScanRecord, TargetScanStyle};
