use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};

use crate::db::models::TargetScanStyle;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_optional_u64(value: Option<i64>, field: &str) -> Result<Option<u64>> {
    value.map(|raw| to_u64(raw, field)).transpose()
}

pub fn parse_style(value: &str) -> Result<TargetScanStyle> {
    value
        .parse::<TargetScanStyle>()
        .with_context(|| "failed to parse target_scan_style")
}
