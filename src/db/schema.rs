use anyhow::{bail, Context, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 1;

/// Creates the scan table on a fresh database and refuses to open files
/// written by a newer build.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            SCHEMA_VERSION
        );
    }

    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open schema transaction")?;
    tx.execute_batch(include_str!("schema.sql"))
        .context("failed to execute schema.sql")?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit schema")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_is_repeatable() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        ensure_schema(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scans", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn rejects_newer_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(ensure_schema(&mut conn).is_err());
    }
}
