use crate::schema::MIG_0001_INIT;
use recon_core::{Error, Result};
use rusqlite::Connection;
use std::path::Path;

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Cache(e.to_string())
}

pub(crate) fn open_or_create(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(db_err)?;
    apply_pragmas(&conn)?;
    migrate(&conn)?;
    Ok(conn)
}

pub(crate) fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(db_err)?;
    migrate(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "NORMAL").map_err(db_err)?;
    conn.pragma_update(None, "busy_timeout", 5000i64).map_err(db_err)?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='target_cache'",
            [],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if exists == 0 {
        conn.execute_batch(MIG_0001_INIT).map_err(db_err)?;
    }
    Ok(())
}
