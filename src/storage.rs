use crate::api::models::ConversationRow;
use crate::error::Result;
use directories::ProjectDirs;
use rusqlite::{Connection, params};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "FirechatGtk")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

pub fn open_default() -> Result<Connection> {
    let path = db_path().ok_or_else(|| rusqlite::Error::InvalidPath("no data dir".into()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    init(&conn)?;
    Ok(conn)
}

// Rows are cached per signed-in user so the list paints before the first snapshot.
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS chat_rows (
            owner TEXT NOT NULL,
            id TEXT NOT NULL,
            counterparty_id TEXT NOT NULL,
            title TEXT NOT NULL,
            preview TEXT NOT NULL,
            last_message_at TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (owner, id)
        );
        "#,
    )?;
    Ok(())
}

/// Replaces everything cached for `owner` with `rows`.
pub fn replace_rows(conn: &mut Connection, owner: &str, rows: &[ConversationRow]) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM chat_rows WHERE owner = ?1", params![owner])?;
    for row in rows {
        tx.execute(
            r#"
            INSERT INTO chat_rows (owner, id, counterparty_id, title, preview, last_message_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                owner,
                row.chat_id,
                row.counterparty_id,
                row.title,
                row.preview,
                row.last_message_at,
                now
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn cached_rows(conn: &Connection, owner: &str, limit: Option<usize>) -> Result<Vec<ConversationRow>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, counterparty_id, title, preview, last_message_at
        FROM chat_rows
        WHERE owner = ?1
        ORDER BY last_message_at IS NULL, last_message_at DESC, id ASC
        LIMIT ?2
        "#,
    )?;
    let lim = limit.unwrap_or(500) as i64;
    let rows = stmt.query_map(params![owner, lim], |row| {
        Ok(ConversationRow {
            chat_id: row.get(0)?,
            counterparty_id: row.get(1)?,
            title: row.get(2)?,
            preview: row.get(3)?,
            last_message_at: row.get(4)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn clear_owner(conn: &Connection, owner: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM chat_rows WHERE owner = ?1", params![owner])?)
}
