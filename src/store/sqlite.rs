use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio::sync::Mutex;

use super::{LinkStore, StoreError};
use crate::model::{ClickStats, Link, normalized_id};

/// SqliteStore keeps links in a SQLite database: one row per link keyed by
/// normalized identity, plus an append-only stats table aggregated at read
/// time. The production backend.
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<rusqlite::Connection>>,
}

fn create_links_table(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        r#"create table if not exists Links(
    ID       TEXT    PRIMARY KEY,         -- normalized version of Short (foobar)
    Short    TEXT    NOT NULL DEFAULT "", -- user-provided short name (Foo-Bar)
    Long     TEXT    NOT NULL DEFAULT "",
    Created  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')), -- unix seconds
    LastEdit INTEGER NOT NULL DEFAULT (strftime('%s', 'now')), -- unix seconds
    Owner    TEXT    NOT NULL DEFAULT ""
)"#,
        (),
    )?;

    Ok(())
}

fn create_stats_table(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        r#"create table if not exists Stats(
    ID       TEXT    NOT NULL DEFAULT "",
    Created  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')), -- unix seconds
    Clicks   INTEGER
)"#,
        (),
    )?;

    Ok(())
}

fn row_link(row: &rusqlite::Row<'_>) -> Result<Link, rusqlite::Error> {
    let created: i64 = row.get(2)?;
    let last_edit: i64 = row.get(3)?;
    Ok(Link {
        short: row.get(0)?,
        long: row.get(1)?,
        created: DateTime::from_timestamp(created, 0).unwrap_or_default(),
        last_edit: DateTime::from_timestamp(last_edit, 0).unwrap_or_default(),
        owner: row.get(4)?,
    })
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let connection = rusqlite::Connection::open(path).map_err(StoreError::backend)?;
        Self::new(connection)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let connection = rusqlite::Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::new(connection)
    }

    fn new(connection: rusqlite::Connection) -> Result<Self, StoreError> {
        create_links_table(&connection).map_err(StoreError::backend)?;
        create_stats_table(&connection).map_err(StoreError::backend)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn load_all(&self) -> Result<Vec<Link>, StoreError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn
            .prepare(r#"SELECT Short, Long, Created, LastEdit, Owner FROM Links"#)
            .map_err(StoreError::backend)?;
        let links = stmt
            .query_map([], row_link)
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<Link>, rusqlite::Error>>()
            .map_err(StoreError::backend)?;
        Ok(links)
    }

    async fn load(&self, short: &str) -> Result<Link, StoreError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn
            .prepare(r#"SELECT Short, Long, Created, LastEdit, Owner FROM Links WHERE ID = ?1 LIMIT 1"#)
            .map_err(StoreError::backend)?;
        match stmt.query_one([normalized_id(short)], row_link) {
            Ok(link) => Ok(link),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    async fn save(&self, link: &Link) -> Result<(), StoreError> {
        let conn = self.connection.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO Links (ID, Short, Long, Created, LastEdit, Owner) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                normalized_id(&link.short),
                link.short,
                link.long,
                link.created.timestamp(),
                link.last_edit.timestamp(),
                link.owner
            ],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete(&self, short: &str) -> Result<(), StoreError> {
        let conn = self.connection.lock().await;
        let deleted = conn
            .execute(r#"DELETE FROM Links WHERE ID = ?1"#, [normalized_id(short)])
            .map_err(StoreError::backend)?;
        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn load_stats(&self) -> Result<ClickStats, StoreError> {
        // map ID => canonical Short so counts come back under the current
        // spelling of each surviving link
        let canonical: HashMap<String, String> = self
            .load_all()
            .await?
            .into_iter()
            .map(|link| (normalized_id(&link.short), link.short))
            .collect();

        let conn = self.connection.lock().await;
        let mut stmt = conn
            .prepare(r#"SELECT ID, SUM(Clicks) FROM Stats GROUP BY ID"#)
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let clicks: i64 = row.get(1)?;
                Ok((id, clicks))
            })
            .map_err(StoreError::backend)?;

        let mut stats = ClickStats::new();
        for row in rows {
            let (id, clicks) = row.map_err(StoreError::backend)?;
            let short = canonical.get(&id).cloned().unwrap_or(id);
            stats.insert(short, clicks);
        }
        Ok(stats)
    }

    async fn save_stats(&self, delta: &ClickStats) -> Result<(), StoreError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction().map_err(StoreError::backend)?;
        let now = Utc::now().timestamp();
        for (short, clicks) in delta {
            tx.execute(
                r#"INSERT INTO Stats (ID, Created, Clicks) VALUES (?1, ?2, ?3)"#,
                params![normalized_id(short), now, clicks],
            )
            .map_err(StoreError::backend)?;
        }
        tx.commit().map_err(StoreError::backend)
    }

    async fn delete_stats(&self, short: &str) -> Result<(), StoreError> {
        let conn = self.connection.lock().await;
        conn.execute(r#"DELETE FROM Stats WHERE ID = ?1"#, [normalized_id(short)])
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
