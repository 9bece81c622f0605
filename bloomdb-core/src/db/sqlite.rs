//! SQLite adapter on a single rusqlite connection.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};

use super::{column_list, quote_ident, DatabaseObject, Dialect, ObjectKind, Storage, COLUMNS, INSERT_COLUMNS};
use crate::error::{BloomError, Result};
use crate::history::{MigrationRecord, NewRecord};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path`. `:memory:` is accepted.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        log::debug!("Opened SQLite database; path={}", path);
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| BloomError::ConnectionUnavailable("SQLite connection lock poisoned".to_string()))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(BloomError::ConnectionUnavailable(
                "SQLite connection already closed".to_string(),
            )),
        }
    }
}

fn parse_timestamp(raw: Option<String>) -> Option<NaiveDateTime> {
    raw.and_then(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).ok())
}

#[async_trait]
impl Storage for SqliteStorage {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    async fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| BloomError::ConnectionUnavailable("SQLite connection lock poisoned".to_string()))?
            .take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| BloomError::SqliteError(e))?;
        }
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    async fn create_version_table(&self, table: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                \"installed_rank\" INTEGER NOT NULL PRIMARY KEY, \
                \"version\" TEXT, \
                \"description\" TEXT NOT NULL, \
                \"type\" TEXT NOT NULL, \
                \"script\" TEXT NOT NULL, \
                \"checksum\" INTEGER, \
                \"installed_by\" TEXT NOT NULL, \
                \"installed_on\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                \"execution_time\" INTEGER NOT NULL, \
                \"success\" INTEGER NOT NULL\
            )",
            quote_ident(table)
        );
        self.with_conn(|conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
    }

    async fn list_records(&self, table: &str) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY \"installed_rank\"",
            column_list(&COLUMNS, quote_ident),
            quote_ident(table)
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, i64>(9)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (rank, version, description, kind, script, checksum, by, on, time, success) =
                    row?;
                records.push(MigrationRecord {
                    installed_rank: rank,
                    version,
                    description,
                    migration_type: kind.parse()?,
                    script,
                    checksum: checksum.map(|c| c as i32),
                    installed_by: by,
                    installed_on: parse_timestamp(on),
                    execution_time: time,
                    success: success == 1,
                });
            }
            Ok(records)
        })
    }

    async fn insert_record(&self, table: &str, record: &NewRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            quote_ident(table),
            column_list(&INSERT_COLUMNS, quote_ident)
        );
        self.with_conn(|conn| {
            conn.execute(
                &sql,
                params![
                    record.installed_rank,
                    record.version,
                    record.description,
                    record.migration_type.as_str(),
                    record.script,
                    record.checksum,
                    record.installed_by,
                    record.execution_time,
                    record.success as i64,
                ],
            )?;
            Ok(())
        })
    }

    async fn update_record(
        &self,
        table: &str,
        rank: i64,
        version: Option<&str>,
        description: &str,
        checksum: Option<i32>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET \"version\" = ?1, \"description\" = ?2, \"checksum\" = ?3 \
             WHERE \"installed_rank\" = ?4",
            quote_ident(table)
        );
        self.with_conn(|conn| {
            conn.execute(&sql, params![version, description, checksum, rank])?;
            Ok(())
        })
    }

    async fn update_record_full(&self, table: &str, rank: i64, record: &NewRecord) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET \"installed_rank\" = ?1, \"version\" = ?2, \"description\" = ?3, \
             \"type\" = ?4, \"script\" = ?5, \"checksum\" = ?6, \"installed_by\" = ?7, \
             \"installed_on\" = CURRENT_TIMESTAMP, \"execution_time\" = ?8, \"success\" = ?9 \
             WHERE \"installed_rank\" = ?10",
            quote_ident(table)
        );
        self.with_conn(|conn| {
            conn.execute(
                &sql,
                params![
                    record.installed_rank,
                    record.version,
                    record.description,
                    record.migration_type.as_str(),
                    record.script,
                    record.checksum,
                    record.installed_by,
                    record.execution_time,
                    record.success as i64,
                    rank,
                ],
            )?;
            Ok(())
        })
    }

    async fn delete_failed(&self, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE \"success\" != 1", quote_ident(table));
        self.with_conn(|conn| Ok(conn.execute(&sql, [])? as u64))
    }

    async fn execute_migration(&self, body: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(body)?;
            Ok(())
        })
    }

    async fn list_database_objects(&self) -> Result<Vec<DatabaseObject>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT type, name FROM sqlite_master \
                 WHERE type IN ('table', 'view', 'index') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut objects = Vec::new();
            for row in rows {
                let (kind, name) = row?;
                if let Some(kind) = ObjectKind::from_catalog(&kind) {
                    objects.push(DatabaseObject { kind, name });
                }
            }
            Ok(objects)
        })
    }

    async fn drop_object(&self, object: &DatabaseObject) -> Result<()> {
        let keyword = match object.kind {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Index => "INDEX",
            // SQLite has no sequences or stored routines.
            _ => return Ok(()),
        };
        let sql = format!("DROP {} IF EXISTS {}", keyword, quote_ident(&object.name));
        self.with_conn(|conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
    }
}
