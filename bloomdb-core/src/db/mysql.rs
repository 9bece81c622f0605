//! MySQL adapter over a single-connection sqlx pool.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

use super::{column_list, split_statements, DatabaseObject, Dialect, ObjectKind, Storage, COLUMNS, INSERT_COLUMNS};
use crate::error::Result;
use crate::history::{MigrationRecord, NewRecord};

/// Quote a MySQL identifier with backticks.
pub fn quote_backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub struct MysqlStorage {
    // One connection so session state (USE, SET) carries across statements.
    pool: MySqlPool,
}

impl MysqlStorage {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }
}

fn record_from_row(row: &MySqlRow) -> Result<MigrationRecord> {
    let kind: String = row.try_get(3)?;
    Ok(MigrationRecord {
        installed_rank: row.try_get(0)?,
        version: row.try_get(1)?,
        description: row.try_get(2)?,
        migration_type: kind.parse()?,
        script: row.try_get(4)?,
        checksum: row.try_get::<Option<i64>, _>(5)?.map(|c| c as i32),
        installed_by: row.try_get(6)?,
        installed_on: row.try_get::<Option<NaiveDateTime>, _>(7).ok().flatten(),
        execution_time: row.try_get(8)?,
        success: row.try_get::<i8, _>(9)? == 1,
    })
}

#[async_trait]
impl Storage for MysqlStorage {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn create_version_table(&self, table: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                `installed_rank` BIGINT NOT NULL PRIMARY KEY, \
                `version` VARCHAR(50), \
                `description` VARCHAR(200) NOT NULL, \
                `type` VARCHAR(20) NOT NULL, \
                `script` VARCHAR(1000) NOT NULL, \
                `checksum` BIGINT, \
                `installed_by` VARCHAR(100) NOT NULL, \
                `installed_on` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                `execution_time` BIGINT NOT NULL, \
                `success` TINYINT NOT NULL\
            )",
            quote_backtick(table)
        );
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_records(&self, table: &str) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY `installed_rank`",
            column_list(&COLUMNS, quote_backtick),
            quote_backtick(table)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert_record(&self, table: &str, record: &NewRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            quote_backtick(table),
            column_list(&INSERT_COLUMNS, quote_backtick)
        );
        sqlx::query(&sql)
            .bind(record.installed_rank)
            .bind(record.version.as_deref())
            .bind(&record.description)
            .bind(record.migration_type.as_str())
            .bind(&record.script)
            .bind(record.checksum.map(i64::from))
            .bind(&record.installed_by)
            .bind(record.execution_time)
            .bind(record.success as i8)
            .execute(&self.pool)
            .await?;
        Ok(())
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
            "UPDATE {} SET `version` = ?, `description` = ?, `checksum` = ? \
             WHERE `installed_rank` = ?",
            quote_backtick(table)
        );
        sqlx::query(&sql)
            .bind(version)
            .bind(description)
            .bind(checksum.map(i64::from))
            .bind(rank)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_record_full(&self, table: &str, rank: i64, record: &NewRecord) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET `installed_rank` = ?, `version` = ?, `description` = ?, \
             `type` = ?, `script` = ?, `checksum` = ?, `installed_by` = ?, \
             `installed_on` = CURRENT_TIMESTAMP, `execution_time` = ?, `success` = ? \
             WHERE `installed_rank` = ?",
            quote_backtick(table)
        );
        sqlx::query(&sql)
            .bind(record.installed_rank)
            .bind(record.version.as_deref())
            .bind(&record.description)
            .bind(record.migration_type.as_str())
            .bind(&record.script)
            .bind(record.checksum.map(i64::from))
            .bind(&record.installed_by)
            .bind(record.execution_time)
            .bind(record.success as i8)
            .bind(rank)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_failed(&self, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE `success` != 1", quote_backtick(table));
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn execute_migration(&self, body: &str) -> Result<()> {
        for statement in split_statements(body) {
            sqlx::raw_sql(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn list_database_objects(&self) -> Result<Vec<DatabaseObject>> {
        // information_schema columns come back as binary on some servers.
        let rows = sqlx::query(
            "SELECT CAST(table_name AS CHAR), CAST(table_type AS CHAR) \
             FROM information_schema.tables WHERE table_schema = DATABASE() \
             UNION ALL \
             SELECT CAST(routine_name AS CHAR), CAST(routine_type AS CHAR) \
             FROM information_schema.routines WHERE routine_schema = DATABASE() \
             ORDER BY 1",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let kind: String = row.try_get(1)?;
            if let Some(kind) = ObjectKind::from_catalog(&kind) {
                objects.push(DatabaseObject { kind, name });
            }
        }
        Ok(objects)
    }

    async fn drop_object(&self, object: &DatabaseObject) -> Result<()> {
        let keyword = match object.kind {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Function => "FUNCTION",
            // Indexes go with their table; MySQL has no sequences.
            ObjectKind::Index | ObjectKind::Sequence => return Ok(()),
        };
        let sql = format!("DROP {} IF EXISTS {}", keyword, quote_backtick(&object.name));
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        Ok(())
    }
}
