//! PostgreSQL adapter over tokio-postgres with rustls.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio_postgres::Client;

use super::{column_list, quote_ident, DatabaseObject, Dialect, ObjectKind, Storage, COLUMNS, INSERT_COLUMNS};
use crate::error::{BloomError, Result};
use crate::history::{MigrationRecord, NewRecord};

/// Build a rustls ClientConfig using the Mozilla CA bundle and ring crypto provider.
fn make_rustls_config() -> Result<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| BloomError::ConfigError(format!("TLS setup failed: {}", e)))?
    .with_root_certificates(root_store)
    .with_no_client_auth();
    Ok(config)
}

/// Spawn the background connection driver task.
fn spawn_connection_task<F>(connection: F)
where
    F: std::future::Future<Output = std::result::Result<(), tokio_postgres::Error>>
        + Send
        + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::error!("Database connection error: {}", e);
        }
    });
}

pub struct PostgresStorage {
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresStorage {
    /// Connect with a libpq-style URL or key=value string. TLS follows `sslmode`.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_rustls_config()?);
        let (client, connection) = tokio_postgres::connect(dsn, tls).await?;
        spawn_connection_task(connection);
        Ok(Self {
            client: Mutex::new(Some(Arc::new(client))),
        })
    }

    fn client(&self) -> Result<Arc<Client>> {
        let guard = self
            .client
            .lock()
            .map_err(|_| BloomError::ConnectionUnavailable("PostgreSQL client lock poisoned".to_string()))?;
        guard.clone().ok_or_else(|| {
            BloomError::ConnectionUnavailable("PostgreSQL connection already closed".to_string())
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ping(&self) -> Result<()> {
        self.client()?.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last client handle ends the connection task.
        self.client
            .lock()
            .map_err(|_| BloomError::ConnectionUnavailable("PostgreSQL client lock poisoned".to_string()))?
            .take();
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client()?
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)",
                &[&table],
            )
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn create_version_table(&self, table: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                \"installed_rank\" BIGINT NOT NULL PRIMARY KEY, \
                \"version\" VARCHAR(50), \
                \"description\" VARCHAR(200) NOT NULL, \
                \"type\" VARCHAR(20) NOT NULL, \
                \"script\" VARCHAR(1000) NOT NULL, \
                \"checksum\" BIGINT, \
                \"installed_by\" VARCHAR(100) NOT NULL, \
                \"installed_on\" TIMESTAMP NOT NULL DEFAULT now(), \
                \"execution_time\" BIGINT NOT NULL, \
                \"success\" SMALLINT NOT NULL\
            )",
            quote_ident(table)
        );
        self.client()?.batch_execute(&sql).await?;
        Ok(())
    }

    async fn list_records(&self, table: &str) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY \"installed_rank\"",
            column_list(&COLUMNS, quote_ident),
            quote_ident(table)
        );
        let rows = self.client()?.query(&sql, &[]).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.get(3);
            records.push(MigrationRecord {
                installed_rank: row.get(0),
                version: row.get(1),
                description: row.get(2),
                migration_type: kind.parse()?,
                script: row.get(4),
                checksum: row.get::<_, Option<i64>>(5).map(|c| c as i32),
                installed_by: row.get(6),
                installed_on: row.get::<_, Option<NaiveDateTime>>(7),
                execution_time: row.get(8),
                success: row.get::<_, i16>(9) == 1,
            });
        }
        Ok(records)
    }

    async fn insert_record(&self, table: &str, record: &NewRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            quote_ident(table),
            column_list(&INSERT_COLUMNS, quote_ident)
        );
        let checksum = record.checksum.map(i64::from);
        let success = record.success as i16;
        self.client()?
            .execute(
                &sql,
                &[
                    &record.installed_rank,
                    &record.version,
                    &record.description,
                    &record.migration_type.as_str(),
                    &record.script,
                    &checksum,
                    &record.installed_by,
                    &record.execution_time,
                    &success,
                ],
            )
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
            "UPDATE {} SET \"version\" = $1, \"description\" = $2, \"checksum\" = $3 \
             WHERE \"installed_rank\" = $4",
            quote_ident(table)
        );
        let checksum = checksum.map(i64::from);
        self.client()?
            .execute(&sql, &[&version, &description, &checksum, &rank])
            .await?;
        Ok(())
    }

    async fn update_record_full(&self, table: &str, rank: i64, record: &NewRecord) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET \"installed_rank\" = $1, \"version\" = $2, \"description\" = $3, \
             \"type\" = $4, \"script\" = $5, \"checksum\" = $6, \"installed_by\" = $7, \
             \"installed_on\" = now(), \"execution_time\" = $8, \"success\" = $9 \
             WHERE \"installed_rank\" = $10",
            quote_ident(table)
        );
        let checksum = record.checksum.map(i64::from);
        let success = record.success as i16;
        self.client()?
            .execute(
                &sql,
                &[
                    &record.installed_rank,
                    &record.version,
                    &record.description,
                    &record.migration_type.as_str(),
                    &record.script,
                    &checksum,
                    &record.installed_by,
                    &record.execution_time,
                    &success,
                    &rank,
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete_failed(&self, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE \"success\" != 1", quote_ident(table));
        Ok(self.client()?.execute(&sql, &[]).await?)
    }

    async fn execute_migration(&self, body: &str) -> Result<()> {
        self.client()?.batch_execute(body).await?;
        Ok(())
    }

    async fn list_database_objects(&self) -> Result<Vec<DatabaseObject>> {
        let rows = self
            .client()?
            .query(
                "SELECT c.relname::text, CASE c.relkind \
                    WHEN 'v' THEN 'view' WHEN 'i' THEN 'index' \
                    WHEN 'S' THEN 'sequence' ELSE 'table' END \
                 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = current_schema() AND c.relkind IN ('r', 'p', 'v', 'i', 'S') \
                 UNION ALL \
                 SELECT p.proname::text, CASE p.prokind WHEN 'p' THEN 'procedure' ELSE 'function' END \
                 FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
                 WHERE n.nspname = current_schema() AND p.prokind IN ('f', 'p') \
                 ORDER BY 1",
                &[],
            )
            .await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0);
            let kind: String = row.get(1);
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
            ObjectKind::Index => "INDEX",
            ObjectKind::Sequence => "SEQUENCE",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Function => "FUNCTION",
        };
        let sql = format!(
            "DROP {} IF EXISTS {} CASCADE",
            keyword,
            quote_ident(&object.name)
        );
        self.client()?.batch_execute(&sql).await?;
        Ok(())
    }
}
