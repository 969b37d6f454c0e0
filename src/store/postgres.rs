// src/store/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use super::{
    EntryInsert, MirrorStore, NewCertificate, NewFqdnSet, NewName, Resolved, StoreTxn,
};

/// PostgreSQL store backend
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to PostgreSQL database");

        // sqlx 0.8.x doesn't recognize 'channel_binding' parameter from Neon
        let cleaned_url = Self::clean_connection_string(database_url);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(&cleaned_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        info!("Connected to PostgreSQL successfully");

        Ok(Self { pool })
    }

    /// Remove connection string parameters sqlx does not understand
    fn clean_connection_string(url_str: &str) -> String {
        use url::Url;

        if let Ok(mut url) = Url::parse(url_str) {
            let unsupported_params = ["channel_binding"];

            let cleaned_pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| !unsupported_params.contains(&key.as_ref()))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();

            if cleaned_pairs.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(cleaned_pairs);
            }

            url.to_string()
        } else {
            url_str.to_string()
        }
    }

    /// Create the schema if it does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        let statements: [(&str, &str); 8] = [
            (
                "logs",
                r#"
                CREATE TABLE IF NOT EXISTS logs (
                    id BIGSERIAL PRIMARY KEY,
                    url TEXT NOT NULL UNIQUE
                )
                "#,
            ),
            (
                "issuers",
                r#"
                CREATE TABLE IF NOT EXISTS issuers (
                    id BIGSERIAL PRIMARY KEY,
                    issuer TEXT NOT NULL UNIQUE
                )
                "#,
            ),
            (
                "certificates",
                r#"
                CREATE TABLE IF NOT EXISTS certificates (
                    id BIGSERIAL PRIMARY KEY,
                    sha256 BYTEA NOT NULL UNIQUE,
                    serial BYTEA NOT NULL,
                    not_after TIMESTAMPTZ NOT NULL,
                    pre BOOLEAN NOT NULL,
                    issuer_id BIGINT NOT NULL REFERENCES issuers(id)
                )
                "#,
            ),
            (
                "log_entries",
                r#"
                CREATE TABLE IF NOT EXISTS log_entries (
                    log_id BIGINT NOT NULL REFERENCES logs(id),
                    log_index BIGINT NOT NULL,
                    certificate_id BIGINT NOT NULL REFERENCES certificates(id),
                    PRIMARY KEY (log_id, log_index)
                )
                "#,
            ),
            (
                "names",
                r#"
                CREATE TABLE IF NOT EXISTS names (
                    reversed_name TEXT NOT NULL,
                    not_after TIMESTAMPTZ NOT NULL,
                    issuer_id BIGINT NOT NULL REFERENCES issuers(id),
                    certificate_id BIGINT NOT NULL REFERENCES certificates(id),
                    UNIQUE (certificate_id, reversed_name)
                )
                "#,
            ),
            (
                "fqdn_sets",
                r#"
                CREATE TABLE IF NOT EXISTS fqdn_sets (
                    fqdn_set_sha256 BYTEA NOT NULL,
                    not_after TIMESTAMPTZ NOT NULL,
                    issuer_id BIGINT NOT NULL REFERENCES issuers(id),
                    certificate_id BIGINT NOT NULL REFERENCES certificates(id),
                    UNIQUE (certificate_id, fqdn_set_sha256)
                )
                "#,
            ),
            (
                "index on names.reversed_name",
                r#"
                CREATE INDEX IF NOT EXISTS idx_names_reversed_name
                ON names(reversed_name text_pattern_ops)
                "#,
            ),
            (
                "index on fqdn_sets.fqdn_set_sha256",
                r#"
                CREATE INDEX IF NOT EXISTS idx_fqdn_sets_sha256
                ON fqdn_sets(fqdn_set_sha256)
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {}", what))?;
        }

        info!("Database migrations completed successfully");

        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MirrorStore for PostgresStore {
    async fn insert_log(&self, base_url: &str) -> Result<bool> {
        let result = sqlx::query("INSERT INTO logs (url) VALUES ($1) ON CONFLICT (url) DO NOTHING")
            .bind(base_url)
            .execute(&self.pool)
            .await
            .context("Failed to insert log")?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_log(&self, base_url: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM logs WHERE url = $1")
            .bind(base_url)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up log")?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn max_entry_index(&self, log_id: i64) -> Result<Option<u64>> {
        let row = sqlx::query(
            r#"
            SELECT log_index FROM log_entries
            WHERE log_id = $1 ORDER BY log_index DESC LIMIT 1
            "#,
        )
        .bind(log_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch max entry index")?;

        Ok(row.map(|r| r.get::<i64, _>("log_index") as u64))
    }

    async fn entry_count(&self, log_id: i64) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM log_entries WHERE log_id = $1")
            .bind(log_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count log entries")?;

        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(PgTxn { tx }))
    }
}

struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTxn for PgTxn {
    async fn issuer_id(&mut self, distinguished_name: &str) -> Result<Resolved> {
        let inserted = sqlx::query("INSERT INTO issuers (issuer) VALUES ($1) ON CONFLICT (issuer) DO NOTHING")
            .bind(distinguished_name)
            .execute(&mut *self.tx)
            .await
            .context("Failed to insert issuer")?;

        let row = sqlx::query("SELECT id FROM issuers WHERE issuer = $1")
            .bind(distinguished_name)
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to look up issuer")?;

        Ok(Resolved {
            id: row.get("id"),
            created: inserted.rows_affected() > 0,
        })
    }

    async fn certificate_id(&mut self, cert: &NewCertificate) -> Result<Resolved> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO certificates (sha256, serial, not_after, pre, issuer_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (sha256) DO NOTHING
            "#,
        )
        .bind(&cert.sha256[..])
        .bind(&cert.serial)
        .bind(cert.not_after)
        .bind(cert.is_precert)
        .bind(cert.issuer_id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert certificate")?;

        let row = sqlx::query("SELECT id FROM certificates WHERE sha256 = $1")
            .bind(&cert.sha256[..])
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to look up certificate")?;

        Ok(Resolved {
            id: row.get("id"),
            created: inserted.rows_affected() > 0,
        })
    }

    async fn insert_log_entry(
        &mut self,
        log_id: i64,
        index: u64,
        certificate_id: i64,
    ) -> Result<EntryInsert> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO log_entries (log_id, log_index, certificate_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (log_id, log_index) DO NOTHING
            "#,
        )
        .bind(log_id)
        .bind(index as i64)
        .bind(certificate_id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert log entry")?;

        if inserted.rows_affected() > 0 {
            return Ok(EntryInsert::Inserted);
        }

        let row = sqlx::query(
            "SELECT certificate_id FROM log_entries WHERE log_id = $1 AND log_index = $2",
        )
        .bind(log_id)
        .bind(index as i64)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to look up existing log entry")?;

        debug!("log {} index {} already stored", log_id, index);

        Ok(EntryInsert::Existing(row.get("certificate_id")))
    }

    async fn insert_name(&mut self, name: &NewName) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO names (reversed_name, not_after, issuer_id, certificate_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (certificate_id, reversed_name) DO NOTHING
            "#,
        )
        .bind(&name.reversed_name)
        .bind(name.not_after)
        .bind(name.issuer_id)
        .bind(name.certificate_id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert name")?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn insert_fqdn_set(&mut self, set: &NewFqdnSet) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO fqdn_sets (fqdn_set_sha256, not_after, issuer_id, certificate_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (certificate_id, fqdn_set_sha256) DO NOTHING
            "#,
        )
        .bind(&set.sha256[..])
        .bind(set.not_after)
        .bind(set.issuer_id)
        .bind(set.certificate_id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert fqdn set")?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }
}
