//! MySQL-backed [`VulnerabilityStore`].

use async_trait::async_trait;
use sqlx::mysql::{MySqlPoolOptions, MySqlStatement};
use sqlx::{Executor as _, MySql, MySqlPool, Statement as _, Transaction};
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::model::{StoredVulnerability, VulnerabilityRow};
use crate::traits::{StoreError, StoreTransaction, VulnerabilityStore};

const CREATE_VULNERABILITIES: &str = r#"
    CREATE TABLE IF NOT EXISTS vulnerabilities (
        id VARCHAR(128) NOT NULL,
        source_file VARCHAR(512) NOT NULL,
        scan_time DATETIME NOT NULL,
        severity VARCHAR(32) NOT NULL,
        cvss DOUBLE NOT NULL,
        status VARCHAR(64) NOT NULL,
        package_name VARCHAR(255) NOT NULL,
        current_version VARCHAR(128) NOT NULL,
        fixed_version VARCHAR(128) NOT NULL,
        description TEXT NOT NULL,
        published_date DATETIME NOT NULL,
        link VARCHAR(1024) NOT NULL,
        risk_factors TEXT NOT NULL,
        INDEX idx_vulnerabilities_severity (severity),
        INDEX idx_vulnerabilities_source (id, source_file)
    )
"#;

const INSERT_VULNERABILITY: &str = r#"
    INSERT INTO vulnerabilities
    (id, source_file, scan_time, severity, cvss, status, package_name,
    current_version, fixed_version, description, published_date, link, risk_factors)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_BY_SEVERITY: &str = r#"
    SELECT id, source_file, scan_time, severity, cvss, status, package_name,
    current_version, fixed_version, description, published_date, link, risk_factors
    FROM vulnerabilities
    WHERE severity = ?
"#;

#[derive(Clone)]
pub struct MySqlVulnerabilityStore {
    pool: MySqlPool,
}

impl fmt::Debug for MySqlVulnerabilityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlVulnerabilityStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl MySqlVulnerabilityStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Opens a pool and verifies the server answers.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .test_before_acquire(true)
            .connect(url)
            .await?;

        let store = Self::new(pool);
        store.ping().await?;
        info!(max_connections, "Database connected successfully");
        Ok(store)
    }

    /// Creates the `vulnerabilities` table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_VULNERABILITIES).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl VulnerabilityStore for MySqlVulnerabilityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlWriteTransaction {
            tx,
            statement: None,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_severity(
        &self,
        severity: &str,
    ) -> Result<Vec<StoredVulnerability>, StoreError> {
        let rows = sqlx::query_as::<_, StoredVulnerability>(SELECT_BY_SEVERITY)
            .bind(severity)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

struct MySqlWriteTransaction {
    tx: Transaction<'static, MySql>,
    statement: Option<MySqlStatement<'static>>,
}

#[async_trait]
impl StoreTransaction for MySqlWriteTransaction {
    async fn prepare_insert(&mut self) -> Result<(), StoreError> {
        let statement = (&mut *self.tx).prepare(INSERT_VULNERABILITY).await?;
        self.statement = Some(statement);
        Ok(())
    }

    async fn insert(&mut self, row: &VulnerabilityRow) -> Result<(), StoreError> {
        let statement = self.statement.as_ref().ok_or(StoreError::NotPrepared)?;
        statement
            .query()
            .bind(row.id.clone())
            .bind(row.source_file.clone())
            .bind(row.scan_time)
            .bind(row.severity.clone())
            .bind(row.cvss)
            .bind(row.status.clone())
            .bind(row.package_name.clone())
            .bind(row.current_version.clone())
            .bind(row.fixed_version.clone())
            .bind(row.description.clone())
            .bind(row.published_date)
            .bind(row.link.clone())
            .bind(row.risk_factors.clone())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
