use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{CorrelationId, Result, StoreError, StoredInstance, Version, store::SagaStore};

/// Default table holding saga instances.
pub const DEFAULT_TABLE: &str = "saga_instances";

/// PostgreSQL-backed saga store.
///
/// Every write is a single statement guarded by the version column, so the
/// conflict check and the write happen atomically on the server.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
    table: String,
}

impl PostgresSagaStore {
    /// Creates a store over the default `saga_instances` table.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Creates a store over a custom table.
    ///
    /// The name is interpolated into SQL, so only plain identifiers
    /// (`[A-Za-z_][A-Za-z0-9_]*`) are accepted.
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_identifier(&table) {
            return Err(StoreError::InvalidTableName(table));
        }
        Ok(Self { pool, table })
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the table this store reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    async fn current_version(&self, correlation_id: CorrelationId) -> Result<Version> {
        let sql = format!(
            "SELECT version FROM {} WHERE correlation_id = $1",
            self.table
        );
        let version: Option<i64> = sqlx::query_scalar(&sql)
            .bind(correlation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }

    fn row_to_instance(row: PgRow) -> Result<StoredInstance> {
        Ok(StoredInstance {
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            current_state: row.try_get("current_state")?,
            version: Version::new(row.try_get("version")?),
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    #[tracing::instrument(skip(self), fields(table = %self.table))]
    async fn load(&self, correlation_id: CorrelationId) -> Result<Option<StoredInstance>> {
        let sql = format!(
            r#"
            SELECT correlation_id, current_state, version, data, created_at, updated_at
            FROM {}
            WHERE correlation_id = $1
            "#,
            self.table
        );
        let row: Option<PgRow> = sqlx::query(&sql)
            .bind(correlation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_instance).transpose()
    }

    #[tracing::instrument(skip(self, instance), fields(table = %self.table, correlation_id = %instance.correlation_id))]
    async fn insert_new(&self, instance: StoredInstance) -> Result<Version> {
        let sql = format!(
            r#"
            INSERT INTO {} (correlation_id, current_state, version, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(instance.correlation_id.as_uuid())
            .bind(&instance.current_state)
            .bind(Version::first().as_i64())
            .bind(&instance.data)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            let actual = self.current_version(instance.correlation_id).await?;
            return Err(StoreError::ConcurrencyConflict {
                correlation_id: instance.correlation_id,
                expected: Version::initial(),
                actual,
            });
        }

        Ok(Version::first())
    }

    #[tracing::instrument(skip(self, instance), fields(table = %self.table, correlation_id = %instance.correlation_id))]
    async fn update_with_version(
        &self,
        instance: StoredInstance,
        expected: Version,
    ) -> Result<Version> {
        let sql = format!(
            r#"
            UPDATE {}
            SET current_state = $2, data = $3, version = version + 1, updated_at = NOW()
            WHERE correlation_id = $1 AND version = $4
            RETURNING version
            "#,
            self.table
        );
        let new_version: Option<i64> = sqlx::query_scalar(&sql)
            .bind(instance.correlation_id.as_uuid())
            .bind(&instance.current_state)
            .bind(&instance.data)
            .bind(expected.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match new_version {
            Some(version) => Ok(Version::new(version)),
            None => {
                let actual = self.current_version(instance.correlation_id).await?;
                Err(StoreError::ConcurrencyConflict {
                    correlation_id: instance.correlation_id,
                    expected,
                    actual,
                })
            }
        }
    }

    #[tracing::instrument(skip(self), fields(table = %self.table))]
    async fn delete(&self, correlation_id: CorrelationId, expected: Version) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE correlation_id = $1 AND version = $2",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(correlation_id.as_uuid())
            .bind(expected.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            let actual = self.current_version(correlation_id).await?;
            return Err(StoreError::ConcurrencyConflict {
                correlation_id,
                expected,
                actual,
            });
        }

        Ok(())
    }
}
