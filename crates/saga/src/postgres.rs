use async_trait::async_trait;
use common::{SagaId, SagaUuid, Version};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::record::SagaRecord;
use crate::status::SagaStatus;
use crate::store::SagaStore;

/// PostgreSQL-backed saga store implementation.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        let id = SagaId::new(
            SagaUuid::from_uuid(row.try_get::<Uuid, _>("id")?),
            row.try_get::<String, _>("id_class")?,
        );
        let status: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status).ok_or_else(|| SagaError::InvalidRecord {
            id: id.clone(),
            reason: format!("unknown status {status}"),
        })?;

        Ok(SagaRecord {
            payload: row.try_get("payload")?,
            status,
            created_at: row.try_get("created_at")?,
            expire_at: row.try_get("expire_at")?,
            closed_at: row.try_get("closed_at")?,
            version: Version::new(row.try_get("version")?),
            id,
        })
    }

    async fn insert(&self, record: &SagaRecord) -> Result<Version> {
        sqlx::query(
            r#"
            INSERT INTO sagas (id, id_class, payload, status, created_at, expire_at, closed_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.uuid.as_uuid())
        .bind(&record.id.saga_type)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.expire_at)
        .bind(record.closed_at)
        .bind(Version::first().as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return SagaError::DuplicateSaga(record.id.clone());
            }
            SagaError::Storage(e)
        })?;

        Ok(Version::first())
    }

    async fn update(&self, record: &SagaRecord) -> Result<Version> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query(
            r#"
            SELECT status, version
            FROM sagas
            WHERE id = $1 AND id_class = $2
            FOR UPDATE
            "#,
        )
        .bind(record.id.uuid.as_uuid())
        .bind(&record.id.saga_type)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SagaError::SagaNotFound(record.id.clone()))?;

        let actual = Version::new(current.try_get("version")?);
        if actual != record.version {
            return Err(SagaError::ConcurrentModification {
                id: record.id.clone(),
                expected: record.version,
                actual,
            });
        }

        let status: String = current.try_get("status")?;
        let status = SagaStatus::parse(&status).ok_or_else(|| SagaError::InvalidRecord {
            id: record.id.clone(),
            reason: format!("unknown status {status}"),
        })?;
        if !status.can_transition_to(record.status) {
            return Err(SagaError::InvalidSagaStatus {
                id: record.id.clone(),
                status,
            });
        }

        let version = record.version.next();
        sqlx::query(
            r#"
            UPDATE sagas
            SET payload = $3, status = $4, closed_at = $5, version = $6
            WHERE id = $1 AND id_class = $2
            "#,
        )
        .bind(record.id.uuid.as_uuid())
        .bind(&record.id.saga_type)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(record.closed_at)
        .bind(version.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(version)
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    #[tracing::instrument(skip(self, record), fields(saga = %record.id, version = %record.version))]
    async fn save(&self, record: &SagaRecord) -> Result<Version> {
        if record.is_new() {
            self.insert(record).await
        } else {
            self.update(record).await
        }
    }

    async fn load(&self, id: &SagaId) -> Result<SagaRecord> {
        let row = sqlx::query(
            r#"
            SELECT id, id_class, payload, status, created_at, expire_at, closed_at, version
            FROM sagas
            WHERE id = $1 AND id_class = $2
            "#,
        )
        .bind(id.uuid.as_uuid())
        .bind(&id.saga_type)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SagaError::SagaNotFound(id.clone()))?;

        Self::row_to_record(row)
    }

    async fn remove(&self, id: &SagaId) -> Result<()> {
        sqlx::query("DELETE FROM sagas WHERE id = $1 AND id_class = $2")
            .bind(id.uuid.as_uuid())
            .bind(&id.saga_type)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
