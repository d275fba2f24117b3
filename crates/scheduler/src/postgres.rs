use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    NextScheduledOperation, Result, ScheduledOperation, ScheduledOperationId,
    ScheduledOperationRow, SchedulerError, store::SchedulerStore,
};

/// PostgreSQL-backed scheduler store implementation.
///
/// Several processes may share one database. The conditional update in the
/// claim step guarantees that a due operation is handed to exactly one of them.
#[derive(Clone)]
pub struct PostgresSchedulerStore {
    pool: PgPool,
}

impl PostgresSchedulerStore {
    /// Creates a new PostgreSQL scheduler store.
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

    fn row_to_operation(row: PgRow) -> Result<ScheduledOperation> {
        ScheduledOperation::from_row(ScheduledOperationRow {
            id: row.try_get("id")?,
            processing_date: row.try_get("processing_date")?,
            command: row.try_get("command")?,
            is_sent: row.try_get("is_sent")?,
        })
    }

    async fn claim_next_in(conn: &mut PgConnection) -> Result<Option<NextScheduledOperation>> {
        let candidate = sqlx::query(
            r#"
            SELECT id, processing_date, command, is_sent
            FROM scheduled_operations
            WHERE is_sent = 0
            ORDER BY processing_date ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = candidate else {
            return Ok(None);
        };
        let operation = Self::row_to_operation(row)?;

        // Blocks behind a concurrent claimer and re-checks the flag once it commits.
        let claimed = sqlx::query(
            "UPDATE scheduled_operations SET is_sent = 1 WHERE id = $1 AND is_sent = 0",
        )
        .bind(operation.id.as_str())
        .execute(&mut *conn)
        .await?;

        if claimed.rows_affected() != 1 {
            tracing::debug!(id = %operation.id, "claim lost to another store instance");
            return Ok(None);
        }

        Ok(Some(operation.into()))
    }
}

#[async_trait]
impl SchedulerStore for PostgresSchedulerStore {
    #[tracing::instrument(skip(self, operation), fields(id = %operation.id))]
    async fn add(&self, operation: ScheduledOperation) -> Result<Option<NextScheduledOperation>> {
        let row = operation.to_row()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_operations (id, processing_date, command, is_sent)
            VALUES ($1, $2, $3, 0)
            "#,
        )
        .bind(&row.id)
        .bind(row.processing_date)
        .bind(&row.command)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return SchedulerError::DuplicateOperation(operation.id.clone());
            }
            SchedulerError::Storage(e)
        })?;

        let next = Self::claim_next_in(&mut tx).await?;
        tx.commit().await?;
        Ok(next)
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, id: &ScheduledOperationId) -> Result<Option<NextScheduledOperation>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM scheduled_operations WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        let next = Self::claim_next_in(&mut tx).await?;
        tx.commit().await?;
        Ok(next)
    }

    #[tracing::instrument(skip(self))]
    async fn extract(
        &self,
        id: &ScheduledOperationId,
    ) -> Result<(ScheduledOperation, Option<NextScheduledOperation>)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, processing_date, command, is_sent
            FROM scheduled_operations
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SchedulerError::ScheduledOperationNotFound(id.clone()))?;
        let operation = Self::row_to_operation(row)?;

        sqlx::query("DELETE FROM scheduled_operations WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        let next = Self::claim_next_in(&mut tx).await?;
        tx.commit().await?;
        Ok((operation, next))
    }

    async fn claim_next(&self) -> Result<Option<NextScheduledOperation>> {
        let mut tx = self.pool.begin().await?;
        let next = Self::claim_next_in(&mut tx).await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn get(&self, id: &ScheduledOperationId) -> Result<Option<ScheduledOperation>> {
        let row = sqlx::query(
            r#"
            SELECT id, processing_date, command, is_sent
            FROM scheduled_operations
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_operation).transpose()
    }
}
