//! Inspection and cancellation of scheduled operations.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use scheduler::{ScheduledOperation, ScheduledOperationId};
use serde::Serialize;
use transport::Message;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub id: String,
    pub processing_date: DateTime<Utc>,
    pub is_sent: bool,
    pub command: Message,
}

impl From<ScheduledOperation> for OperationResponse {
    fn from(op: ScheduledOperation) -> Self {
        Self {
            id: op.id.as_str().to_string(),
            processing_date: op.date,
            is_sent: op.is_sent,
            command: op.command,
        }
    }
}

/// GET /scheduler/operations/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let op = state
        .scheduler
        .get(&ScheduledOperationId::new(id.as_str()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Scheduled operation not found: {id}")))?;
    Ok(Json(op.into()))
}

/// DELETE /scheduler/operations/{id}. Responds with the cancelled operation.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, ApiError> {
    let op = state
        .scheduler
        .extract(&ScheduledOperationId::new(id))
        .await?;
    metrics::counter!("scheduler_operations_cancelled_total").increment(1);
    tracing::info!(id = %op.id, "scheduled operation cancelled");
    Ok(Json(op.into()))
}
