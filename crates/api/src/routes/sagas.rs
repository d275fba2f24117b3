//! Read access to persisted sagas.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{SagaId, SagaUuid, Version};
use saga::{SagaError, SagaRecord, SagaStatus, SagaStoreExt};
use serde::Serialize;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct SagaResponse {
    pub id: String,
    pub saga_type: String,
    pub uuid: SagaUuid,
    pub status: SagaStatus,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: Version,
    pub state: serde_json::Value,
}

impl TryFrom<SagaRecord> for SagaResponse {
    type Error = serde_json::Error;

    fn try_from(record: SagaRecord) -> Result<Self, Self::Error> {
        let state = record.state_json()?;
        Ok(Self {
            id: record.id.to_string(),
            saga_type: record.id.saga_type,
            uuid: record.id.uuid,
            status: record.status,
            created_at: record.created_at,
            expire_at: record.expire_at,
            closed_at: record.closed_at,
            version: record.version,
            state,
        })
    }
}

/// GET /sagas/{saga_type}/{uuid}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((saga_type, uuid)): Path<(String, String)>,
) -> Result<Json<SagaResponse>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga uuid: {e}")))?;
    let id = SagaId::new(SagaUuid::from_uuid(uuid), saga_type);

    let record = state
        .sagas
        .find(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga not found: {id}")))?;

    let response = SagaResponse::try_from(record).map_err(SagaError::from)?;
    Ok(Json(response))
}
