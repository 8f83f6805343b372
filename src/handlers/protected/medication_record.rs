// handlers/protected/medication_record.rs - /medication-record handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::found;
use crate::app::AppState;
use crate::auth::Principal;
use crate::domain::{DomainStore, ResourceLookup};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::ResourceType;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMedicationRecord {
    pub medication_schedule_id: i64,
    #[serde(default)]
    pub taken: bool,
    pub taken_at: Option<String>,
    pub note: Option<String>,
}

/// GET /medication-record/:medication_record_id
pub async fn record_get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    let record = state.domain.fetch(ResourceType::MEDICATION_RECORD, id).await?;
    Ok(ApiResponse::success(found(record, "Medication record")?))
}

/// POST /medication-record
///
/// The gate has already checked that the caller owns `medicationScheduleId`.
pub async fn record_post(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<CreateMedicationRecord>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;

    let record = state
        .domain
        .insert(
            ResourceType::MEDICATION_RECORD,
            json!({
                "medication_schedule_id": request.medication_schedule_id,
                "taken": request.taken,
                "taken_at": request.taken_at,
                "note": request.note,
            }),
        )
        .await?;

    info!(
        member_id = principal.member_id,
        medication_schedule_id = request.medication_schedule_id,
        id = ?record.get("id"),
        "Medication record created"
    );
    Ok(ApiResponse::created(record))
}
