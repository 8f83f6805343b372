// handlers/protected/medication_schedule.rs - GET /medication-schedule/* handlers

use axum::extract::{Path, State};
use serde_json::Value;

use super::found;
use crate::app::AppState;
use crate::domain::{DomainStore, ResourceLookup};
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::ResourceType;

/// GET /medication-schedule/:medication_schedule_id
pub async fn schedule_get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    let record = state.domain.fetch(ResourceType::MEDICATION_SCHEDULE, id).await?;
    Ok(ApiResponse::success(found(record, "Medication schedule")?))
}

/// GET /medication-schedule/member/:member_id
pub async fn schedules_by_member_get(
    State(state): State<AppState>,
    Path(member_id): Path<i64>,
) -> ApiResult<Vec<Value>> {
    let records = state
        .domain
        .list_for_member(ResourceType::MEDICATION_SCHEDULE, member_id)
        .await?;
    Ok(ApiResponse::success(records))
}
