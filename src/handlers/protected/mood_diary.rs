// handlers/protected/mood_diary.rs - /mood-diary handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::found;
use crate::app::AppState;
use crate::domain::{DomainStore, ResourceLookup};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::ResourceType;

/// `{"request": {"memberId": 1, "mood": "calm", "note": "..."}}`
#[derive(Debug, Deserialize)]
pub struct CreateMoodDiary {
    pub request: MoodDiaryEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodDiaryEntry {
    pub member_id: i64,
    pub mood: String,
    pub note: Option<String>,
}

/// GET /mood-diary/:mood_diary_id
pub async fn diary_get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    let record = state.domain.fetch(ResourceType::MOOD_DIARY, id).await?;
    Ok(ApiResponse::success(found(record, "Mood diary")?))
}

/// POST /mood-diary
pub async fn diary_post(
    State(state): State<AppState>,
    payload: Result<Json<CreateMoodDiary>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(CreateMoodDiary { request }) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;
    if request.mood.trim().is_empty() {
        return Err(ApiError::bad_request("mood must not be empty"));
    }

    let record = state
        .domain
        .insert(
            ResourceType::MOOD_DIARY,
            json!({
                "member_id": request.member_id,
                "mood": request.mood,
                "note": request.note,
            }),
        )
        .await?;
    Ok(ApiResponse::created(record))
}
