// handlers/protected/side_effect.rs - GET /side-effect/list handler

use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::Value;

use crate::app::AppState;
use crate::domain::DomainStore;
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::ResourceType;

#[derive(Debug, Deserialize)]
pub struct SideEffectQuery {
    pub member_id: i64,
}

/// GET /side-effect/list?member_id=
pub async fn side_effect_list(
    State(state): State<AppState>,
    Query(query): Query<SideEffectQuery>,
) -> ApiResult<Vec<Value>> {
    let records = state
        .domain
        .list_for_member(ResourceType::SIDE_EFFECT_RECORD, query.member_id)
        .await?;
    Ok(ApiResponse::success(records))
}
