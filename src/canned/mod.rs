use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ApiError;
use crate::shared::schema::canned_responses;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = canned_responses)]
pub struct CannedResponse {
    pub id: Uuid,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CannedResponseView {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub response: String,
}

impl From<&CannedResponse> for CannedResponseView {
    fn from(row: &CannedResponse) -> Self {
        Self {
            id: row.id,
            response: row.response.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateCannedResponseRequest {
    pub response: Option<String>,
}

pub async fn list_canned_responses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CannedResponseView>>, ApiError> {
    let mut conn = state.db()?;

    let rows: Vec<CannedResponse> = canned_responses::table
        .order(canned_responses::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(rows.iter().map(CannedResponseView::from).collect()))
}

pub async fn create_canned_response(
    State(state): State<Arc<AppState>>,
    Json(text): Json<String>,
) -> Result<(StatusCode, Json<CannedResponseView>), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::Validation("Response text is required".to_string()));
    }

    let mut conn = state.db()?;

    let row = CannedResponse {
        id: Uuid::new_v4(),
        response: text,
        created_at: Utc::now(),
    };

    diesel::insert_into(canned_responses::table)
        .values(&row)
        .execute(&mut conn)?;

    Ok((StatusCode::CREATED, Json(CannedResponseView::from(&row))))
}

pub async fn update_canned_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCannedResponseRequest>,
) -> Result<Json<CannedResponseView>, ApiError> {
    let mut conn = state.db()?;

    let mut row: CannedResponse = canned_responses::table
        .find(id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Canned response not found".to_string()))?;

    if let Some(response) = req.response {
        diesel::update(canned_responses::table.find(id))
            .set(canned_responses::response.eq(&response))
            .execute(&mut conn)?;
        row.response = response;
    }

    Ok(Json(CannedResponseView::from(&row)))
}

pub async fn delete_canned_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.db()?;

    let existing: Option<CannedResponse> = canned_responses::table
        .find(id)
        .first(&mut conn)
        .optional()?;
    if existing.is_none() {
        return Err(ApiError::NotFound("Canned response not found".to_string()));
    }

    diesel::delete(canned_responses::table.find(id)).execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_canned_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/cannedResponses",
            get(list_canned_responses).post(create_canned_response),
        )
        .route(
            "/cannedResponses/:id",
            put(update_canned_response).delete(delete_canned_response),
        )
}
