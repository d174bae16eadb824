use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ApiError;
use crate::shared::schema::faq_auto_responses;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = faq_auto_responses)]
pub struct FaqAutoResponse {
    pub id: Uuid,
    pub faq_auto_response: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FaqAutoResponseView {
    #[serde(rename = "ID")]
    pub id: Uuid,
    #[serde(rename = "faqAutoResponse")]
    pub faq_auto_response: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFaqRequest {
    #[serde(rename = "faqAutoResponse")]
    pub faq_auto_response: Option<String>,
}

/// Returns the auto-response text. A seed migration guarantees the single row,
/// so an empty table means the database was provisioned out of band.
pub async fn get_faq_auto_response(
    State(state): State<Arc<AppState>>,
) -> Result<Json<String>, ApiError> {
    let mut conn = state.db()?;

    let row: Option<FaqAutoResponse> = faq_auto_responses::table.first(&mut conn).optional()?;

    match row {
        Some(faq) => Ok(Json(faq.faq_auto_response)),
        None => Err(ApiError::Internal(
            "FAQ auto response is not configured".to_string(),
        )),
    }
}

pub async fn update_faq_auto_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateFaqRequest>,
) -> Result<Json<FaqAutoResponseView>, ApiError> {
    let mut conn = state.db()?;

    let mut row: FaqAutoResponse = faq_auto_responses::table
        .find(id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("FAQ auto response not found".to_string()))?;

    if let Some(text) = req.faq_auto_response {
        diesel::update(faq_auto_responses::table.find(id))
            .set((
                faq_auto_responses::faq_auto_response.eq(&text),
                faq_auto_responses::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        row.faq_auto_response = text;
    }

    Ok(Json(FaqAutoResponseView {
        id: row.id,
        faq_auto_response: row.faq_auto_response,
    }))
}

pub fn configure_faq_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/faqAutoResponse", get(get_faq_auto_response))
        .route("/faqAutoResponse/:id", put(update_faq_auto_response))
}
