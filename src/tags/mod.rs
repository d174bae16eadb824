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
use crate::shared::schema::tags;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tags)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TagView {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

impl From<&Tag> for TagView {
    fn from(tag: &Tag) -> Self {
        Self {
            id: tag.id,
            name: tag.name.clone(),
            color: tag.color.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTagRequest {
    pub name: Option<String>,
    pub color: Option<String>,
}

pub async fn list_tags(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TagView>>, ApiError> {
    let mut conn = state.db()?;

    let rows: Vec<Tag> = tags::table.order(tags::name.asc()).load(&mut conn)?;

    Ok(Json(rows.iter().map(TagView::from).collect()))
}

pub async fn create_tag(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTagRequest>,
) -> Result<(StatusCode, Json<TagView>), ApiError> {
    if req.name.trim().is_empty() || req.color.trim().is_empty() {
        return Err(ApiError::Validation(
            "Name and color are required".to_string(),
        ));
    }

    let mut conn = state.db()?;

    let existing: Option<Tag> = tags::table
        .filter(tags::name.eq(&req.name))
        .first(&mut conn)
        .optional()?;
    if existing.is_some() {
        return Err(ApiError::Conflict(
            "Tag with this name already exists".to_string(),
        ));
    }

    let tag = Tag {
        id: Uuid::new_v4(),
        name: req.name,
        color: req.color,
        created_at: Utc::now(),
    };

    diesel::insert_into(tags::table)
        .values(&tag)
        .execute(&mut conn)?;

    Ok((StatusCode::CREATED, Json(TagView::from(&tag))))
}

pub async fn update_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTagRequest>,
) -> Result<Json<TagView>, ApiError> {
    let mut conn = state.db()?;

    let mut tag: Tag = tags::table
        .find(id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Tag not found".to_string()))?;

    if let Some(name) = req.name {
        let taken: Option<Tag> = tags::table
            .filter(tags::name.eq(&name))
            .filter(tags::id.ne(id))
            .first(&mut conn)
            .optional()?;
        if taken.is_some() {
            return Err(ApiError::Conflict(
                "Tag with this name already exists".to_string(),
            ));
        }
        diesel::update(tags::table.find(id))
            .set(tags::name.eq(&name))
            .execute(&mut conn)?;
        tag.name = name;
    }

    if let Some(color) = req.color {
        diesel::update(tags::table.find(id))
            .set(tags::color.eq(&color))
            .execute(&mut conn)?;
        tag.color = color;
    }

    Ok(Json(TagView::from(&tag)))
}

pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.db()?;

    let existing: Option<Tag> = tags::table.find(id).first(&mut conn).optional()?;
    if existing.is_none() {
        return Err(ApiError::NotFound("Tag not found".to_string()));
    }

    // Association rows vanish via ON DELETE CASCADE; tickets are untouched.
    diesel::delete(tags::table.find(id)).execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_tags_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/:id", put(update_tag).delete(delete_tag))
}
