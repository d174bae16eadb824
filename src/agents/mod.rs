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
use crate::shared::schema::{agents, tickets};
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = agents)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AgentView {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub name: String,
}

impl From<&Agent> for AgentView {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
}

pub fn find_agent_by_name(conn: &mut PgConnection, name: &str) -> QueryResult<Option<Agent>> {
    agents::table
        .filter(agents::name.eq(name))
        .first::<Agent>(conn)
        .optional()
}

/// Unassigns every ticket held by the agent, then deletes the agent row.
pub fn remove_agent(conn: &mut PgConnection, agent_id: Uuid) -> Result<(), ApiError> {
    let existing: Option<Agent> = agents::table.find(agent_id).first(conn).optional()?;
    if existing.is_none() {
        return Err(ApiError::NotFound("Agent not found".to_string()));
    }

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let now = Utc::now();
        diesel::update(tickets::table.filter(tickets::assigned_to.eq(agent_id)))
            .set((
                tickets::assigned_to.eq(None::<Uuid>),
                tickets::last_updated_date.eq(now),
            ))
            .execute(conn)?;
        diesel::delete(agents::table.find(agent_id)).execute(conn)?;
        Ok(())
    })?;
    Ok(())
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentView>>, ApiError> {
    let mut conn = state.db()?;

    let rows: Vec<Agent> = agents::table.order(agents::name.asc()).load(&mut conn)?;

    Ok(Json(rows.iter().map(AgentView::from).collect()))
}

pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(name): Json<String>,
) -> Result<(StatusCode, Json<AgentView>), ApiError> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("Agent name is required".to_string()));
    }

    let mut conn = state.db()?;

    if find_agent_by_name(&mut conn, &name)?.is_some() {
        return Err(ApiError::Conflict(
            "Agent with this name already exists".to_string(),
        ));
    }

    let agent = Agent {
        id: Uuid::new_v4(),
        name,
        created_at: Utc::now(),
    };

    diesel::insert_into(agents::table)
        .values(&agent)
        .execute(&mut conn)?;

    Ok((StatusCode::CREATED, Json(AgentView::from(&agent))))
}

pub async fn update_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<Json<AgentView>, ApiError> {
    let mut conn = state.db()?;

    let mut agent: Agent = agents::table
        .find(id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Agent not found".to_string()))?;

    if let Some(name) = req.name {
        let taken: Option<Agent> = agents::table
            .filter(agents::name.eq(&name))
            .filter(agents::id.ne(id))
            .first(&mut conn)
            .optional()?;
        if taken.is_some() {
            return Err(ApiError::Conflict(
                "Agent with this name already exists".to_string(),
            ));
        }
        diesel::update(agents::table.find(id))
            .set(agents::name.eq(&name))
            .execute(&mut conn)?;
        agent.name = name;
    }

    Ok(Json(AgentView::from(&agent)))
}

pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.db()?;
    remove_agent(&mut conn, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_agents_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", get(list_agents).post(create_agent))
        .route("/agents/:id", put(update_agent).delete(delete_agent))
}
