pub mod query;

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::agents::{find_agent_by_name, Agent};
use crate::shared::error::ApiError;
use crate::shared::schema::{agents, messages, tags, ticket_tags, tickets};
use crate::shared::state::AppState;
use crate::tags::{Tag, TagView};

use self::query::{search_tickets, ListQuery, TicketFilter};

pub const STATUS_NEW: &str = "New";
pub const STATUS_IN_PROGRESS: &str = "In Progress";
pub const STATUS_COMPLETED: &str = "Completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    New,
    InProgress,
    Completed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => STATUS_NEW,
            Self::InProgress => STATUS_IN_PROGRESS,
            Self::Completed => STATUS_COMPLETED,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            STATUS_NEW => Some(Self::New),
            STATUS_IN_PROGRESS => Some(Self::InProgress),
            STATUS_COMPLETED => Some(Self::Completed),
            _ => None,
        }
    }

    /// Status after an agent reply: a fresh ticket moves to In Progress,
    /// anything else keeps its status.
    pub fn after_reply(self) -> Self {
        match self {
            Self::New => Self::InProgress,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketPriority {
    Low,
    Medium,
    High,
}

impl TicketPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Low" => Some(Self::Low),
            "Medium" => Some(Self::Medium),
            "High" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub ticket_id: Uuid,
    pub marketplace: String,
    pub marketplace_conversation_id: String,
    pub customer_name: String,
    pub priority: String,
    pub ticket_status: String,
    pub assigned_to: Option<Uuid>,
    pub conversation_start_date: DateTime<Utc>,
    pub last_updated_date: DateTime<Utc>,
    pub order_history: serde_json::Value,
    pub related_listing_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i64,
    pub ticket_id: Uuid,
    pub message: String,
    pub authored: bool,
    pub date: DateTime<Utc>,
    pub image_attachments: serde_json::Value,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub ticket_id: Uuid,
    pub message: String,
    pub authored: bool,
    pub date: DateTime<Utc>,
    pub image_attachments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Queryable, Insertable)]
#[diesel(table_name = ticket_tags)]
pub struct TicketTagLink {
    pub ticket_id: Uuid,
    pub tag_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub message: String,
    pub authored: bool,
    pub date: DateTime<Utc>,
    #[serde(rename = "imageAttachments")]
    pub image_attachments: serde_json::Value,
}

impl From<&Message> for MessageView {
    fn from(msg: &Message) -> Self {
        Self {
            message: msg.message.clone(),
            authored: msg.authored,
            date: msg.date,
            image_attachments: if msg.image_attachments.is_null() {
                serde_json::json!([])
            } else {
                msg.image_attachments.clone()
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TicketView {
    #[serde(rename = "ticketID")]
    pub ticket_id: Uuid,
    pub marketplace: String,
    #[serde(rename = "marketplaceConversationID")]
    pub marketplace_conversation_id: String,
    #[serde(rename = "customerName")]
    pub customer_name: String,
    pub priority: String,
    #[serde(rename = "ticketStatus")]
    pub ticket_status: String,
    #[serde(rename = "assignedTo")]
    pub assigned_to: String,
    pub tags: Vec<TagView>,
    #[serde(rename = "conversationStartDate")]
    pub conversation_start_date: DateTime<Utc>,
    #[serde(rename = "lastUpdatedDate")]
    pub last_updated_date: DateTime<Utc>,
    pub messages: Vec<MessageView>,
    #[serde(rename = "orderHistory")]
    pub order_history: serde_json::Value,
    #[serde(rename = "relatedListingURL")]
    pub related_listing_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TagRef {
    #[serde(rename = "ID")]
    pub id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTicketRequest {
    pub priority: Option<String>,
    #[serde(rename = "ticketStatus")]
    pub ticket_status: Option<String>,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<String>,
    #[serde(rename = "relatedListingURL")]
    pub related_listing_url: Option<String>,
    pub tags: Option<Vec<TagRef>>,
}

/// Refresh a ticket's last-updated stamp. Every mutation path funnels through
/// this (or sets the column in the same statement) so no path can miss it.
pub fn stamp_last_updated(conn: &mut PgConnection, ticket_id: Uuid) -> QueryResult<usize> {
    diesel::update(tickets::table.find(ticket_id))
        .set(tickets::last_updated_date.eq(Utc::now()))
        .execute(conn)
}

fn find_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Ticket, ApiError> {
    tickets::table
        .find(ticket_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".to_string()))
}

/// Applies a partial update document: only supplied fields change. Unresolvable
/// agent names and tag ids are skipped silently unless `strict` is set.
pub fn apply_update(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    req: &UpdateTicketRequest,
    strict: bool,
) -> Result<Ticket, ApiError> {
    find_ticket(conn, ticket_id)?;

    if let Some(priority) = &req.priority {
        if TicketPriority::parse(priority).is_none() {
            return Err(ApiError::Validation(format!(
                "Invalid priority: {}",
                priority
            )));
        }
    }
    if let Some(status) = &req.ticket_status {
        if TicketStatus::parse(status).is_none() {
            return Err(ApiError::Validation(format!(
                "Invalid ticket status: {}",
                status
            )));
        }
    }

    // None = leave assignment alone, Some(None) = unassign, Some(Some(id)) = assign.
    let assignee_change: Option<Option<Uuid>> = match &req.assigned_to {
        None => None,
        Some(name) if name.is_empty() => Some(None),
        Some(name) => match find_agent_by_name(conn, name)? {
            Some(agent) => Some(Some(agent.id)),
            None if strict => {
                return Err(ApiError::Validation(format!("Unknown agent: {}", name)));
            }
            None => None,
        },
    };

    let tag_change: Option<Vec<Uuid>> = match &req.tags {
        None => None,
        Some(refs) => {
            let mut ids: Vec<Uuid> = refs.iter().map(|r| r.id).collect();
            ids.sort_unstable();
            ids.dedup();
            let found: Vec<Uuid> = tags::table
                .filter(tags::id.eq_any(&ids))
                .select(tags::id)
                .load(conn)?;
            if strict && found.len() != ids.len() {
                return Err(ApiError::Validation(
                    "Unknown tag id in tag list".to_string(),
                ));
            }
            Some(found)
        }
    };

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        if let Some(priority) = &req.priority {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::priority.eq(priority))
                .execute(conn)?;
        }

        if let Some(status) = &req.ticket_status {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::ticket_status.eq(status))
                .execute(conn)?;
        }

        if let Some(assignee) = assignee_change {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::assigned_to.eq(assignee))
                .execute(conn)?;
        }

        if let Some(url) = &req.related_listing_url {
            diesel::update(tickets::table.find(ticket_id))
                .set(tickets::related_listing_url.eq(url))
                .execute(conn)?;
        }

        if let Some(tag_ids) = &tag_change {
            diesel::delete(ticket_tags::table.filter(ticket_tags::ticket_id.eq(ticket_id)))
                .execute(conn)?;
            let links: Vec<TicketTagLink> = tag_ids
                .iter()
                .map(|tag_id| TicketTagLink {
                    ticket_id,
                    tag_id: *tag_id,
                })
                .collect();
            if !links.is_empty() {
                diesel::insert_into(ticket_tags::table)
                    .values(&links)
                    .execute(conn)?;
            }
        }

        stamp_last_updated(conn, ticket_id)?;
        Ok(())
    })?;

    find_ticket(conn, ticket_id)
}

/// Appends an agent reply to the ticket's thread and moves a New ticket to
/// In Progress. The message, status change, and timestamp land atomically.
pub fn append_reply(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    text: &str,
) -> Result<Ticket, ApiError> {
    let ticket = find_ticket(conn, ticket_id)?;

    if text.trim().is_empty() {
        return Err(ApiError::Validation("Reply message is required".to_string()));
    }

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let now = Utc::now();

        diesel::insert_into(messages::table)
            .values(&NewMessage {
                ticket_id,
                message: text.to_string(),
                authored: true,
                date: now,
                image_attachments: serde_json::json!([]),
            })
            .execute(conn)?;

        if let Some(status) = TicketStatus::parse(&ticket.ticket_status) {
            let next = status.after_reply();
            if next != status {
                diesel::update(tickets::table.find(ticket_id))
                    .set(tickets::ticket_status.eq(next.as_str()))
                    .execute(conn)?;
            }
        }

        diesel::update(tickets::table.find(ticket_id))
            .set(tickets::last_updated_date.eq(now))
            .execute(conn)?;
        Ok(())
    })?;

    find_ticket(conn, ticket_id)
}

/// Assembles full ticket representations for a result set with batched
/// lookups: one query each for messages, tag links, tags, and assignee names.
pub fn load_ticket_views(
    conn: &mut PgConnection,
    rows: Vec<Ticket>,
) -> Result<Vec<TicketView>, ApiError> {
    let ids: Vec<Uuid> = rows.iter().map(|t| t.ticket_id).collect();

    let message_rows: Vec<Message> = messages::table
        .filter(messages::ticket_id.eq_any(&ids))
        .order(messages::date.asc())
        .load(conn)?;
    let mut messages_by_ticket: HashMap<Uuid, Vec<MessageView>> = HashMap::new();
    for msg in &message_rows {
        messages_by_ticket
            .entry(msg.ticket_id)
            .or_default()
            .push(MessageView::from(msg));
    }

    let links: Vec<TicketTagLink> = ticket_tags::table
        .filter(ticket_tags::ticket_id.eq_any(&ids))
        .load(conn)?;
    let tag_ids: Vec<Uuid> = links.iter().map(|l| l.tag_id).collect();
    let tag_rows: Vec<Tag> = tags::table.filter(tags::id.eq_any(&tag_ids)).load(conn)?;
    let tags_by_id: HashMap<Uuid, &Tag> = tag_rows.iter().map(|t| (t.id, t)).collect();
    let mut tags_by_ticket: HashMap<Uuid, Vec<TagView>> = HashMap::new();
    for link in &links {
        if let Some(tag) = tags_by_id.get(&link.tag_id) {
            tags_by_ticket
                .entry(link.ticket_id)
                .or_default()
                .push(TagView::from(*tag));
        }
    }

    let agent_ids: Vec<Uuid> = rows.iter().filter_map(|t| t.assigned_to).collect();
    let agent_rows: Vec<Agent> = agents::table
        .filter(agents::id.eq_any(&agent_ids))
        .load(conn)?;
    let agent_names: HashMap<Uuid, String> =
        agent_rows.into_iter().map(|a| (a.id, a.name)).collect();

    Ok(rows
        .into_iter()
        .map(|ticket| {
            let assigned_to = ticket
                .assigned_to
                .and_then(|id| agent_names.get(&id).cloned())
                .unwrap_or_default();
            let order_history = if ticket.order_history.is_null() {
                serde_json::json!([])
            } else {
                ticket.order_history.clone()
            };
            TicketView {
                ticket_id: ticket.ticket_id,
                marketplace: ticket.marketplace,
                marketplace_conversation_id: ticket.marketplace_conversation_id,
                customer_name: ticket.customer_name,
                priority: ticket.priority,
                ticket_status: ticket.ticket_status,
                assigned_to,
                tags: tags_by_ticket.remove(&ticket.ticket_id).unwrap_or_default(),
                conversation_start_date: ticket.conversation_start_date,
                last_updated_date: ticket.last_updated_date,
                messages: messages_by_ticket
                    .remove(&ticket.ticket_id)
                    .unwrap_or_default(),
                order_history,
                related_listing_url: ticket.related_listing_url,
            }
        })
        .collect())
}

fn load_one_view(conn: &mut PgConnection, ticket: Ticket) -> Result<TicketView, ApiError> {
    let mut views = load_ticket_views(conn, vec![ticket])?;
    views
        .pop()
        .ok_or_else(|| ApiError::Internal("Ticket view assembly failed".to_string()))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<ListQuery>,
) -> Result<Json<Vec<TicketView>>, ApiError> {
    let filter = TicketFilter::from_query(&raw);
    let mut conn = state.db()?;

    let rows = search_tickets(&mut conn, &filter)?;
    let views = load_ticket_views(&mut conn, rows)?;

    Ok(Json(views))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<TicketView>, ApiError> {
    let mut conn = state.db()?;

    let ticket = apply_update(&mut conn, id, &req, state.config.strict_references)?;

    Ok(Json(load_one_view(&mut conn, ticket)?))
}

pub async fn reply_to_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(text): Json<String>,
) -> Result<Json<TicketView>, ApiError> {
    let mut conn = state.db()?;

    // NOTE: outbound delivery to the marketplace messaging API would happen
    // here; the reply is only recorded locally.
    let ticket = append_reply(&mut conn, id, &text)?;

    Ok(Json(load_one_view(&mut conn, ticket)?))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets", get(list_tickets))
        .route("/tickets/:id", put(update_ticket))
        .route("/tickets/:id/reply", put(reply_to_ticket))
}
