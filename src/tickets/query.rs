use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use super::{Ticket, TicketPriority, TicketStatus};
use crate::shared::schema::{agents, ticket_tags, tickets};

/// Raw query parameters as they arrive on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(rename = "ticketStatus")]
    pub ticket_status: Option<String>,
    pub priority: Option<String>,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<String>,
    /// JSON-encoded array of tag objects, e.g. `[{"ID":"..."}]`.
    pub tags: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
}

/// Validated filter options, parsed once at the boundary. All predicates are
/// optional and combine conjunctively.
#[derive(Debug, Default)]
pub struct TicketFilter {
    pub search: Option<String>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    /// Agent name; an unknown name yields an empty result set.
    pub assigned_to: Option<String>,
    /// Tickets carrying at least one of these tags match.
    pub tag_ids: Option<Vec<Uuid>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Set when a status/priority value outside its domain was supplied;
    /// such a filter can never match a persisted row.
    unsatisfiable: bool,
}

impl TicketFilter {
    pub fn from_query(raw: &ListQuery) -> Self {
        let mut filter = Self::default();

        if let Some(search) = &raw.search {
            let trimmed = search.trim();
            if !trimmed.is_empty() {
                filter.search = Some(trimmed.to_string());
            }
        }

        if let Some(status) = raw.ticket_status.as_deref().filter(|s| !s.is_empty()) {
            match TicketStatus::parse(status) {
                Some(parsed) => filter.status = Some(parsed),
                None => filter.unsatisfiable = true,
            }
        }

        if let Some(priority) = raw.priority.as_deref().filter(|s| !s.is_empty()) {
            match TicketPriority::parse(priority) {
                Some(parsed) => filter.priority = Some(parsed),
                None => filter.unsatisfiable = true,
            }
        }

        if let Some(name) = raw.assigned_to.as_deref().filter(|s| !s.is_empty()) {
            filter.assigned_to = Some(name.to_string());
        }

        if let Some(tags_param) = &raw.tags {
            filter.tag_ids = parse_tag_ids(tags_param);
        }

        // Malformed dates drop the bound instead of failing the request.
        filter.start_date = raw.start_date.as_deref().and_then(parse_date);
        filter.end_date = raw.end_date.as_deref().and_then(parse_date);

        filter
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.unsatisfiable
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Extracts tag ids from the wire shape `[{"ID": "<uuid>"}, ...]`. Entries
/// without a parseable ID are skipped; malformed JSON or an empty id list
/// means the tag filter is not applied.
fn parse_tag_ids(value: &str) -> Option<Vec<Uuid>> {
    let items: Vec<serde_json::Value> = serde_json::from_str(value).ok()?;
    let ids: Vec<Uuid> = items
        .iter()
        .filter_map(|item| item.get("ID")?.as_str()?.parse().ok())
        .collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

/// Runs the filtered listing: conjunctive predicates over a dynamically built
/// query, ordered by last update, newest first. No pagination.
pub fn search_tickets(
    conn: &mut PgConnection,
    filter: &TicketFilter,
) -> Result<Vec<Ticket>, diesel::result::Error> {
    if filter.is_unsatisfiable() {
        return Ok(Vec::new());
    }

    let mut q = tickets::table.into_boxed();

    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search);
        q = q.filter(
            tickets::customer_name
                .ilike(pattern.clone())
                .or(tickets::marketplace_conversation_id.ilike(pattern)),
        );
    }

    if let Some(status) = filter.status {
        q = q.filter(tickets::ticket_status.eq(status.as_str()));
    }

    if let Some(priority) = filter.priority {
        q = q.filter(tickets::priority.eq(priority.as_str()));
    }

    if let Some(name) = &filter.assigned_to {
        let agent_id: Option<Uuid> = agents::table
            .filter(agents::name.eq(name))
            .select(agents::id)
            .first(conn)
            .optional()?;
        match agent_id {
            Some(id) => q = q.filter(tickets::assigned_to.eq(id)),
            None => return Ok(Vec::new()),
        }
    }

    if let Some(tag_ids) = &filter.tag_ids {
        let tagged = ticket_tags::table
            .filter(ticket_tags::tag_id.eq_any(tag_ids.clone()))
            .select(ticket_tags::ticket_id);
        q = q.filter(tickets::ticket_id.eq_any(tagged));
    }

    if let Some(start) = filter.start_date {
        q = q.filter(tickets::conversation_start_date.ge(start));
    }

    if let Some(end) = filter.end_date {
        q = q.filter(tickets::conversation_start_date.le(end));
    }

    q.order(tickets::last_updated_date.desc()).load(conn)
}
