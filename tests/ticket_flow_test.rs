//! End-to-end checks against a live Postgres database. Every test skips
//! itself when DATABASE_URL is not reachable, so the suite stays green on
//! machines without a database.

use std::sync::{Arc, OnceLock};

use axum::extract::{Json, State};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use deskserver::agents::{create_agent, remove_agent, Agent};
use deskserver::config::{AppConfig, DatabaseConfig, FetcherConfig, ServerConfig};
use deskserver::fetcher::{ingest_conversation, FetchedConversation, FetchedMessage, IngestOutcome};
use deskserver::shared::schema::{agents, messages, ticket_tags, tickets};
use deskserver::shared::state::AppState;
use deskserver::shared::utils::{create_conn, run_migrations, DbPool};
use deskserver::tags::{create_tag, CreateTagRequest, Tag};
use deskserver::tickets::query::{search_tickets, ListQuery, TicketFilter};
use deskserver::tickets::{
    append_reply, apply_update, TagRef, Ticket, TicketStatus, UpdateTicketRequest,
};

static POOL: OnceLock<Option<DbPool>> = OnceLock::new();

fn test_pool() -> Option<DbPool> {
    POOL.get_or_init(|| {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = create_conn(&url, 4).ok()?;
        run_migrations(&pool).ok()?;
        Some(pool)
    })
    .clone()
}

fn test_state(pool: DbPool) -> Arc<AppState> {
    let config = AppConfig {
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 4,
        },
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        fetcher: FetcherConfig {
            interval_minutes: 5,
            api_url: None,
            api_key: None,
        },
        strict_references: false,
    };
    Arc::new(AppState::new(config, pool))
}

fn marker() -> String {
    Uuid::new_v4().simple().to_string()
}

fn insert_ticket(
    conn: &mut PgConnection,
    customer_name: &str,
    priority: &str,
    status: &str,
) -> Ticket {
    let now = Utc::now();
    let ticket = Ticket {
        ticket_id: Uuid::new_v4(),
        marketplace: "Reverb".to_string(),
        marketplace_conversation_id: format!("conv-{}", Uuid::new_v4().simple()),
        customer_name: customer_name.to_string(),
        priority: priority.to_string(),
        ticket_status: status.to_string(),
        assigned_to: None,
        conversation_start_date: now,
        last_updated_date: now,
        order_history: serde_json::json!([]),
        related_listing_url: None,
    };
    diesel::insert_into(tickets::table)
        .values(&ticket)
        .execute(conn)
        .unwrap();
    ticket
}

fn insert_tag(conn: &mut PgConnection, name: &str) -> Tag {
    let tag = Tag {
        id: Uuid::new_v4(),
        name: name.to_string(),
        color: "#808080".to_string(),
        created_at: Utc::now(),
    };
    diesel::insert_into(deskserver::shared::schema::tags::table)
        .values(&tag)
        .execute(conn)
        .unwrap();
    tag
}

fn conversation(id: &str, customer: &str, texts: &[&str]) -> FetchedConversation {
    let base = Utc::now() - Duration::hours(1);
    FetchedConversation {
        marketplace: "eBay".to_string(),
        marketplace_conversation_id: id.to_string(),
        customer_name: customer.to_string(),
        order_history: serde_json::json!([]),
        related_listing_url: None,
        messages: texts
            .iter()
            .enumerate()
            .map(|(i, text)| FetchedMessage {
                message: (*text).to_string(),
                authored: false,
                date: base + Duration::minutes(i as i64),
                image_attachments: serde_json::json!([]),
            })
            .collect(),
    }
}

#[test]
fn ingestion_deduplicates_by_conversation_id() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let conv_id = format!("conv-{}", marker());
    let conv = conversation(&conv_id, "Dana", &["Hello", "Anyone there?"]);

    assert_eq!(
        ingest_conversation(&mut conn, &conv).unwrap(),
        IngestOutcome::Created
    );
    // Re-ingesting the identical batch must not create rows.
    assert_eq!(
        ingest_conversation(&mut conn, &conv).unwrap(),
        IngestOutcome::Unchanged
    );

    let count: i64 = tickets::table
        .filter(tickets::marketplace_conversation_id.eq(&conv_id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(count, 1);

    // A new message in the same conversation is appended to the ticket.
    let mut extended = conv.clone();
    extended.messages.push(FetchedMessage {
        message: "Following up".to_string(),
        authored: false,
        date: Utc::now(),
        image_attachments: serde_json::json!([]),
    });
    assert_eq!(
        ingest_conversation(&mut conn, &extended).unwrap(),
        IngestOutcome::Updated
    );

    let ticket: Ticket = tickets::table
        .filter(tickets::marketplace_conversation_id.eq(&conv_id))
        .first(&mut conn)
        .unwrap();
    let message_count: i64 = messages::table
        .filter(messages::ticket_id.eq(ticket.ticket_id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(message_count, 3);
}

#[test]
fn duplicate_conversation_id_violates_unique_constraint() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let first = insert_ticket(&mut conn, "Pat", "Medium", "New");
    let mut clone = first.clone();
    clone.ticket_id = Uuid::new_v4();
    let result = diesel::insert_into(tickets::table)
        .values(&clone)
        .execute(&mut conn);
    assert!(matches!(
        result,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        ))
    ));
}

#[test]
fn deleting_agent_unassigns_tickets() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let agent = Agent {
        id: Uuid::new_v4(),
        name: format!("agent-{}", marker()),
        created_at: Utc::now(),
    };
    diesel::insert_into(agents::table)
        .values(&agent)
        .execute(&mut conn)
        .unwrap();

    let mut held = Vec::new();
    for i in 0..3 {
        let ticket = insert_ticket(&mut conn, &format!("Customer {}", i), "Medium", "New");
        diesel::update(tickets::table.find(ticket.ticket_id))
            .set(tickets::assigned_to.eq(agent.id))
            .execute(&mut conn)
            .unwrap();
        held.push(ticket.ticket_id);
    }

    remove_agent(&mut conn, agent.id).unwrap();

    for id in held {
        let ticket: Ticket = tickets::table.find(id).first(&mut conn).unwrap();
        assert!(ticket.assigned_to.is_none());
    }
    let gone: Option<Agent> = agents::table.find(agent.id).first(&mut conn).optional().unwrap();
    assert!(gone.is_none());

    // Idempotency: the second delete reports NotFound.
    assert!(matches!(
        remove_agent(&mut conn, agent.id),
        Err(deskserver::shared::error::ApiError::NotFound(_))
    ));
}

#[test]
fn reply_appends_message_and_promotes_new_tickets() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let ticket = insert_ticket(&mut conn, "Robin", "Medium", "New");
    let before = ticket.last_updated_date;

    let updated = append_reply(&mut conn, ticket.ticket_id, "Thanks for reaching out").unwrap();
    assert_eq!(updated.ticket_status, TicketStatus::InProgress.as_str());
    assert!(updated.last_updated_date > before);

    // A second reply leaves In Progress alone.
    let updated = append_reply(&mut conn, ticket.ticket_id, "Any other questions?").unwrap();
    assert_eq!(updated.ticket_status, TicketStatus::InProgress.as_str());

    diesel::update(tickets::table.find(ticket.ticket_id))
        .set(tickets::ticket_status.eq(TicketStatus::Completed.as_str()))
        .execute(&mut conn)
        .unwrap();
    let updated = append_reply(&mut conn, ticket.ticket_id, "Closing note").unwrap();
    assert_eq!(updated.ticket_status, TicketStatus::Completed.as_str());

    let thread: Vec<(String, bool)> = messages::table
        .filter(messages::ticket_id.eq(ticket.ticket_id))
        .order(messages::date.asc())
        .select((messages::message, messages::authored))
        .load(&mut conn)
        .unwrap();
    assert_eq!(thread.len(), 3);
    assert!(thread.iter().all(|(_, authored)| *authored));

    // Empty reply text is rejected before anything is written.
    assert!(matches!(
        append_reply(&mut conn, ticket.ticket_id, "  "),
        Err(deskserver::shared::error::ApiError::Validation(_))
    ));
}

#[test]
fn filters_combine_conjunctively() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let scope = marker();
    let a = insert_ticket(&mut conn, &format!("{} Alice", scope), "High", "New");
    insert_ticket(&mut conn, &format!("{} Bob", scope), "Low", "New");

    let raw = ListQuery {
        search: Some(scope.clone()),
        ticket_status: Some("New".to_string()),
        priority: Some("High".to_string()),
        ..Default::default()
    };
    let found = search_tickets(&mut conn, &TicketFilter::from_query(&raw)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].ticket_id, a.ticket_id);
}

#[test]
fn unknown_assignee_name_yields_empty_result() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let scope = marker();
    insert_ticket(&mut conn, &format!("{} Casey", scope), "Medium", "New");

    let raw = ListQuery {
        search: Some(scope),
        assigned_to: Some(format!("nobody-{}", marker())),
        ..Default::default()
    };
    let found = search_tickets(&mut conn, &TicketFilter::from_query(&raw)).unwrap();
    assert!(found.is_empty());
}

#[test]
fn tag_filter_matches_any_listed_tag() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let scope = marker();
    let t1 = insert_ticket(&mut conn, &format!("{} tagged", scope), "Medium", "New");
    let t2 = insert_ticket(&mut conn, &format!("{} other", scope), "Medium", "New");

    let tag1 = insert_tag(&mut conn, &format!("urgent-{}", marker()));
    let tag2 = insert_tag(&mut conn, &format!("billing-{}", marker()));
    let tag3 = insert_tag(&mut conn, &format!("shipping-{}", marker()));
    let tag4 = insert_tag(&mut conn, &format!("misc-{}", marker()));

    diesel::insert_into(ticket_tags::table)
        .values(&vec![
            deskserver::tickets::TicketTagLink {
                ticket_id: t1.ticket_id,
                tag_id: tag1.id,
            },
            deskserver::tickets::TicketTagLink {
                ticket_id: t1.ticket_id,
                tag_id: tag2.id,
            },
            deskserver::tickets::TicketTagLink {
                ticket_id: t2.ticket_id,
                tag_id: tag4.id,
            },
        ])
        .execute(&mut conn)
        .unwrap();

    let tags_param = serde_json::json!([
        { "ID": tag2.id, "name": "x", "color": "y" },
        { "ID": tag3.id, "name": "x", "color": "y" },
    ])
    .to_string();
    let raw = ListQuery {
        search: Some(scope),
        tags: Some(tags_param),
        ..Default::default()
    };
    let found = search_tickets(&mut conn, &TicketFilter::from_query(&raw)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].ticket_id, t1.ticket_id);
}

#[test]
fn update_replaces_and_clears_tag_set() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let ticket = insert_ticket(&mut conn, "Morgan", "Medium", "New");
    let tag = insert_tag(&mut conn, &format!("vip-{}", marker()));

    let req = UpdateTicketRequest {
        tags: Some(vec![TagRef { id: tag.id }]),
        ..Default::default()
    };
    apply_update(&mut conn, ticket.ticket_id, &req, false).unwrap();

    let linked: i64 = ticket_tags::table
        .filter(ticket_tags::ticket_id.eq(ticket.ticket_id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(linked, 1);

    // An empty list clears associations but leaves the tags themselves alone.
    let req = UpdateTicketRequest {
        tags: Some(Vec::new()),
        ..Default::default()
    };
    apply_update(&mut conn, ticket.ticket_id, &req, false).unwrap();

    let linked: i64 = ticket_tags::table
        .filter(ticket_tags::ticket_id.eq(ticket.ticket_id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(linked, 0);
    let still_there: Option<Tag> = deskserver::shared::schema::tags::table
        .find(tag.id)
        .first(&mut conn)
        .optional()
        .unwrap();
    assert!(still_there.is_some());
}

#[tokio::test]
async fn tag_creation_round_trips_and_conflicts() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let state = test_state(pool);

    let name = format!("VIP-{}", marker());
    let (status, Json(view)) = create_tag(
        State(state.clone()),
        Json(CreateTagRequest {
            name: name.clone(),
            color: "gold".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, axum::http::StatusCode::CREATED);
    assert_eq!(view.name, name);
    assert_eq!(view.color, "gold");

    let result = create_tag(
        State(state),
        Json(CreateTagRequest {
            name,
            color: "blue".to_string(),
        }),
    )
    .await;
    assert!(matches!(
        result,
        Err(deskserver::shared::error::ApiError::Conflict(_))
    ));
}

#[tokio::test]
async fn agent_names_are_unique() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let state = test_state(pool);

    let name = format!("Sasha-{}", marker());
    let (status, _) = create_agent(State(state.clone()), Json(name.clone()))
        .await
        .unwrap();
    assert_eq!(status, axum::http::StatusCode::CREATED);

    let result = create_agent(State(state), Json(name)).await;
    assert!(matches!(
        result,
        Err(deskserver::shared::error::ApiError::Conflict(_))
    ));
}

#[test]
fn update_assignment_follows_reference_policy() {
    let Some(pool) = test_pool() else {
        println!("Skipping test - database not available");
        return;
    };
    let mut conn = pool.get().unwrap();

    let agent = Agent {
        id: Uuid::new_v4(),
        name: format!("lead-{}", marker()),
        created_at: Utc::now(),
    };
    diesel::insert_into(agents::table)
        .values(&agent)
        .execute(&mut conn)
        .unwrap();
    let ticket = insert_ticket(&mut conn, "Quinn", "Medium", "New");

    let req = UpdateTicketRequest {
        assigned_to: Some(agent.name.clone()),
        ..Default::default()
    };
    let updated = apply_update(&mut conn, ticket.ticket_id, &req, false).unwrap();
    assert_eq!(updated.assigned_to, Some(agent.id));

    // Unknown agent name: silently skipped by default, rejected when strict.
    let req = UpdateTicketRequest {
        assigned_to: Some(format!("ghost-{}", marker())),
        ..Default::default()
    };
    let updated = apply_update(&mut conn, ticket.ticket_id, &req, false).unwrap();
    assert_eq!(updated.assigned_to, Some(agent.id));
    assert!(matches!(
        apply_update(&mut conn, ticket.ticket_id, &req, true),
        Err(deskserver::shared::error::ApiError::Validation(_))
    ));

    // Empty string unassigns.
    let req = UpdateTicketRequest {
        assigned_to: Some(String::new()),
        ..Default::default()
    };
    let updated = apply_update(&mut conn, ticket.ticket_id, &req, false).unwrap();
    assert!(updated.assigned_to.is_none());
}
