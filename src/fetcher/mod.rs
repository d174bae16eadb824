use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{error, info};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::config::FetcherConfig;
use crate::shared::schema::{messages, tickets};
use crate::shared::state::AppState;
use crate::tickets::{stamp_last_updated, NewMessage, Ticket, TicketPriority, TicketStatus};

/// Consecutive failures double the number of skipped ticks, up to this cap.
const MAX_BACKOFF_TICKS: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Marketplace API error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Connection error: {0}")]
    Pool(String),
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

fn empty_list() -> serde_json::Value {
    serde_json::json!([])
}

/// One utterance in a fetched marketplace conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedMessage {
    pub message: String,
    #[serde(default)]
    pub authored: bool,
    pub date: DateTime<Utc>,
    #[serde(default = "empty_list")]
    pub image_attachments: serde_json::Value,
}

/// One conversation batch keyed by the marketplace's own conversation id.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedConversation {
    pub marketplace: String,
    pub marketplace_conversation_id: String,
    pub customer_name: String,
    #[serde(default = "empty_list")]
    pub order_history: serde_json::Value,
    #[serde(default)]
    pub related_listing_url: Option<String>,
    #[serde(default)]
    pub messages: Vec<FetchedMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Pulls conversation batches from the external marketplace API. Returns an
/// empty batch until an API endpoint is configured.
pub async fn fetch_conversations(
    client: &reqwest::Client,
    config: &FetcherConfig,
) -> Result<Vec<FetchedConversation>, FetchError> {
    let Some(url) = &config.api_url else {
        return Ok(Vec::new());
    };

    let mut request = client.get(url);
    if let Some(key) = &config.api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await?.error_for_status()?;
    Ok(response.json().await?)
}

/// Materializes one fetched conversation: creates the ticket when the
/// conversation id is new, otherwise appends only the messages not yet seen.
/// Runs in a transaction so a half-ingested conversation never persists.
pub fn ingest_conversation(
    conn: &mut PgConnection,
    conv: &FetchedConversation,
) -> Result<IngestOutcome, diesel::result::Error> {
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let existing: Option<Ticket> = tickets::table
            .filter(tickets::marketplace_conversation_id.eq(&conv.marketplace_conversation_id))
            .first(conn)
            .optional()?;

        match existing {
            None => {
                let now = Utc::now();
                let start = conv.messages.iter().map(|m| m.date).min().unwrap_or(now);
                let ticket = Ticket {
                    ticket_id: Uuid::new_v4(),
                    marketplace: conv.marketplace.clone(),
                    marketplace_conversation_id: conv.marketplace_conversation_id.clone(),
                    customer_name: conv.customer_name.clone(),
                    priority: TicketPriority::Medium.as_str().to_string(),
                    ticket_status: TicketStatus::New.as_str().to_string(),
                    assigned_to: None,
                    conversation_start_date: start,
                    last_updated_date: now,
                    order_history: conv.order_history.clone(),
                    related_listing_url: conv.related_listing_url.clone(),
                };
                diesel::insert_into(tickets::table)
                    .values(&ticket)
                    .execute(conn)?;

                let rows: Vec<NewMessage> = conv
                    .messages
                    .iter()
                    .map(|m| new_message(ticket.ticket_id, m))
                    .collect();
                if !rows.is_empty() {
                    diesel::insert_into(messages::table)
                        .values(&rows)
                        .execute(conn)?;
                }
                Ok(IngestOutcome::Created)
            }
            Some(ticket) => {
                let seen: HashSet<(DateTime<Utc>, String)> = messages::table
                    .filter(messages::ticket_id.eq(ticket.ticket_id))
                    .select((messages::date, messages::message))
                    .load::<(DateTime<Utc>, String)>(conn)?
                    .into_iter()
                    .collect();

                let fresh: Vec<NewMessage> = conv
                    .messages
                    .iter()
                    .filter(|m| !seen.contains(&(m.date, m.message.clone())))
                    .map(|m| new_message(ticket.ticket_id, m))
                    .collect();

                if fresh.is_empty() {
                    return Ok(IngestOutcome::Unchanged);
                }

                diesel::insert_into(messages::table)
                    .values(&fresh)
                    .execute(conn)?;
                stamp_last_updated(conn, ticket.ticket_id)?;
                Ok(IngestOutcome::Updated)
            }
        }
    })
}

fn new_message(ticket_id: Uuid, msg: &FetchedMessage) -> NewMessage {
    NewMessage {
        ticket_id,
        message: msg.message.clone(),
        authored: msg.authored,
        date: msg.date,
        image_attachments: msg.image_attachments.clone(),
    }
}

pub struct TicketFetcher {
    state: Arc<AppState>,
    client: reqwest::Client,
}

impl TicketFetcher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            client: reqwest::Client::new(),
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let minutes = self.state.config.fetcher.interval_minutes.max(1);
            info!("Ticket fetcher started (runs every {} minutes)", minutes);
            let mut tick = interval(Duration::from_secs(minutes * 60));
            // The first tick of tokio's interval fires immediately; skip it so
            // a fresh process does not hit the marketplace API during startup.
            tick.tick().await;
            let mut backoff: u32 = 0;
            let mut skip: u32 = 0;
            loop {
                tick.tick().await;
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                match self.run_once().await {
                    Ok(0) => backoff = 0,
                    Ok(count) => {
                        backoff = 0;
                        info!("Ingested {} marketplace conversations", count);
                    }
                    Err(e) => {
                        error!("Ticket fetch failed: {}", e);
                        backoff = (backoff * 2).clamp(1, MAX_BACKOFF_TICKS);
                        skip = backoff;
                    }
                }
            }
        })
    }

    pub async fn run_once(&self) -> Result<usize, FetchError> {
        let batch = fetch_conversations(&self.client, &self.state.config.fetcher).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self
            .state
            .conn
            .get()
            .map_err(|e| FetchError::Pool(e.to_string()))?;

        let mut count = 0;
        for conv in &batch {
            match ingest_conversation(&mut conn, conv) {
                Ok(_) => count += 1,
                Err(e) => error!(
                    "Failed to ingest conversation {}: {}",
                    conv.marketplace_conversation_id, e
                ),
            }
        }
        Ok(count)
    }
}
