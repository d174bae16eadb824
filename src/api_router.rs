//! API Router
//!
//! Combines the API endpoints from all specialized modules into a unified
//! router, mounted under `/api` by the server entry point.

use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

/// Configure all API routes from all modules
pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crate::tickets::configure_tickets_routes())
        .merge(crate::agents::configure_agents_routes())
        .merge(crate::tags::configure_tags_routes())
        .merge(crate::canned::configure_canned_routes())
        .merge(crate::faq::configure_faq_routes())
}
