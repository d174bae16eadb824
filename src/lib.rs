pub mod agents;
pub mod api_router;
pub mod canned;
pub mod config;
pub mod faq;
pub mod fetcher;
pub mod shared;
pub mod tags;
pub mod tickets;
