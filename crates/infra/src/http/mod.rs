//! HTTP client for outbound provider calls and the inbound webhook router

pub mod client;
pub mod webhook;

pub use client::{HttpClient, HttpClientBuilder};
pub use webhook::{webhook_router, WebhookState};
