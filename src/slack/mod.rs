//! Platform Web API client and inbound payload model.

pub mod client;
pub mod types;

pub use client::ApiClient;
pub use types::{Event, EventEnvelope, InboundPayload, NestedMessage, SlashCommand};
