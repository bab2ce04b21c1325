// hcmqtt-api: Async Rust client for the Home Connect appliance API (REST + SSE)

pub mod client;
pub mod error;
pub mod events;
pub mod limiter;
pub mod models;
pub mod oauth;
pub mod sse;
pub mod token;
pub mod transport;

pub use client::{DEFAULT_API_URL, HomeConnectClient, Resource};
pub use error::Error;
pub use events::{ApplianceEvent, EventItem, EventKind, EventStream};
pub use limiter::{LimiterConfig, RequestLimiter};
pub use models::{Appliance, Program};
pub use oauth::{CredentialStore, MemoryCredentialStore, OAuthClient, OAuthConfig};
pub use sse::{SseFrame, SseParser};
pub use token::{AccessToken, TokenBroker};
pub use transport::TransportConfig;
