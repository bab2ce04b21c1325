// hcmqtt-core: Appliance state mirror and bus bridge on top of hcmqtt-api.

pub mod api;
pub mod bridge;
pub mod bus;
pub mod command;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
mod watchdog;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use api::{ApplianceApi, FieldMap};
pub use bridge::Bridge;
pub use bus::{CommandTopic, InboundMessage, Publication, Topics};
pub use command::{ApplianceCommand, PowerState, PreheatOptions};
pub use config::{BridgeConfig, ReconnectConfig};
pub use error::CoreError;
pub use model::{ApplianceState, Field, Snapshot, StateUpdate, UpdateType};
pub use store::ApplianceStore;
