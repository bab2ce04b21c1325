//! Bus topic layout and payloads.
//!
//! Every per-appliance topic lives under `{prefix}/{appliance id}/`. State
//! topics carry a full JSON snapshot of one field and are retained; one-shot
//! appliance events are not. The transport itself lives in the binary; this
//! module only decides what goes where.

use hcmqtt_api::EventItem;
use serde_json::{Value, json};
use strum::IntoEnumIterator;

use crate::model::{ApplianceState, Snapshot, StateUpdate, UpdateType};

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// One inbound message as received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Which command topic a message arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTopic {
    Global,
    Appliance(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Availability of the bridge itself (`"true"` / `"false"`).
    pub fn bridge_connected(&self) -> String {
        format!("{}/connected", self.prefix)
    }

    pub fn global_command(&self) -> String {
        format!("{}/command", self.prefix)
    }

    /// Subscription filter matching every per-appliance command topic.
    pub fn appliance_command_filter(&self) -> String {
        format!("{}/+/command", self.prefix)
    }

    pub fn appliance(&self, appliance_id: &str, suffix: &str) -> String {
        format!("{}/{appliance_id}/{suffix}", self.prefix)
    }

    pub fn parse_command_topic(&self, topic: &str) -> Option<CommandTopic> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        if rest == "command" {
            return Some(CommandTopic::Global);
        }
        match rest.split_once('/') {
            Some((id, "command")) if !id.is_empty() => Some(CommandTopic::Appliance(id.to_owned())),
            _ => None,
        }
    }

    // ── Payloads ─────────────────────────────────────────────────────

    /// The retained message describing `update`. A removed appliance
    /// publishes `connected = "false"`.
    pub fn state_publication(&self, update: &StateUpdate) -> Publication {
        self.publication(&update.appliance_id, update.update_type, update.state())
    }

    /// Every state topic of every known appliance.
    pub fn announce(&self, states: &Snapshot) -> Vec<Publication> {
        let mut ids: Vec<&String> = states.keys().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| {
                let state = states.get(id);
                UpdateType::iter().map(move |update_type| self.publication(id, update_type, state))
            })
            .collect()
    }

    /// A one-shot appliance event (`events/{key}`), never retained.
    pub fn event_publication(&self, appliance_id: &str, item: &EventItem) -> Publication {
        Publication {
            topic: self.appliance(appliance_id, &format!("events/{}", item.key)),
            payload: item.value.clone().unwrap_or(Value::Null).to_string(),
            retain: false,
        }
    }

    fn publication(
        &self,
        appliance_id: &str,
        update_type: UpdateType,
        state: Option<&ApplianceState>,
    ) -> Publication {
        Publication {
            topic: self.appliance(appliance_id, update_type.topic_suffix()),
            payload: payload(update_type, state),
            retain: true,
        }
    }
}

fn payload(update_type: UpdateType, state: Option<&ApplianceState>) -> String {
    let value = match (update_type, state) {
        (UpdateType::IsConnected, state) => {
            return state.is_some_and(ApplianceState::is_connected).to_string();
        }
        (_, None) => Value::Null,
        (UpdateType::Info, Some(state)) => json!({
            "id": state.appliance.id,
            "name": state.appliance.name,
            "brand": state.appliance.brand,
            "type": state.appliance.appliance_type,
        }),
        (UpdateType::Status, Some(state)) => json!(state.status),
        (UpdateType::Settings, Some(state)) => json!(state.settings),
        (UpdateType::ActiveProgram, Some(state)) => json!(state.active_program),
        (UpdateType::SelectedProgram, Some(state)) => json!(state.selected_program),
    };
    value.to_string()
}
