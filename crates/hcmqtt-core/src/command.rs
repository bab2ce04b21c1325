// ── Command API ──
//
// Inbound bus commands. A per-appliance command payload is a JSON object
// whose keys name commands. Each command is validated against the target
// appliance's type and resolved into one API write plus the synthetic event
// that describes the write's effect on the mirrored state.

use chrono::Utc;
use hcmqtt_api::models::{normalize_value, short_key};
use hcmqtt_api::{Appliance, ApplianceEvent, EventItem, EventKind, Resource};
use serde::Deserialize;
use serde_json::{Map, Number, Value, json};

use crate::error::CoreError;

const POWER_STATE_SETTING: &str = "BSH.Common.Setting.PowerState";
const POWER_STATE_ON: &str = "BSH.Common.EnumType.PowerState.On";
const POWER_STATE_OFF: &str = "BSH.Common.EnumType.PowerState.Off";
const POWER_STATE_STANDBY: &str = "BSH.Common.EnumType.PowerState.Standby";

/// Appliance types that only support standby, not a full power-off.
const STANDBY_APPLIANCE_TYPES: [&str; 4] =
    ["Oven", "CoffeeMachine", "CleaningRobot", "CookProcessor"];

const ACTIVE_PROGRAM_KEY: &str = "BSH.Common.Root.ActiveProgram";
const PREHEAT_PROGRAM: &str = "Cooking.Oven.Program.HeatingMode.PreHeating";
const SETPOINT_TEMPERATURE_OPTION: &str = "Cooking.Oven.Option.SetpointTemperature";
const DURATION_OPTION: &str = "BSH.Common.Option.Duration";
const FAST_PREHEAT_OPTION: &str = "Cooking.Oven.Option.FastPreHeat";
const PREHEAT_DURATION_SECS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreheatOptions {
    /// Target temperature in °C.
    pub temperature: Number,
    #[serde(default)]
    pub fast_pre_heat: bool,
}

/// Every command the bridge understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplianceCommand {
    Power(PowerState),
    Preheat(PreheatOptions),
}

/// Where a resolved command writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    Setting(&'static str),
    ActiveProgram,
}

impl CommandTarget {
    pub fn resource(self) -> Resource<'static> {
        match self {
            Self::Setting(key) => Resource::Setting(key),
            Self::ActiveProgram => Resource::ActiveProgram,
        }
    }
}

/// A command bound to a concrete appliance.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    pub target: CommandTarget,
    /// Request body, wrapped in `{"data": ...}` by the client.
    pub data: Value,
    /// Applied to the store once the write succeeds.
    pub event: ApplianceEvent,
}

/// Split a per-appliance command payload into `(name, value)` pairs.
pub fn parse_command_payload(payload: &[u8]) -> Result<Vec<(String, Value)>, CoreError> {
    let object: Map<String, Value> =
        serde_json::from_slice(payload).map_err(|e| CoreError::InvalidCommandJson {
            reason: e.to_string(),
        })?;
    Ok(object.into_iter().collect())
}

impl ApplianceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Power(_) => "power",
            Self::Preheat(_) => "preheat",
        }
    }

    pub fn parse(name: &str, value: &Value) -> Result<Self, CoreError> {
        match name {
            "power" => match value.as_str() {
                Some("on") => Ok(Self::Power(PowerState::On)),
                Some("off") => Ok(Self::Power(PowerState::Off)),
                _ => Err(CoreError::InvalidPayload {
                    command: name.to_owned(),
                    reason: format!("expected \"on\" or \"off\", got {value}"),
                }),
            },
            "preheat" => serde_json::from_value(value.clone())
                .map(Self::Preheat)
                .map_err(|e| CoreError::InvalidPayload {
                    command: name.to_owned(),
                    reason: e.to_string(),
                }),
            _ => Err(CoreError::UnknownCommand {
                name: name.to_owned(),
            }),
        }
    }

    /// Map the command onto `appliance`, or reject it without touching the API.
    pub fn resolve(&self, appliance: &Appliance) -> Result<ResolvedCommand, CoreError> {
        match self {
            Self::Power(state) => {
                let value = match state {
                    PowerState::On => POWER_STATE_ON,
                    PowerState::Off
                        if STANDBY_APPLIANCE_TYPES.contains(&appliance.appliance_type.as_str()) =>
                    {
                        POWER_STATE_STANDBY
                    }
                    PowerState::Off => POWER_STATE_OFF,
                };
                Ok(ResolvedCommand {
                    target: CommandTarget::Setting(POWER_STATE_SETTING),
                    data: json!({ "key": POWER_STATE_SETTING, "value": value }),
                    event: notify(
                        &appliance.id,
                        POWER_STATE_SETTING,
                        &format!("settings/{POWER_STATE_SETTING}"),
                        value,
                    ),
                })
            }
            Self::Preheat(options) => {
                if appliance.appliance_type != "Oven" {
                    return Err(CoreError::UnsupportedByAppliance {
                        command: self.name().to_owned(),
                        appliance_type: appliance.appliance_type.clone(),
                    });
                }
                Ok(ResolvedCommand {
                    target: CommandTarget::ActiveProgram,
                    data: json!({
                        "key": PREHEAT_PROGRAM,
                        "options": [
                            {
                                "key": SETPOINT_TEMPERATURE_OPTION,
                                "value": options.temperature,
                                "unit": "°C",
                            },
                            {
                                "key": DURATION_OPTION,
                                "value": PREHEAT_DURATION_SECS,
                                "unit": "seconds",
                            },
                            {
                                "key": FAST_PREHEAT_OPTION,
                                "value": options.fast_pre_heat,
                            },
                        ],
                    }),
                    event: notify(
                        &appliance.id,
                        ACTIVE_PROGRAM_KEY,
                        "programs/active",
                        PREHEAT_PROGRAM,
                    ),
                })
            }
        }
    }
}

fn notify(appliance_id: &str, key: &str, path: &str, value: &str) -> ApplianceEvent {
    ApplianceEvent {
        appliance_id: appliance_id.to_owned(),
        kind: EventKind::Notify(vec![EventItem {
            key: short_key(key),
            uri: Some(format!("/api/homeappliances/{appliance_id}/{path}")),
            timestamp: Utc::now(),
            value: Some(normalize_value(Value::String(value.to_owned()))),
        }]),
    }
}
