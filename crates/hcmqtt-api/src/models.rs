// Wire types for the Home Connect REST API and their normalized forms.
//
// The API names everything with dotted vendor keys
// (`BSH.Common.Setting.PowerState`). Before anything reaches the state
// store, keys and enum-valued strings are shortened to their last component
// with a lower-cased first letter (`powerState`).

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Appliance ────────────────────────────────────────────────────────

/// Immutable snapshot of a paired appliance as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appliance {
    #[serde(rename = "haId")]
    pub id: String,
    pub name: String,
    pub brand: String,
    #[serde(rename = "type")]
    pub appliance_type: String,
    #[serde(default)]
    pub vib: String,
    #[serde(rename = "enumber", default)]
    pub e_number: String,
    #[serde(rename = "connected")]
    pub is_connected: bool,
}

/// `GET homeappliances` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct ApplianceList {
    #[serde(rename = "homeappliances")]
    pub appliances: Vec<Appliance>,
}

// ── Key/value resources ──────────────────────────────────────────────

/// One entry of a status, settings or program-options list.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Normalize a key/value list into a map keyed by short names.
pub fn parse_key_values(entries: Vec<KeyValue>) -> BTreeMap<String, Value> {
    entries
        .into_iter()
        .map(|kv| (short_key(&kv.key), normalize_value(kv.value)))
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusList {
    pub status: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SettingsList {
    pub settings: Vec<KeyValue>,
}

// ── Programs ─────────────────────────────────────────────────────────

/// A running or selected program with its normalized options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub name: String,
    pub options: BTreeMap<String, Value>,
}

/// Raw `programs/active` / `programs/selected` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramResponse {
    pub key: String,
    #[serde(default)]
    pub options: Option<Vec<KeyValue>>,
}

impl From<ProgramResponse> for Program {
    fn from(raw: ProgramResponse) -> Self {
        Self {
            name: short_key(&raw.key),
            options: parse_key_values(raw.options.unwrap_or_default()),
        }
    }
}

// ── Key normalization ────────────────────────────────────────────────

/// `BSH.Common.Setting.PowerState` → `powerState`.
pub fn short_key(key: &str) -> String {
    let last = key.rsplit('.').next().unwrap_or(key);
    let mut chars = last.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Shorten enum-valued strings (`BSH.Common.EnumType.PowerState.On` → `on`).
/// Free text and non-string values pass through.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) if is_vendor_key(&s) => Value::String(short_key(&s)),
        other => other,
    }
}

fn is_vendor_key(s: &str) -> bool {
    s.contains('.') && !s.contains(char::is_whitespace) && !s.starts_with('.')
}

// ── Timestamps ───────────────────────────────────────────────────────

/// The API sends event timestamps as epoch seconds; accept RFC 3339 too.
pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {secs}"))),
        Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
    }
}
