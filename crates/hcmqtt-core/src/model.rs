//! Mirrored appliance state and the change vocabulary.

use std::collections::HashMap;
use std::sync::Arc;

use hcmqtt_api::{Appliance, Program};
use serde::Serialize;
use strum::{Display, EnumIter};

use crate::api::FieldMap;

// ── ApplianceState ───────────────────────────────────────────────────

/// Everything known about one paired appliance.
///
/// `None` fields have never been fetched; `Some` with an empty map means
/// fetched and empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplianceState {
    pub appliance: Appliance,
    pub status: Option<FieldMap>,
    pub settings: Option<FieldMap>,
    pub active_program: Option<Program>,
    pub selected_program: Option<Program>,
}

impl ApplianceState {
    pub fn new(appliance: Appliance) -> Self {
        Self {
            appliance,
            status: None,
            settings: None,
            active_program: None,
            selected_program: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.appliance.is_connected
    }

    pub(crate) fn program_mut(&mut self, slot: ProgramSlot) -> &mut Option<Program> {
        match slot {
            ProgramSlot::Active => &mut self.active_program,
            ProgramSlot::Selected => &mut self.selected_program,
        }
    }
}

/// Immutable copy of the whole appliance map.
pub type Snapshot = Arc<HashMap<String, ApplianceState>>;

// ── UpdateType ───────────────────────────────────────────────────────

/// Unit of change notification. Each maps to one bus topic per appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum UpdateType {
    IsConnected,
    Info,
    Status,
    Settings,
    ActiveProgram,
    SelectedProgram,
}

impl UpdateType {
    /// Topic suffix below `{prefix}/{appliance id}/`.
    pub fn topic_suffix(self) -> &'static str {
        match self {
            Self::IsConnected => "connected",
            Self::Info => "info",
            Self::Status => "status",
            Self::Settings => "settings",
            Self::ActiveProgram => "programs/active",
            Self::SelectedProgram => "programs/selected",
        }
    }
}

/// Emitted after every externally visible store mutation.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub appliance_id: String,
    pub update_type: UpdateType,
    /// The full map after the mutation.
    pub states: Snapshot,
}

impl StateUpdate {
    /// The updated appliance, or `None` if it was just removed.
    pub fn state(&self) -> Option<&ApplianceState> {
        self.states.get(&self.appliance_id)
    }
}

// ── Fetchable fields ─────────────────────────────────────────────────

/// A resource that can be (re-)fetched independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum Field {
    Status,
    Settings,
    ActiveProgram,
    SelectedProgram,
}

impl Field {
    pub fn update_type(self) -> UpdateType {
        match self {
            Self::Status => UpdateType::Status,
            Self::Settings => UpdateType::Settings,
            Self::ActiveProgram => UpdateType::ActiveProgram,
            Self::SelectedProgram => UpdateType::SelectedProgram,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgramSlot {
    Active,
    Selected,
}

impl ProgramSlot {
    pub(crate) fn field(self) -> Field {
        match self {
            Self::Active => Field::ActiveProgram,
            Self::Selected => Field::SelectedProgram,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn update_type_names() {
        assert_eq!(UpdateType::IsConnected.to_string(), "isConnected");
        assert_eq!(UpdateType::SelectedProgram.to_string(), "selectedProgram");
    }

    #[test]
    fn every_field_has_its_own_topic() {
        let suffixes: Vec<_> = Field::iter()
            .map(|f| f.update_type().topic_suffix())
            .collect();
        assert_eq!(
            suffixes,
            ["status", "settings", "programs/active", "programs/selected"]
        );
    }
}
