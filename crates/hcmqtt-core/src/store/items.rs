// Event item reconciliation.
//
// Items address resources by URI relative to `/api/homeappliances/{id}/`.
// Direct key/value deltas are merged into the mirrored maps; anything the
// event cannot fully describe (a map never fetched, a new program whose
// options are unknown) is reported back as a field to re-fetch.

use std::collections::BTreeSet;

use hcmqtt_api::EventItem;
use serde_json::Value;

use crate::api::FieldMap;
use crate::model::{ApplianceState, Field, ProgramSlot, UpdateType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemTarget {
    Status,
    Settings,
    Program(ProgramSlot),
    ProgramOption(ProgramSlot),
}

fn classify(uri: &str, appliance_id: &str) -> Option<ItemTarget> {
    let rest = uri
        .strip_prefix("/api/homeappliances/")?
        .strip_prefix(appliance_id)?
        .strip_prefix('/')?;

    if rest.strip_prefix("status/").is_some_and(|k| !k.is_empty()) {
        return Some(ItemTarget::Status);
    }
    if rest.strip_prefix("settings/").is_some_and(|k| !k.is_empty()) {
        return Some(ItemTarget::Settings);
    }
    for (prefix, slot) in [
        ("programs/active", ProgramSlot::Active),
        ("programs/selected", ProgramSlot::Selected),
    ] {
        match rest.strip_prefix(prefix) {
            Some("") => return Some(ItemTarget::Program(slot)),
            Some(tail) if tail.strip_prefix("/options/").is_some_and(|k| !k.is_empty()) => {
                return Some(ItemTarget::ProgramOption(slot));
            }
            _ => {}
        }
    }
    None
}

/// What applying a batch of items did.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ItemOutcome {
    pub changed: BTreeSet<UpdateType>,
    pub fetch: BTreeSet<Field>,
}

/// Merge `items` into `state`. Unchanged values are not reported.
pub(crate) fn apply_items(state: &mut ApplianceState, items: &[EventItem]) -> ItemOutcome {
    let mut outcome = ItemOutcome::default();
    let appliance_id = state.appliance.id.clone();

    for item in items {
        let Some(target) = item
            .uri
            .as_deref()
            .and_then(|uri| classify(uri, &appliance_id))
        else {
            continue;
        };
        let value = item.value.as_ref();

        match target {
            ItemTarget::Status => match &mut state.status {
                Some(map) => {
                    if upsert(map, &item.key, value) {
                        outcome.changed.insert(UpdateType::Status);
                    }
                }
                None => {
                    outcome.fetch.insert(Field::Status);
                }
            },
            ItemTarget::Settings => match &mut state.settings {
                Some(map) => {
                    if upsert(map, &item.key, value) {
                        outcome.changed.insert(UpdateType::Settings);
                    }
                }
                None => {
                    outcome.fetch.insert(Field::Settings);
                }
            },
            ItemTarget::Program(slot) => {
                if item.value.is_some() {
                    outcome.fetch.insert(slot.field());
                } else if state.program_mut(slot).take().is_some() {
                    outcome.changed.insert(slot.field().update_type());
                }
            }
            ItemTarget::ProgramOption(slot) => {
                if let Some(program) = state.program_mut(slot) {
                    if upsert(&mut program.options, &item.key, value) {
                        outcome.changed.insert(slot.field().update_type());
                    }
                }
            }
        }
    }

    outcome
}

/// Set `key` to `value`, or remove it when the item carries no value.
fn upsert(map: &mut FieldMap, key: &str, value: Option<&Value>) -> bool {
    let Some(value) = value else {
        return map.remove(key).is_some();
    };
    if map.get(key) == Some(value) {
        return false;
    }
    map.insert(key.to_owned(), value.clone());
    true
}
