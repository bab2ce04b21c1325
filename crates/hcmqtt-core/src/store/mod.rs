//! Appliance state store.
//!
//! [`ApplianceStore`] is the only writer of the appliance map. Every
//! operation takes the state lock for a short synchronous section and never
//! holds it across an `.await`, so mutations cannot interleave and readers
//! always get a consistent [`Snapshot`].
//!
//! Network fetches are deduplicated: status/settings/program fetches by
//! `(appliance, field)`, whole-appliance fetches by id. A fetch only writes
//! back if the appliance is still present and connected when it completes.
//! [`remove_all`](ApplianceStore::remove_all) cancels everything in flight.

mod inflight;
mod items;

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use hcmqtt_api::{Appliance, EventItem, Program};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApplianceApi, FieldMap};
use crate::error::CoreError;
use crate::model::{ApplianceState, Field, ProgramSlot, Snapshot, StateUpdate, UpdateType};

use self::inflight::{InflightMap, SharedFetch};

type FieldKey = (String, Field);

// ── ApplianceStore ───────────────────────────────────────────────────

/// Cheaply cloneable handle to the shared store.
#[derive(Clone)]
pub struct ApplianceStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    api: Arc<dyn ApplianceApi>,
    state: Mutex<StoreState>,
    updates: mpsc::UnboundedSender<StateUpdate>,
}

struct StoreState {
    appliances: HashMap<String, ApplianceState>,
    field_fetches: InflightMap<FieldKey>,
    appliance_fetches: InflightMap<String>,
    /// Parent of every running fetch; replaced when fetches are cancelled.
    cancel: CancellationToken,
    next_fetch_id: u64,
}

fn field_fetches(state: &mut StoreState) -> &mut InflightMap<FieldKey> {
    &mut state.field_fetches
}

fn appliance_fetches(state: &mut StoreState) -> &mut InflightMap<String> {
    &mut state.appliance_fetches
}

enum Fetched {
    Status(Option<FieldMap>),
    Settings(Option<FieldMap>),
    Program(ProgramSlot, Option<Program>),
}

impl ApplianceStore {
    /// Create a store and the receiver for its change notifications.
    pub fn new(api: Arc<dyn ApplianceApi>) -> (Self, mpsc::UnboundedReceiver<StateUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let store = Self {
            inner: Arc::new(StoreInner {
                api,
                state: Mutex::new(StoreState {
                    appliances: HashMap::new(),
                    field_fetches: InflightMap::default(),
                    appliance_fetches: InflightMap::default(),
                    cancel: CancellationToken::new(),
                    next_fetch_id: 0,
                }),
                updates,
            }),
        };
        (store, rx)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().expect("store lock poisoned")
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Snapshot {
        Arc::new(self.lock().appliances.clone())
    }

    pub fn get(&self, id: &str) -> Option<ApplianceState> {
        self.lock().appliances.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().appliances.contains_key(id)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Upsert an appliance record; fetch its fields if it is connected.
    ///
    /// Notifies `info` (and `isConnected`) on first insert and `isConnected`
    /// when connectivity flips.
    pub async fn insert(&self, appliance: Appliance) -> Result<(), CoreError> {
        let id = appliance.id.clone();
        let connected = appliance.is_connected;
        {
            let mut state = self.lock();
            match state.appliances.get_mut(&id) {
                Some(entry) => {
                    let flipped = entry.appliance.is_connected != connected;
                    entry.appliance = appliance;
                    if flipped {
                        self.notify(&state, &id, UpdateType::IsConnected);
                    }
                }
                None => {
                    state.appliances.insert(id.clone(), ApplianceState::new(appliance));
                    self.notify(&state, &id, UpdateType::Info);
                    self.notify(&state, &id, UpdateType::IsConnected);
                }
            }
        }

        if connected {
            self.fetch_fields(&id, [
                Field::Status,
                Field::Settings,
                Field::ActiveProgram,
                Field::SelectedProgram,
            ])
            .await
        } else {
            Ok(())
        }
    }

    /// Fetch the appliance record and insert it. Concurrent callers for the
    /// same id share one fetch.
    pub async fn insert_by_id(&self, id: &str) -> Result<(), CoreError> {
        let id = id.to_owned();
        let fetch = self.single_flight(appliance_fetches, id.clone(), move |store| {
            async move {
                let appliance = store.inner.api.get_appliance(&id).await?;
                store.insert(appliance).await
            }
            .boxed()
        });
        fetch.await.map_err(CoreError::Shared)
    }

    /// Forget every appliance and cancel all fetches in flight.
    pub fn remove_all(&self) {
        let mut state = self.lock();
        Self::cancel_locked(&mut state);
        let previous: Vec<String> = state.appliances.drain().map(|(id, _)| id).collect();
        for id in &previous {
            self.notify(&state, id, UpdateType::IsConnected);
        }
        debug!(count = previous.len(), "store cleared");
    }

    pub fn remove(&self, id: &str) {
        let mut state = self.lock();
        if state.appliances.remove(id).is_some() {
            self.notify(&state, id, UpdateType::IsConnected);
        }
    }

    /// Mark the appliance connected and refresh its fields. Unknown ids are
    /// fetched in full.
    pub async fn connect(&self, id: &str) -> Result<(), CoreError> {
        let known = {
            let mut state = self.lock();
            match state.appliances.get_mut(id) {
                Some(entry) if entry.appliance.is_connected => return Ok(()),
                Some(entry) => {
                    entry.appliance.is_connected = true;
                    self.notify(&state, id, UpdateType::IsConnected);
                    true
                }
                None => false,
            }
        };

        if known {
            self.fetch_fields(id, [
                Field::Status,
                Field::Settings,
                Field::ActiveProgram,
                Field::SelectedProgram,
            ])
            .await
        } else {
            self.insert_by_id(id).await
        }
    }

    /// Mark the appliance disconnected. Fetched fields are kept (stale).
    pub async fn disconnect(&self, id: &str) -> Result<(), CoreError> {
        {
            let mut state = self.lock();
            if let Some(entry) = state.appliances.get_mut(id) {
                if entry.appliance.is_connected {
                    entry.appliance.is_connected = false;
                    self.notify(&state, id, UpdateType::IsConnected);
                }
                return Ok(());
            }
        }
        self.insert_by_id(id).await
    }

    /// Reconcile event items for one appliance. Items for an appliance the
    /// store does not know yet trigger a full fetch of it instead.
    pub async fn process_items(&self, id: &str, items: &[EventItem]) -> Result<(), CoreError> {
        let fetch = {
            let mut state = self.lock();
            match state.appliances.get_mut(id) {
                Some(entry) => {
                    let outcome = items::apply_items(entry, items);
                    for update_type in &outcome.changed {
                        self.notify(&state, id, *update_type);
                    }
                    Some(outcome.fetch)
                }
                None => None,
            }
        };

        let Some(fetch) = fetch else {
            debug!(appliance = id, "items for unknown appliance; fetching it");
            return self.insert_by_id(id).await;
        };
        if fetch.is_empty() {
            Ok(())
        } else {
            self.fetch_fields(id, fetch).await
        }
    }

    /// Cancel all fetches in flight without touching the appliance map.
    pub fn cancel_fetches(&self) {
        Self::cancel_locked(&mut self.lock());
    }

    fn cancel_locked(state: &mut StoreState) {
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.field_fetches.clear();
        state.appliance_fetches.clear();
    }

    // ── Fetching ─────────────────────────────────────────────────────

    async fn fetch_fields(
        &self,
        id: &str,
        fields: impl IntoIterator<Item = Field>,
    ) -> Result<(), CoreError> {
        let fetches: Vec<SharedFetch> = fields
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|field| {
                let owned_id = id.to_owned();
                self.single_flight(field_fetches, (id.to_owned(), field), move |store| {
                    async move { store.load_field(&owned_id, field).await }.boxed()
                })
            })
            .collect();

        let causes: Vec<_> = join_all(fetches)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if causes.is_empty() {
            Ok(())
        } else {
            for cause in causes.iter().filter(|c| !c.is_cancelled()) {
                warn!(appliance = id, error = %cause, "field fetch failed");
            }
            Err(CoreError::DataUpdate { causes })
        }
    }

    async fn load_field(&self, id: &str, field: Field) -> Result<(), CoreError> {
        let api = &self.inner.api;
        let fetched = match field {
            Field::Status => Fetched::Status(api.get_status(id).await?),
            Field::Settings => Fetched::Settings(api.get_settings(id).await?),
            Field::ActiveProgram => {
                Fetched::Program(ProgramSlot::Active, api.get_active_program(id).await?)
            }
            Field::SelectedProgram => {
                Fetched::Program(ProgramSlot::Selected, api.get_selected_program(id).await?)
            }
        };
        self.apply_fetched(id, field, fetched);
        Ok(())
    }

    fn apply_fetched(&self, id: &str, field: Field, fetched: Fetched) {
        let mut state = self.lock();
        let Some(entry) = state.appliances.get_mut(id) else {
            debug!(appliance = id, ?field, "dropping fetch for removed appliance");
            return;
        };
        if !entry.appliance.is_connected {
            debug!(appliance = id, ?field, "dropping fetch for disconnected appliance");
            return;
        }
        match fetched {
            Fetched::Status(status) => entry.status = status,
            Fetched::Settings(settings) => entry.settings = settings,
            Fetched::Program(slot, program) => *entry.program_mut(slot) = program,
        }
        self.notify(&state, id, field.update_type());
    }

    /// Run `work` as a spawned task shared by every caller with the same key.
    ///
    /// The key is released when the task ends for any reason, including
    /// cancellation through the store's token. The entry is registered
    /// before the task is spawned and the lock is released before spawning.
    fn single_flight<K, W>(
        &self,
        select: fn(&mut StoreState) -> &mut InflightMap<K>,
        key: K,
        work: W,
    ) -> SharedFetch
    where
        K: Eq + Hash + Clone + Send + 'static,
        W: FnOnce(ApplianceStore) -> BoxFuture<'static, Result<(), CoreError>>,
    {
        let mut state = self.lock();
        if let Some(existing) = select(&mut state).get(&key) {
            return existing;
        }

        state.next_fetch_id += 1;
        let fetch_id = state.next_fetch_id;
        let cancel = state.cancel.clone();

        let (tx, rx) = oneshot::channel();
        let shared = async move {
            rx.await
                .unwrap_or_else(|_| Err(Arc::new(CoreError::Cancelled)))
        }
        .boxed()
        .shared();
        select(&mut state).insert(key.clone(), fetch_id, shared.clone());
        drop(state);

        let release = ReleaseOnDrop {
            store: self.clone(),
            select,
            key,
            fetch_id,
        };
        let work = work(self.clone());
        tokio::spawn(async move {
            let _release = release;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(CoreError::Cancelled),
                result = work => result,
            };
            let _ = tx.send(result.map_err(Arc::new));
        });

        shared
    }

    fn notify(&self, state: &StoreState, id: &str, update_type: UpdateType) {
        let update = StateUpdate {
            appliance_id: id.to_owned(),
            update_type,
            states: Arc::new(state.appliances.clone()),
        };
        // A closed receiver only means nobody is publishing any more.
        let _ = self.inner.updates.send(update);
    }

    #[cfg(test)]
    fn inflight_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.field_fetches.len(), state.appliance_fetches.len())
    }
}

struct ReleaseOnDrop<K: Eq + Hash> {
    store: ApplianceStore,
    select: fn(&mut StoreState) -> &mut InflightMap<K>,
    key: K,
    fetch_id: u64,
}

impl<K: Eq + Hash> Drop for ReleaseOnDrop<K> {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        (self.select)(&mut state).release(&self.key, self.fetch_id);
    }
}

#[cfg(test)]
mod tests;
