#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hcmqtt_api::EventItem;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::ApplianceStore;
use crate::error::CoreError;
use crate::model::{StateUpdate, UpdateType};
use crate::testing::{FakeApi, appliance};

fn setup(api: FakeApi) -> (Arc<FakeApi>, ApplianceStore, mpsc::UnboundedReceiver<StateUpdate>) {
    let api = Arc::new(api);
    let (store, rx) = ApplianceStore::new(api.clone());
    (api, store, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<StateUpdate>) -> Vec<UpdateType> {
    let mut seen = Vec::new();
    while let Ok(update) = rx.try_recv() {
        seen.push(update.update_type);
    }
    seen
}

fn sorted(mut types: Vec<UpdateType>) -> Vec<UpdateType> {
    types.sort();
    types
}

const FIELD_UPDATES: [UpdateType; 4] = [
    UpdateType::Status,
    UpdateType::Settings,
    UpdateType::ActiveProgram,
    UpdateType::SelectedProgram,
];

fn status_item(key: &str, value: Value) -> EventItem {
    EventItem {
        key: key.into(),
        uri: Some(format!(
            "/api/homeappliances/A1/status/BSH.Common.Status.{key}"
        )),
        timestamp: Utc::now(),
        value: Some(value),
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_inserts_fetch_each_field_once() {
    let (api, store, _rx) = setup(FakeApi::new(vec![]).with_delay(Duration::from_millis(100)));

    let (a, b) = tokio::join!(
        store.insert(appliance("A1", "Oven", true)),
        store.insert(appliance("A1", "Oven", true)),
    );
    a.unwrap();
    b.unwrap();

    for kind in ["status", "settings", "active", "selected"] {
        assert_eq!(api.calls_to(kind), 1, "{kind} fetched more than once");
    }
    assert_eq!(store.inflight_counts(), (0, 0));

    let state = store.get("A1").unwrap();
    assert_eq!(state.status.unwrap()["doorState"], json!("closed"));
    assert_eq!(state.selected_program.unwrap().name, "hotAir");
    assert_eq!(state.active_program, None);
}

#[tokio::test(start_paused = true)]
async fn first_insert_announces_info_and_connectivity() {
    let (_api, store, mut rx) = setup(FakeApi::new(vec![]));

    store.insert(appliance("A1", "Oven", false)).await.unwrap();

    assert_eq!(drain(&mut rx), [UpdateType::Info, UpdateType::IsConnected]);
    assert!(!store.get("A1").unwrap().is_connected());
}

#[tokio::test(start_paused = true)]
async fn only_changed_items_notify() {
    let (_api, store, mut rx) = setup(FakeApi::new(vec![]));
    store.insert(appliance("A1", "Oven", true)).await.unwrap();
    drain(&mut rx);

    store
        .process_items("A1", &[status_item("doorState", json!("closed"))])
        .await
        .unwrap();
    assert!(drain(&mut rx).is_empty());

    store
        .process_items("A1", &[status_item("doorState", json!("open"))])
        .await
        .unwrap();
    let update = rx.try_recv().unwrap();
    assert_eq!(update.update_type, UpdateType::Status);
    assert_eq!(
        update.state().unwrap().status.as_ref().unwrap()["doorState"],
        json!("open")
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn connect_refreshes_every_field() {
    let (api, store, mut rx) = setup(FakeApi::new(vec![]));
    store.insert(appliance("A1", "Oven", false)).await.unwrap();
    assert_eq!(api.calls_to("status"), 0);
    drain(&mut rx);

    store.connect("A1").await.unwrap();

    let first = rx.try_recv().unwrap();
    assert_eq!(first.update_type, UpdateType::IsConnected);
    assert!(first.state().unwrap().is_connected());
    assert_eq!(sorted(drain(&mut rx)), FIELD_UPDATES);

    // Already connected: nothing to do.
    store.connect("A1").await.unwrap();
    assert!(drain(&mut rx).is_empty());
    assert_eq!(api.calls_to("status"), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_unknown_appliance_fetches_it() {
    let (api, store, mut rx) = setup(FakeApi::new(vec![appliance("A2", "Washer", true)]));

    store.connect("A2").await.unwrap();

    assert_eq!(api.calls_to("appliance"), 1);
    let seen = drain(&mut rx);
    assert_eq!(&seen[..2], &[UpdateType::Info, UpdateType::IsConnected]);
    assert_eq!(sorted(seen[2..].to_vec()), FIELD_UPDATES);
}

#[tokio::test(start_paused = true)]
async fn disconnect_keeps_fetched_data() {
    let (_api, store, mut rx) = setup(FakeApi::new(vec![]));
    store.insert(appliance("A1", "Oven", true)).await.unwrap();
    drain(&mut rx);

    store.disconnect("A1").await.unwrap();
    store.disconnect("A1").await.unwrap();

    assert_eq!(drain(&mut rx), [UpdateType::IsConnected]);
    let state = store.get("A1").unwrap();
    assert!(!state.is_connected());
    assert!(state.status.is_some());
    assert!(state.settings.is_some());
}

#[tokio::test(start_paused = true)]
async fn late_fetch_for_removed_appliance_is_dropped() {
    let (_api, store, mut rx) = setup(FakeApi::new(vec![]).with_delay(Duration::from_millis(100)));

    let insert = tokio::spawn({
        let store = store.clone();
        async move { store.insert(appliance("A1", "Oven", true)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.remove("A1");
    insert.await.unwrap().unwrap();

    assert!(!store.contains("A1"));
    assert_eq!(
        drain(&mut rx),
        [UpdateType::Info, UpdateType::IsConnected, UpdateType::IsConnected]
    );
}

#[tokio::test(start_paused = true)]
async fn remove_all_cancels_fetches_in_flight() {
    let (_api, store, mut rx) = setup(FakeApi::new(vec![]).with_delay(Duration::from_millis(100)));

    let insert = tokio::spawn({
        let store = store.clone();
        async move { store.insert(appliance("A1", "Oven", true)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.inflight_counts(), (4, 0));

    store.remove_all();
    assert_eq!(store.inflight_counts(), (0, 0));

    let err = insert.await.unwrap().unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert!(store.snapshot().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        drain(&mut rx),
        [UpdateType::Info, UpdateType::IsConnected, UpdateType::IsConnected]
    );
}

#[tokio::test(start_paused = true)]
async fn insert_by_id_shares_one_fetch() {
    let (api, store, _rx) = setup(
        FakeApi::new(vec![appliance("A1", "Dishwasher", true)])
            .with_delay(Duration::from_millis(50)),
    );

    let (a, b) = tokio::join!(store.insert_by_id("A1"), store.insert_by_id("A1"));
    a.unwrap();
    b.unwrap();

    assert_eq!(api.calls_to("appliance"), 1);
    assert_eq!(api.calls_to("status"), 1);
    assert!(store.contains("A1"));
    assert_eq!(store.inflight_counts(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn insert_by_id_surfaces_fetch_failure() {
    let (_api, store, _rx) = setup(FakeApi::new(vec![]));

    let err = store.insert_by_id("missing").await.unwrap_err();
    assert!(matches!(err, CoreError::Shared(_)));
    assert!(!store.contains("missing"));
}

#[tokio::test(start_paused = true)]
async fn failed_field_fetch_keeps_the_others() {
    let api = FakeApi::new(vec![]);
    api.fail("settings");
    let (_api, store, _rx) = setup(api);

    let err = store
        .insert(appliance("A1", "Oven", true))
        .await
        .unwrap_err();
    let CoreError::DataUpdate { causes } = &err else {
        panic!("expected DataUpdate, got {err:?}");
    };
    assert_eq!(causes.len(), 1);

    let state = store.get("A1").unwrap();
    assert!(state.status.is_some());
    assert_eq!(state.settings, None);
}

#[tokio::test(start_paused = true)]
async fn program_change_refetches_program() {
    let (api, store, _rx) = setup(FakeApi::new(vec![]));
    store.insert(appliance("A1", "Oven", true)).await.unwrap();

    store
        .process_items("A1", &[EventItem {
            key: "activeProgram".into(),
            uri: Some("/api/homeappliances/A1/programs/active".into()),
            timestamp: Utc::now(),
            value: Some(json!("preHeating")),
        }])
        .await
        .unwrap();

    assert_eq!(api.calls_to("active"), 2);
    assert_eq!(api.calls_to("selected"), 1);
}

#[tokio::test(start_paused = true)]
async fn items_for_unknown_appliance_fetch_it() {
    let (api, store, mut rx) = setup(FakeApi::new(vec![appliance("A1", "Oven", true)]));

    store
        .process_items("A1", &[status_item("doorState", json!("open"))])
        .await
        .unwrap();

    assert_eq!(api.calls_to("appliance"), 1);
    assert_eq!(api.calls_to("status"), 1);
    let seen = drain(&mut rx);
    assert_eq!(&seen[..2], &[UpdateType::Info, UpdateType::IsConnected]);
    assert_eq!(sorted(seen[2..].to_vec()), FIELD_UPDATES);
    assert_eq!(
        store.get("A1").unwrap().status.unwrap()["doorState"],
        json!("closed")
    );
}
