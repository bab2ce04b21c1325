#![allow(clippy::unwrap_used)]
// End-to-end: the bridge against a mocked appliance API.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hcmqtt_api::{MemoryCredentialStore, OAuthConfig};
use hcmqtt_core::{Bridge, BridgeConfig, InboundMessage, Publication};

// ── Helpers ─────────────────────────────────────────────────────────

fn bridge_config(server: &MockServer) -> BridgeConfig {
    let oauth = OAuthConfig {
        client_id: "client-id".into(),
        client_secret: SecretString::from("client-secret".to_owned()),
        redirect_url: Url::parse("http://localhost:8080/oauth/callback").unwrap(),
        oauth_url: Url::parse(&format!("{}/security/oauth/", server.uri())).unwrap(),
        scope: "IdentifyAppliance Monitor Control Settings".into(),
    };
    let mut config =
        BridgeConfig::with_defaults(Url::parse(&format!("{}/api/", server.uri())).unwrap(), oauth);
    config.topic_prefix = "hc".into();
    config
}

async fn mount_get(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_appliance(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/security/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "token_type": "Bearer",
            "expires_in": 86400,
            "refresh_token": "refresh-2",
        })))
        .mount(server)
        .await;

    mount_get(
        server,
        "/api/homeappliances",
        ResponseTemplate::new(200).set_body_json(json!({
            "data": { "homeappliances": [{
                "haId": "A1",
                "name": "Oven",
                "brand": "Bosch",
                "type": "Oven",
                "vib": "HBG6764S6",
                "enumber": "HBG6764S6/01",
                "connected": true
            }]}
        })),
    )
    .await;
    mount_get(
        server,
        "/api/homeappliances/A1/status",
        ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": [
                { "key": "BSH.Common.Status.DoorState", "value": "BSH.Common.EnumType.DoorState.Closed" }
            ]}
        })),
    )
    .await;
    mount_get(
        server,
        "/api/homeappliances/A1/settings",
        ResponseTemplate::new(200).set_body_json(json!({
            "data": { "settings": [
                { "key": "BSH.Common.Setting.PowerState", "value": "BSH.Common.EnumType.PowerState.On" }
            ]}
        })),
    )
    .await;
    mount_get(
        server,
        "/api/homeappliances/A1/programs/active",
        ResponseTemplate::new(404),
    )
    .await;
    mount_get(
        server,
        "/api/homeappliances/A1/programs/selected",
        ResponseTemplate::new(404),
    )
    .await;
}

/// Wait until a publication on `topic` satisfies `accept`.
async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Publication>,
    topic: &str,
    accept: impl Fn(&Value) -> bool,
) -> Publication {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let publication = rx.recv().await.unwrap();
            if publication.topic != topic {
                continue;
            }
            let payload: Value = serde_json::from_str(&publication.payload).unwrap();
            if accept(&payload) {
                return publication;
            }
        }
    })
    .await
    .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bootstrap_and_stream_reach_the_bus() {
    let server = MockServer::start().await;
    mount_appliance(&server).await;

    let body = concat!(
        "event: KEEP-ALIVE\n\n",
        "id: A1\nevent: STATUS\ndata: {\"items\":[{\"key\":\"BSH.Common.Status.DoorState\",",
        "\"uri\":\"/api/homeappliances/A1/status/BSH.Common.Status.DoorState\",",
        "\"timestamp\":1700000000,\"value\":\"BSH.Common.EnumType.DoorState.Open\"}]}\n\n",
    );
    mount_get(
        &server,
        "/api/homeappliances/events",
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body),
    )
    .await;

    let (bridge, mut rx) = Bridge::connect(
        bridge_config(&server),
        Arc::new(MemoryCredentialStore::with_token("refresh-1")),
    )
    .unwrap();
    let (_inbound, inbound_rx) = mpsc::channel(8);
    bridge.start(inbound_rx).await;

    let info = wait_for(&mut rx, "hc/A1/info", |_| true).await;
    assert!(info.retain);
    assert_eq!(
        serde_json::from_str::<Value>(&info.payload).unwrap(),
        json!({ "id": "A1", "name": "Oven", "brand": "Bosch", "type": "Oven" })
    );

    let status = wait_for(&mut rx, "hc/A1/status", |v| v["doorState"] == "open").await;
    assert!(status.retain);

    bridge.stop().await;
}

#[tokio::test]
async fn test_power_command_writes_setting() {
    let server = MockServer::start().await;
    mount_appliance(&server).await;
    mount_get(
        &server,
        "/api/homeappliances/events",
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string("event: KEEP-ALIVE\n\n")
            .set_delay(Duration::from_secs(30)),
    )
    .await;
    Mock::given(method("PUT"))
        .and(path(
            "/api/homeappliances/A1/settings/BSH.Common.Setting.PowerState",
        ))
        .and(body_json(json!({
            "data": {
                "key": "BSH.Common.Setting.PowerState",
                "value": "BSH.Common.EnumType.PowerState.Standby"
            }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (bridge, mut rx) = Bridge::connect(
        bridge_config(&server),
        Arc::new(MemoryCredentialStore::with_token("refresh-1")),
    )
    .unwrap();
    let (inbound, inbound_rx) = mpsc::channel(8);
    bridge.start(inbound_rx).await;

    wait_for(&mut rx, "hc/A1/settings", |v| v["powerState"] == "on").await;

    inbound
        .send(InboundMessage {
            topic: "hc/A1/command".into(),
            payload: br#"{"power":"off"}"#.to_vec(),
        })
        .await
        .unwrap();

    wait_for(&mut rx, "hc/A1/settings", |v| v["powerState"] == "standby").await;

    bridge.stop().await;
    server.verify().await;
}
