// ── MQTT transport ──
//
// rumqttc glue around the bridge. The event loop task owns the connection:
// it announces availability and (re)subscribes on every ConnAck and forwards
// command messages to the bridge. A second task drains the bridge's
// publications into the client.

use std::time::Duration;

use hcmqtt_config::MqttSettings;
use hcmqtt_core::{InboundMessage, Publication, Topics};
use rumqttc::{
    AsyncClient, ClientError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ONLINE: &str = "true";
const OFFLINE: &str = "false";
const REQUEST_CAPACITY: usize = 64;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Connection options, with the offline marker registered as last will.
pub fn options(settings: &MqttSettings, topics: &Topics) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);
    if let Some((username, password)) = &settings.credentials {
        options.set_credentials(username, password.expose_secret());
    }
    options.set_last_will(LastWill::new(
        topics.bridge_connected(),
        OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    if settings.tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

pub fn client(settings: &MqttSettings, topics: &Topics) -> (AsyncClient, EventLoop) {
    AsyncClient::new(options(settings, topics), REQUEST_CAPACITY)
}

/// Poll the connection until the client disconnects or `cancel` fires.
pub async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Topics,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                if let Err(e) = on_connect(&client, &topics) {
                    warn!(error = %e, "failed to queue subscriptions");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if inbound.send(message).await.is_err() {
                    debug!("bridge stopped; dropping inbound message");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, retry_in = ?RETRY_DELAY, "MQTT connection error");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}

/// Runs from inside the event loop task, so nothing here may wait on it.
fn on_connect(client: &AsyncClient, topics: &Topics) -> Result<(), ClientError> {
    client.try_publish(topics.bridge_connected(), QoS::AtLeastOnce, true, ONLINE)?;
    client.try_subscribe(topics.global_command(), QoS::AtLeastOnce)?;
    client.try_subscribe(topics.appliance_command_filter(), QoS::AtLeastOnce)?;
    Ok(())
}

/// Forward bridge publications until the bridge drops its sender.
pub async fn forward(client: AsyncClient, mut publications: mpsc::UnboundedReceiver<Publication>) {
    while let Some(publication) = publications.recv().await {
        let topic = publication.topic;
        if let Err(e) = client
            .publish(
                topic.as_str(),
                QoS::AtLeastOnce,
                publication.retain,
                publication.payload,
            )
            .await
        {
            warn!(topic = %topic, error = %e, "publish failed");
        }
    }
}

/// Mark the bridge offline and close the connection.
pub async fn shutdown(client: &AsyncClient, topics: &Topics) -> Result<(), ClientError> {
    client
        .publish(topics.bridge_connected(), QoS::AtLeastOnce, true, OFFLINE)
        .await?;
    client.disconnect().await
}
