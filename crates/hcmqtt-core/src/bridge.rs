// ── Bridge orchestration ──
//
// Drives the whole lifecycle: wait until the user has authorized, load the
// appliance list, then follow the event stream under two watchdogs. Store
// notifications are turned into bus publications as they happen; inbound
// bus messages are routed to announcements and appliance commands.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::join_all;
use hcmqtt_api::{ApplianceEvent, CredentialStore, EventKind, HomeConnectClient, OAuthClient};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApplianceApi, EventResultStream};
use crate::bus::{CommandTopic, InboundMessage, Publication, Topics};
use crate::command::{ApplianceCommand, parse_command_payload};
use crate::config::{BridgeConfig, calculate_backoff};
use crate::error::CoreError;
use crate::model::StateUpdate;
use crate::store::ApplianceStore;
use crate::watchdog::Watchdog;

// ── Lifecycle phases ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitForAuth,
    Bootstrap,
    Monitor,
}

/// Why one event stream connection ended.
#[derive(Debug)]
enum StreamEnd {
    Cancelled,
    NotAuthorized,
    KeepAliveExpired,
    RestartExpired,
    Closed { received: bool },
    Failed { error: CoreError, received: bool },
}

// ── Bridge ───────────────────────────────────────────────────────────

/// The bridge between the appliance API and the bus.
///
/// Cheaply cloneable. Created idle; [`start`](Self::start) spawns the
/// background tasks and [`stop`](Self::stop) tears them down again.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    api: Arc<dyn ApplianceApi>,
    store: ApplianceStore,
    topics: Topics,
    publications: mpsc::UnboundedSender<Publication>,
    updates: Mutex<Option<mpsc::UnboundedReceiver<StateUpdate>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Create a bridge over `api`. Returns the receiver of every outbound
    /// publication; the caller owns the bus transport.
    pub fn new(
        config: BridgeConfig,
        api: Arc<dyn ApplianceApi>,
    ) -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (store, updates) = ApplianceStore::new(api.clone());
        let (publications, publications_rx) = mpsc::unbounded_channel();
        let topics = Topics::new(config.topic_prefix.clone());

        let bridge = Self {
            inner: Arc::new(BridgeInner {
                config,
                api,
                store,
                topics,
                publications,
                updates: Mutex::new(Some(updates)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        };
        (bridge, publications_rx)
    }

    /// Build the production API client from `config` and wrap it.
    pub fn connect(
        config: BridgeConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Publication>), CoreError> {
        let oauth = OAuthClient::new(config.oauth.clone(), credentials, &config.transport)?;
        let client = HomeConnectClient::new(config.api_url.clone(), oauth, &config.transport)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &ApplianceStore {
        &self.inner.store
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the run loop, the publisher and the inbound message handler.
    pub async fn start(&self, inbound: mpsc::Receiver<InboundMessage>) {
        let mut handles = self.inner.task_handles.lock().await;

        handles.push(tokio::spawn(inbound_task(self.clone(), inbound)));
        handles.push(tokio::spawn(run_task(self.clone())));
        if let Some(updates) = self.inner.updates.lock().await.take() {
            handles.push(tokio::spawn(publisher_task(self.clone(), updates)));
        }

        info!(prefix = self.inner.topics.prefix(), "bridge started");
    }

    /// Stop every background task and wait for them to finish.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.store.cancel_fetches();
        info!("bridge stopped");
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Apply one stream event (or a synthetic one) to the store.
    pub async fn handle_event(&self, event: ApplianceEvent) {
        let store = &self.inner.store;
        let id = event.appliance_id;
        let result = match event.kind {
            EventKind::KeepAlive | EventKind::Unrecognized => Ok(()),
            EventKind::Connected => store.connect(&id).await,
            EventKind::Disconnected => store.disconnect(&id).await,
            EventKind::Paired => store.insert_by_id(&id).await,
            EventKind::Depaired => {
                store.remove(&id);
                Ok(())
            }
            EventKind::Status(items) | EventKind::Notify(items) => {
                store.process_items(&id, &items).await
            }
            EventKind::Event(items) => {
                for item in &items {
                    self.publish(self.inner.topics.event_publication(&id, item));
                }
                store.process_items(&id, &items).await
            }
        };

        if let Err(e) = result {
            if !e.is_cancelled() {
                warn!(appliance = %id, error = %e, "failed to apply event");
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Run one command against an appliance.
    ///
    /// On success the command's synthetic event is applied right away. When
    /// the API call fails the appliance is fetched again in full.
    pub async fn execute_command(
        &self,
        appliance_id: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CoreError> {
        let appliance = self
            .inner
            .store
            .get(appliance_id)
            .ok_or_else(|| CoreError::UnknownAppliance {
                id: appliance_id.to_owned(),
            })?
            .appliance;
        let resolved = ApplianceCommand::parse(name, value)?.resolve(&appliance)?;

        match self
            .inner
            .api
            .update_appliance(appliance_id, resolved.target.resource(), &resolved.data)
            .await
        {
            Ok(()) => {
                debug!(appliance = appliance_id, command = name, "command applied");
                self.handle_event(resolved.event).await;
                Ok(())
            }
            Err(e) => {
                if let Err(refetch) = self.inner.store.insert_by_id(appliance_id).await {
                    warn!(appliance = appliance_id, error = %refetch, "re-fetch after failed command failed");
                }
                Err(e.into())
            }
        }
    }

    /// Route one inbound bus message. Command tasks go into `commands`.
    fn handle_inbound(&self, message: &InboundMessage, commands: &mut JoinSet<()>) {
        match self.inner.topics.parse_command_topic(&message.topic) {
            Some(CommandTopic::Global) => {
                let payload = String::from_utf8_lossy(&message.payload);
                if payload.trim() == "announce" {
                    self.announce();
                } else {
                    warn!(payload = %payload, "unknown global command");
                }
            }
            Some(CommandTopic::Appliance(id)) => {
                let commands_in_payload = match parse_command_payload(&message.payload) {
                    Ok(pairs) => pairs,
                    Err(e) => {
                        warn!(appliance = %id, error = %e, "ignoring command payload");
                        return;
                    }
                };
                for (name, value) in commands_in_payload {
                    let bridge = self.clone();
                    let id = id.clone();
                    commands.spawn(async move {
                        if let Err(e) = bridge.execute_command(&id, &name, &value).await {
                            warn!(appliance = %id, command = %name, error = %e, "command rejected");
                        }
                    });
                }
            }
            None => debug!(topic = %message.topic, "ignoring message on unknown topic"),
        }
    }

    /// Republish every state topic of every known appliance.
    pub fn announce(&self) {
        let publications = self.inner.topics.announce(&self.inner.store.snapshot());
        debug!(count = publications.len(), "announcing");
        for publication in publications {
            self.publish(publication);
        }
    }

    fn publish(&self, publication: Publication) {
        if self.inner.publications.send(publication).is_err() {
            warn!("bus transport gone; publication dropped");
        }
    }

    // ── Run loop phases ──────────────────────────────────────────────

    /// Sleep unless stopped first. Returns `false` when stopped.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    async fn wait_for_authorization(&self) -> Option<Phase> {
        let mut logged = false;
        loop {
            match self.inner.api.is_authorized() {
                Ok(true) => return Some(Phase::Bootstrap),
                Ok(false) if !logged => {
                    info!("waiting for authorization");
                    logged = true;
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "credential store unavailable"),
            }
            if !self.pause(self.inner.config.auth_poll_interval).await {
                return None;
            }
        }
    }

    async fn bootstrap(&self, events: &mut JoinSet<()>) -> Option<Phase> {
        events.shutdown().await;
        loop {
            let loaded = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return None,
                loaded = self.load_appliances() => loaded,
            };
            match loaded {
                Ok(()) => return Some(Phase::Monitor),
                Err(e) if e.is_not_authorized() => {
                    warn!(error = %e, "authorization lost");
                    return Some(Phase::WaitForAuth);
                }
                Err(e) => error!(error = %e, "failed to retrieve appliances"),
            }
            if !self.pause(self.inner.config.bootstrap_retry_delay).await {
                return None;
            }
        }
    }

    async fn load_appliances(&self) -> Result<(), CoreError> {
        let store = &self.inner.store;
        store.remove_all();

        info!("retrieving appliances");
        let appliances = self.inner.api.list_appliances().await?;
        info!(
            count = appliances.len(),
            appliances = ?appliances.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
            "found appliances"
        );

        let ids: Vec<String> = appliances.iter().map(|a| a.id.clone()).collect();
        let results = join_all(appliances.into_iter().map(|a| store.insert(a))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(appliance = %id, error = %e, "appliance details incomplete");
            }
        }
        Ok(())
    }

    async fn monitor(&self, events: &mut JoinSet<()>) -> Option<Phase> {
        let config = &self.inner.config;
        let mut attempt: u32 = 0;

        loop {
            let end = self.follow_stream(events).await;
            let received = match &end {
                StreamEnd::Cancelled => return None,
                StreamEnd::NotAuthorized => {
                    warn!("event stream rejected: not authorized");
                    return Some(Phase::WaitForAuth);
                }
                StreamEnd::KeepAliveExpired | StreamEnd::RestartExpired => {
                    warn!(reason = ?end, delay = ?config.restart_delay, "event stream stalled; restarting");
                    return self
                        .pause(config.restart_delay)
                        .await
                        .then_some(Phase::Bootstrap);
                }
                StreamEnd::Closed { received } | StreamEnd::Failed { received, .. } => *received,
            };

            if received {
                attempt = 0;
            }
            let delay = calculate_backoff(attempt, &config.reconnect);
            attempt = attempt.saturating_add(1);
            if let StreamEnd::Failed { error, .. } = &end {
                warn!(error = %error, ?delay, attempt, "event stream failed; reconnecting");
            } else {
                info!(?delay, "event stream closed by server; reconnecting");
            }
            if !self.pause(delay).await {
                return None;
            }
        }
    }

    /// Open the event stream and feed it to the store until it ends.
    async fn follow_stream(&self, events: &mut JoinSet<()>) -> StreamEnd {
        let cancel = &self.inner.cancel;
        let config = &self.inner.config;

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamEnd::Cancelled,
            opened = self.inner.api.events(config.stream_idle_timeout) => opened,
        };
        let mut stream: EventResultStream = match opened {
            Ok(stream) => stream,
            Err(e) if e.is_not_authorized() => return StreamEnd::NotAuthorized,
            Err(e) => {
                return StreamEnd::Failed {
                    error: e.into(),
                    received: false,
                };
            }
        };
        info!("event stream connected");

        let mut keep_alive = Watchdog::new(Some(config.keep_alive_timeout));
        let mut restart = Watchdog::new(config.restart_interval);
        let mut received = false;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamEnd::Cancelled,
                () = keep_alive.expired() => return StreamEnd::KeepAliveExpired,
                () = restart.expired() => return StreamEnd::RestartExpired,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        received = true;
                        keep_alive.reset();
                        if !event.kind.is_keep_alive() {
                            restart.reset();
                        }
                        if !matches!(event.kind, EventKind::KeepAlive | EventKind::Unrecognized) {
                            let bridge = self.clone();
                            events.spawn(async move { bridge.handle_event(event).await });
                        }
                    }
                    Some(Err(e)) => {
                        return StreamEnd::Failed {
                            error: e.into(),
                            received,
                        };
                    }
                    None => return StreamEnd::Closed { received },
                },
            }
            while events.try_join_next().is_some() {}
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// The lifecycle state machine. Runs until the bridge is stopped.
async fn run_task(bridge: Bridge) {
    let mut events = JoinSet::new();
    let mut phase = Phase::WaitForAuth;

    loop {
        debug!(?phase, "entering phase");
        let next = match phase {
            Phase::WaitForAuth => bridge.wait_for_authorization().await,
            Phase::Bootstrap => bridge.bootstrap(&mut events).await,
            Phase::Monitor => bridge.monitor(&mut events).await,
        };
        match next {
            Some(next) => phase = next,
            None => break,
        }
    }

    events.shutdown().await;
}

/// Turn store notifications into bus publications.
async fn publisher_task(bridge: Bridge, mut updates: mpsc::UnboundedReceiver<StateUpdate>) {
    let cancel = bridge.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            update = updates.recv() => {
                let Some(update) = update else { break };
                bridge.publish(bridge.inner.topics.state_publication(&update));
            }
        }
    }
}

/// Route inbound bus messages. Command tasks are aborted on stop.
async fn inbound_task(bridge: Bridge, mut inbound: mpsc::Receiver<InboundMessage>) {
    let cancel = bridge.inner.cancel.clone();
    let mut commands = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = inbound.recv() => {
                let Some(message) = message else { break };
                bridge.handle_inbound(&message, &mut commands);
            }
        }
        while commands.try_join_next().is_some() {}
    }

    commands.shutdown().await;
}
