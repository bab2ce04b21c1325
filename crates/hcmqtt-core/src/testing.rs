// Scripted `ApplianceApi` shared by the store and bridge tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt, stream};
use hcmqtt_api::{Appliance, ApplianceEvent, Error, Program, Resource};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::{ApplianceApi, EventResultStream, FieldMap};

pub(crate) fn appliance(id: &str, appliance_type: &str, connected: bool) -> Appliance {
    Appliance {
        id: id.into(),
        name: format!("{appliance_type} {id}"),
        brand: "Bosch".into(),
        appliance_type: appliance_type.into(),
        vib: String::new(),
        e_number: String::new(),
        is_connected: connected,
    }
}

pub(crate) struct FakeApi {
    appliances: Mutex<Vec<Appliance>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    streams: Mutex<VecDeque<mpsc::Receiver<Result<ApplianceEvent, Error>>>>,
    updates: Mutex<Vec<(String, String, Value)>>,
    authorized: AtomicBool,
    delay: Duration,
}

impl FakeApi {
    pub(crate) fn new(appliances: Vec<Appliance>) -> Self {
        Self {
            appliances: Mutex::new(appliances),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            streams: Mutex::new(VecDeque::new()),
            updates: Mutex::new(Vec::new()),
            authorized: AtomicBool::new(true),
            delay: Duration::ZERO,
        }
    }

    /// Every REST call sleeps this long before answering.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make calls of `kind` (`appliance`, `status`, `settings`, `active`,
    /// `selected`, `update`) fail with HTTP 500.
    pub(crate) fn fail(&self, kind: &'static str) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub(crate) fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Queue an event stream for the next `events()` call.
    pub(crate) fn push_stream(&self) -> mpsc::Sender<Result<ApplianceEvent, Error>> {
        let (tx, rx) = mpsc::channel(16);
        self.streams.lock().unwrap().push_back(rx);
        tx
    }

    pub(crate) fn calls_to(&self, kind: &str) -> usize {
        let prefix = format!("{kind}:");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub(crate) fn updates(&self) -> Vec<(String, String, Value)> {
        self.updates.lock().unwrap().clone()
    }

    async fn call(&self, kind: &'static str, id: &str) -> Result<(), Error> {
        self.calls.lock().unwrap().push(format!("{kind}:{id}"));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.lock().unwrap().contains(kind) {
            return Err(Error::Api {
                status: 500,
                body: format!("{kind} unavailable"),
            });
        }
        Ok(())
    }
}

impl ApplianceApi for FakeApi {
    fn is_authorized(&self) -> Result<bool, Error> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    fn list_appliances(&self) -> BoxFuture<'_, Result<Vec<Appliance>, Error>> {
        async move {
            self.call("list", "").await?;
            Ok(self.appliances.lock().unwrap().clone())
        }
        .boxed()
    }

    fn get_appliance<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Appliance, Error>> {
        async move {
            self.call("appliance", id).await?;
            self.appliances
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| Error::Api {
                    status: 404,
                    body: "unknown appliance".into(),
                })
        }
        .boxed()
    }

    fn get_status<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<FieldMap>, Error>> {
        async move {
            self.call("status", id).await?;
            Ok(Some(FieldMap::from([("doorState".into(), json!("closed"))])))
        }
        .boxed()
    }

    fn get_settings<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<FieldMap>, Error>> {
        async move {
            self.call("settings", id).await?;
            Ok(Some(FieldMap::from([("powerState".into(), json!("on"))])))
        }
        .boxed()
    }

    fn get_active_program<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Program>, Error>> {
        async move {
            self.call("active", id).await?;
            Ok(None)
        }
        .boxed()
    }

    fn get_selected_program<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Program>, Error>> {
        async move {
            self.call("selected", id).await?;
            Ok(Some(Program {
                name: "hotAir".into(),
                options: FieldMap::new(),
            }))
        }
        .boxed()
    }

    fn update_appliance<'a>(
        &'a self,
        id: &'a str,
        resource: Resource<'a>,
        data: &'a Value,
    ) -> BoxFuture<'a, Result<(), Error>> {
        async move {
            self.call("update", id).await?;
            self.updates
                .lock()
                .unwrap()
                .push((id.to_owned(), format!("{resource:?}"), data.clone()));
            Ok(())
        }
        .boxed()
    }

    fn events(&self, _idle_timeout: Duration) -> BoxFuture<'_, Result<EventResultStream, Error>> {
        async move {
            self.calls.lock().unwrap().push("events:".into());
            let next = self.streams.lock().unwrap().pop_front();
            Ok(match next {
                Some(rx) => ReceiverStream::new(rx).boxed(),
                None => stream::pending().boxed(),
            })
        }
        .boxed()
    }
}
