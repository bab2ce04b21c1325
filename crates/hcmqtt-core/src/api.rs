// The slice of the Home Connect API the bridge depends on.
//
// `HomeConnectClient` is the production implementation. The store and the
// bridge only see this trait, so tests can drive them with a scripted fake.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use hcmqtt_api::{Appliance, ApplianceEvent, Error, HomeConnectClient, Program, Resource};
use serde_json::Value;

pub type FieldMap = BTreeMap<String, Value>;
pub type EventResultStream = BoxStream<'static, Result<ApplianceEvent, Error>>;

pub trait ApplianceApi: Send + Sync + 'static {
    /// Whether a refresh credential is stored.
    fn is_authorized(&self) -> Result<bool, Error>;

    fn list_appliances(&self) -> BoxFuture<'_, Result<Vec<Appliance>, Error>>;

    fn get_appliance<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Appliance, Error>>;

    fn get_status<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<FieldMap>, Error>>;

    fn get_settings<'a>(&'a self, id: &'a str)
    -> BoxFuture<'a, Result<Option<FieldMap>, Error>>;

    fn get_active_program<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Program>, Error>>;

    fn get_selected_program<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Program>, Error>>;

    fn update_appliance<'a>(
        &'a self,
        id: &'a str,
        resource: Resource<'a>,
        data: &'a Value,
    ) -> BoxFuture<'a, Result<(), Error>>;

    fn events(&self, idle_timeout: Duration) -> BoxFuture<'_, Result<EventResultStream, Error>>;
}

impl ApplianceApi for HomeConnectClient {
    fn is_authorized(&self) -> Result<bool, Error> {
        self.oauth().is_authorized()
    }

    fn list_appliances(&self) -> BoxFuture<'_, Result<Vec<Appliance>, Error>> {
        HomeConnectClient::list_appliances(self).boxed()
    }

    fn get_appliance<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Appliance, Error>> {
        HomeConnectClient::get_appliance(self, id).boxed()
    }

    fn get_status<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<FieldMap>, Error>> {
        HomeConnectClient::get_status(self, id).boxed()
    }

    fn get_settings<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<FieldMap>, Error>> {
        HomeConnectClient::get_settings(self, id).boxed()
    }

    fn get_active_program<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Program>, Error>> {
        HomeConnectClient::get_active_program(self, id).boxed()
    }

    fn get_selected_program<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Program>, Error>> {
        HomeConnectClient::get_selected_program(self, id).boxed()
    }

    fn update_appliance<'a>(
        &'a self,
        id: &'a str,
        resource: Resource<'a>,
        data: &'a Value,
    ) -> BoxFuture<'a, Result<(), Error>> {
        HomeConnectClient::update_appliance(self, id, resource, data).boxed()
    }

    fn events(&self, idle_timeout: Duration) -> BoxFuture<'_, Result<EventResultStream, Error>> {
        async move {
            let stream = HomeConnectClient::events(self, idle_timeout).await?;
            Ok(stream.boxed())
        }
        .boxed()
    }
}
