/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

mod matching;
mod state;
mod task;

use regex::Regex;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    labels::LabelSelector,
    receiver::{Receiver, ReceiverType},
    resources::{Resource, ResourceRef, ResourceRegistry},
    router::Router,
    settings::{RoutingSettings, Settings},
    silence::Silence,
    tenant::TenantId,
};

use state::State;
use task::Task;

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default, Debug)]
pub struct Stats {
    pub receivers: usize,
    pub configs: usize,
    pub routers: usize,
    pub silences: usize,
}

/// Handle to the controller loop, which owns the receiver and config
/// index. Every read and write is a task processed by that single loop,
/// so the index needs no locking. Handles are cheap to clone.
#[derive(Clone)]
pub struct Controller {
    tx: mpsc::Sender<Task>,
    client: ClientWithMiddleware,
    tenant_sidecar: Option<Url>,
}

impl Controller {
    /// Start the controller loop. The loop ends when the last handle
    /// is dropped.
    pub fn spawn(
        settings: &Settings,
        registry: ResourceRegistry,
        client: ClientWithMiddleware,
    ) -> Result<Self> {
        let tenant_sidecar = settings
            .tenant_sidecar
            .as_deref()
            .map(|url| Url::parse(url).map_err(|e| Error::InvalidUrl(url.to_string(), e)))
            .transpose()?;
        let (tx, mut rx) = mpsc::channel(settings.controller.queue_capacity.max(1));
        let mut state = State::new(settings.routing.clone(), registry);

        tokio::spawn(
            async move {
                while let Some(task) = rx.recv().await {
                    state.handle(task);
                }
                log::debug!("controller: all handles dropped; stopping");
            }
            .instrument(tracing::info_span!("controller")),
        );

        Ok(Self {
            tx,
            client,
            tenant_sidecar,
        })
    }

    async fn request<T>(&self, task: impl FnOnce(oneshot::Sender<T>) -> Task) -> Result<T> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(task(done))
            .await
            .map_err(|_| Error::ControllerStopped)?;
        rx.await.map_err(|_| Error::ControllerStopped)
    }

    pub async fn apply(&self, resource: Resource) -> Result<()> {
        self.request(|done| Task::Apply { resource, done }).await?
    }

    pub async fn delete(&self, reference: ResourceRef) -> Result<()> {
        self.request(|done| Task::Delete { reference, done }).await?
    }

    /// Receivers entitled to alerts from a namespace: all global
    /// receivers, plus those of every tenant of the namespace.
    pub async fn rcvs_from_ns(&self, namespace: Option<&str>) -> Result<Vec<Receiver>> {
        let tenants = match namespace {
            Some(ns) => self.tenants_from_namespace(ns).await?,
            None => Vec::new(),
        };
        self.request(|done| Task::RcvsFromTenants { tenants, done })
            .await
    }

    pub async fn rcvs_from_name(
        &self,
        names: Vec<String>,
        regex: Option<Regex>,
        kind: Option<ReceiverType>,
    ) -> Result<Vec<Receiver>> {
        self.request(|done| Task::RcvsFromName {
            names,
            regex,
            kind,
            done,
        })
        .await
    }

    pub async fn rcvs_from_selector(
        &self,
        selector: LabelSelector,
        kind: Option<ReceiverType>,
    ) -> Result<Vec<Receiver>> {
        self.request(|done| Task::RcvsFromSelector {
            selector,
            kind,
            done,
        })
        .await
    }

    /// Receivers targeted by a router.
    pub async fn rcvs_from_router(&self, router: &Router) -> Result<Vec<Receiver>> {
        let mut receivers = self
            .rcvs_from_name(
                router.names().to_vec(),
                router.regex().cloned(),
                router.receiver_type(),
            )
            .await?;
        if let Some(selector) = router.selector() {
            receivers.extend(
                self.rcvs_from_selector(selector.clone(), router.receiver_type())
                    .await?,
            );
        }
        Ok(receivers)
    }

    /// Index dump, without configs attached.
    pub async fn receivers(
        &self,
        tenant: Option<TenantId>,
        kind: Option<ReceiverType>,
    ) -> Result<Vec<Receiver>> {
        self.request(|done| Task::Receivers { tenant, kind, done })
            .await
    }

    pub async fn configs(
        &self,
        tenant: Option<TenantId>,
        kind: Option<ReceiverType>,
    ) -> Result<Vec<Config>> {
        self.request(|done| Task::Configs { tenant, kind, done })
            .await
    }

    pub async fn receiver_with_config(
        &self,
        tenant: Option<TenantId>,
        name: Option<String>,
        kind: Option<ReceiverType>,
    ) -> Result<Vec<Receiver>> {
        self.request(|done| Task::ReceiverWithConfig {
            tenant,
            name,
            kind,
            done,
        })
        .await
    }

    /// Attach a config to a receiver that is not part of the index.
    pub async fn match_config(&self, receiver: Receiver) -> Result<Receiver> {
        self.request(|done| Task::MatchConfig { receiver, done })
            .await?
    }

    pub async fn routers(&self) -> Result<Vec<Router>> {
        self.request(|done| Task::Routers { done }).await
    }

    pub async fn silences(&self) -> Result<Vec<Silence>> {
        self.request(|done| Task::Silences { done }).await
    }

    pub async fn routing(&self) -> Result<RoutingSettings> {
        self.request(|done| Task::Routing { done }).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        self.request(|done| Task::Stats { done }).await
    }

    /// Tenants entitled to alerts from a namespace. Without a tenant
    /// sidecar the namespace itself is the tenant. Runs outside the
    /// controller loop.
    pub async fn tenants_from_namespace(&self, namespace: &str) -> Result<Vec<TenantId>> {
        let Some(sidecar) = &self.tenant_sidecar else {
            return Ok(vec![TenantId::new(namespace.to_string())]);
        };

        let mut url = sidecar
            .join("api/v2/tenant")
            .map_err(|e| Error::InvalidUrl(sidecar.to_string(), e))?;
        url.query_pairs_mut().append_pair("namespace", namespace);

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus(url.to_string(), response.status()));
        }
        let tenants: Vec<String> = response
            .json()
            .await
            .map_err(|e| Error::DecodeResponse(url.to_string(), e))?;
        Ok(tenants.into_iter().map(TenantId::new).collect())
    }
}
