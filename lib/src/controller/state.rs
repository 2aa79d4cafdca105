/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::collections::BTreeMap;

use regex::Regex;

use super::{
    matching::{matched_config, ConfigIndex},
    task::Task,
    Stats,
};
use crate::{
    error::{Error, Result},
    labels::LabelSelector,
    receiver::{Receiver, ReceiverType},
    resources::{Resource, ResourceKind, ResourceRef, ResourceRegistry},
    router::Router,
    settings::RoutingSettings,
    silence::Silence,
    tenant::{ObjectKind, TenantId},
};

type ReceiverIndex = BTreeMap<TenantId, BTreeMap<String, Receiver>>;

/// State owned by the controller loop. Only the loop touches it.
pub(super) struct State {
    base: RoutingSettings,
    routing: RoutingSettings,
    registry: ResourceRegistry,
    /// Tenant-scoped resources, kept to rebuild the index when the
    /// routing settings change.
    resources: BTreeMap<ResourceRef, Resource>,
    receivers: ReceiverIndex,
    configs: ConfigIndex,
    routers: BTreeMap<String, Router>,
    silences: BTreeMap<String, Silence>,
}

impl State {
    pub(super) fn new(routing: RoutingSettings, registry: ResourceRegistry) -> Self {
        Self {
            base: routing.clone(),
            routing,
            registry,
            resources: BTreeMap::new(),
            receivers: BTreeMap::new(),
            configs: BTreeMap::new(),
            routers: BTreeMap::new(),
            silences: BTreeMap::new(),
        }
    }

    pub(super) fn handle(&mut self, task: Task) {
        log::trace!("controller: handling {}", task.name());
        // Send failures mean the caller gave up waiting.
        match task {
            Task::Apply { resource, done } => {
                let _ = done.send(self.apply(resource));
            }
            Task::Delete { reference, done } => {
                let _ = done.send(self.delete(&reference));
            }
            Task::RcvsFromTenants { tenants, done } => {
                let _ = done.send(self.rcvs_from_tenants(&tenants));
            }
            Task::RcvsFromName {
                names,
                regex,
                kind,
                done,
            } => {
                let _ = done.send(self.rcvs_from_name(&names, regex.as_ref(), kind));
            }
            Task::RcvsFromSelector {
                selector,
                kind,
                done,
            } => {
                let _ = done.send(self.rcvs_from_selector(&selector, kind));
            }
            Task::Receivers { tenant, kind, done } => {
                let _ = done.send(
                    self.iter_receivers(tenant.as_ref(), kind)
                        .cloned()
                        .collect(),
                );
            }
            Task::Configs { tenant, kind, done } => {
                let _ = done.send(
                    self.configs
                        .iter()
                        .filter(|(t, _)| tenant.as_ref().map_or(true, |tenant| tenant == *t))
                        .flat_map(|(_, configs)| configs.values())
                        .filter(|c| kind.map_or(true, |k| c.kind() == k))
                        .cloned()
                        .collect(),
                );
            }
            Task::ReceiverWithConfig {
                tenant,
                name,
                kind,
                done,
            } => {
                let _ = done.send(
                    self.iter_receivers(tenant.as_ref(), kind)
                        .filter(|r| name.as_ref().map_or(true, |n| &r.name == n))
                        .map(|r| {
                            let mut receiver = r.clone();
                            receiver.set_config(matched_config(r, &self.configs).cloned());
                            receiver
                        })
                        .collect(),
                );
            }
            Task::MatchConfig { receiver, done } => {
                let _ = done.send(self.match_config(receiver));
            }
            Task::Routers { done } => {
                let _ = done.send(self.routers.values().cloned().collect());
            }
            Task::Silences { done } => {
                let _ = done.send(self.silences.values().cloned().collect());
            }
            Task::Routing { done } => {
                let _ = done.send(self.routing.clone());
            }
            Task::Stats { done } => {
                let _ = done.send(Stats {
                    receivers: self.receivers.values().map(BTreeMap::len).sum(),
                    configs: self.configs.values().map(BTreeMap::len).sum(),
                    routers: self.routers.len(),
                    silences: self.silences.len(),
                });
            }
        }
    }

    fn apply(&mut self, resource: Resource) -> Result<()> {
        let reference = resource.reference();
        log::debug!("controller: applying {reference}");
        match resource {
            Resource::Router(object) => {
                let router = Router::new(object.metadata.name, object.spec)?;
                self.routers.insert(router.name.clone(), router);
                Ok(())
            }
            Resource::NotificationManager(object) => {
                self.routing = object.spec;
                self.resources.insert(
                    reference,
                    Resource::NotificationManager(crate::resources::Object {
                        metadata: object.metadata,
                        spec: self.routing.clone(),
                    }),
                );
                self.reindex()
            }
            resource => {
                self.resources.insert(reference, resource.clone());
                self.index(&resource)
            }
        }
    }

    fn delete(&mut self, reference: &ResourceRef) -> Result<()> {
        log::debug!("controller: deleting {reference}");
        self.resources.remove(reference);
        match reference.kind {
            ResourceKind::Receiver => self.remove_receivers(&reference.name),
            ResourceKind::Config => self.remove_configs(&reference.name),
            ResourceKind::Router => {
                self.routers.remove(&reference.name);
            }
            ResourceKind::Silence => {
                self.silences.remove(&reference.name);
            }
            ResourceKind::NotificationManager => {
                self.routing = self.base.clone();
                return self.reindex();
            }
        }
        Ok(())
    }

    /// Rebuild the tenant-scoped index after a routing settings change.
    fn reindex(&mut self) -> Result<()> {
        self.receivers.clear();
        self.configs.clear();
        self.silences.clear();
        let resources = self.resources.values().cloned().collect::<Vec<_>>();
        let errors = resources
            .iter()
            .filter_map(|resource| self.index(resource).err())
            .collect();
        Error::from_many(errors)
    }

    fn index(&mut self, resource: &Resource) -> Result<()> {
        match resource {
            Resource::Receiver(object) => {
                let tenant = self
                    .routing
                    .selectors
                    .tenant_id(&object.metadata.labels, ObjectKind::Receiver);
                self.remove_receivers(&object.metadata.name);
                let Some(tenant) = tenant else {
                    log::warn!(
                        "receiver {} cannot be attributed to a tenant; ignoring",
                        object.metadata.name
                    );
                    return Ok(());
                };
                let mut errors = Vec::new();
                for receiver in self.registry.receivers(object, &tenant) {
                    match receiver.and_then(|r| r.validate().map(|()| r)) {
                        Ok(receiver) => {
                            self.receivers
                                .entry(tenant.clone())
                                .or_default()
                                .insert(receiver.key(), receiver);
                        }
                        Err(e) => errors.push(e),
                    }
                }
                Error::from_many(errors)
            }
            Resource::Config(object) => {
                let tenant = self
                    .routing
                    .selectors
                    .tenant_id(&object.metadata.labels, ObjectKind::Config);
                self.remove_configs(&object.metadata.name);
                let Some(tenant) = tenant else {
                    log::warn!(
                        "config {} cannot be attributed to a tenant; ignoring",
                        object.metadata.name
                    );
                    return Ok(());
                };
                let mut errors = Vec::new();
                for config in self.registry.configs(object, &tenant) {
                    match config {
                        Ok(config) => {
                            self.configs
                                .entry(tenant.clone())
                                .or_default()
                                .insert(config.key(), config);
                        }
                        Err(e) => errors.push(e),
                    }
                }
                Error::from_many(errors)
            }
            Resource::Silence(object) => {
                let tenant = self
                    .routing
                    .selectors
                    .tenant_id(&object.metadata.labels, ObjectKind::Receiver)
                    .unwrap_or_else(TenantId::global);
                self.silences.insert(
                    object.metadata.name.clone(),
                    Silence {
                        name: object.metadata.name.clone(),
                        tenant,
                        spec: object.spec.clone(),
                    },
                );
                Ok(())
            }
            Resource::Router(_) | Resource::NotificationManager(_) => Ok(()),
        }
    }

    fn remove_receivers(&mut self, name: &str) {
        self.receivers.retain(|_, receivers| {
            receivers.retain(|_, r| r.name != name);
            !receivers.is_empty()
        });
    }

    fn remove_configs(&mut self, name: &str) {
        self.configs.retain(|_, configs| {
            configs.retain(|_, c| c.name != name);
            !configs.is_empty()
        });
    }

    fn iter_receivers<'a>(
        &'a self,
        tenant: Option<&'a TenantId>,
        kind: Option<ReceiverType>,
    ) -> impl Iterator<Item = &'a Receiver> + 'a {
        self.receivers
            .iter()
            .filter(move |(t, _)| tenant.map_or(true, |tenant| tenant == *t))
            .flat_map(|(_, receivers)| receivers.values())
            .filter(move |r| kind.map_or(true, |k| r.kind() == k))
    }

    /// Clone the selected receivers and attach their configs. Enabled
    /// receivers that need a config but have none are left out.
    fn resolve<'a, I>(&self, receivers: I) -> Vec<Receiver>
    where
        I: Iterator<Item = &'a Receiver>,
    {
        receivers
            .filter(|r| r.enabled)
            .filter_map(|r| {
                let config = matched_config(r, &self.configs);
                if config.is_none() && r.requires_config() {
                    log::warn!(
                        "no config matched receiver {} of tenant {}",
                        r.key(),
                        r.tenant
                    );
                    return None;
                }
                let mut receiver = r.clone();
                receiver.set_config(config.cloned());
                Some(receiver)
            })
            .collect()
    }

    fn rcvs_from_tenants(&self, tenants: &[TenantId]) -> Vec<Receiver> {
        let global = TenantId::global();
        let selected = std::iter::once(&global)
            .chain(tenants.iter().filter(|t| !t.is_global()))
            .filter_map(|t| self.receivers.get(t))
            .flat_map(BTreeMap::values);
        self.resolve(selected)
    }

    fn rcvs_from_name(
        &self,
        names: &[String],
        regex: Option<&Regex>,
        kind: Option<ReceiverType>,
    ) -> Vec<Receiver> {
        self.resolve(self.iter_receivers(None, kind).filter(|r| {
            names.contains(&r.name) || regex.is_some_and(|re| re.is_match(&r.name))
        }))
    }

    fn rcvs_from_selector(
        &self,
        selector: &LabelSelector,
        kind: Option<ReceiverType>,
    ) -> Vec<Receiver> {
        if selector.is_empty() {
            return Vec::new();
        }
        self.resolve(
            self.iter_receivers(None, kind)
                .filter(|r| selector.matches(&r.labels)),
        )
    }

    fn match_config(&self, mut receiver: Receiver) -> Result<Receiver> {
        if receiver.config.is_some() {
            return Ok(receiver);
        }
        match matched_config(&receiver, &self.configs) {
            Some(config) => {
                receiver.set_config(Some(config.clone()));
                Ok(receiver)
            }
            None if receiver.requires_config() => Err(Error::NoMatchedConfig(receiver.key())),
            None => Ok(receiver),
        }
    }
}
