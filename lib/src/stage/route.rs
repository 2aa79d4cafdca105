/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::future::BoxFuture;

use super::{unexpected, Packet, Stage, StageData};
use crate::{
    alert::Alert,
    context::ExecContext,
    controller::Controller,
    error::{Error, Result},
    receiver::Receiver,
    router::Router,
    settings::RoutePolicy,
};

/// Resolves the receivers of every alert, from routers and from the
/// tenants of the alert's namespace, and merges the alerts per
/// receiver.
pub struct RouteStage {
    controller: Controller,
}

impl RouteStage {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }
}

/// Lookup failures only affect the alerts that needed the lookup,
/// unless the controller itself is gone.
fn recoverable(seq: u64, what: &str, result: Result<Vec<Receiver>>) -> Result<Vec<Receiver>> {
    match result {
        Ok(receivers) => Ok(receivers),
        Err(Error::ControllerStopped) => Err(Error::ControllerStopped),
        Err(e) => {
            log::warn!("pipeline {seq}: failed to get receivers for {what}: {e}");
            Ok(Vec::new())
        }
    }
}

impl Stage for RouteStage {
    fn name(&self) -> &'static str {
        "route"
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        data: StageData,
    ) -> BoxFuture<'a, Result<Option<StageData>>> {
        Box::pin(async move {
            let alerts = match data {
                StageData::Alerts(alerts) => alerts,
                other => return unexpected(self.name(), "alerts", &other),
            };

            let policy = self.controller.routing().await?.route_policy;
            let routers = self.controller.routers().await?;

            let mut by_namespace: BTreeMap<Option<String>, Vec<Alert>> = BTreeMap::new();
            for alert in alerts {
                by_namespace
                    .entry(alert.namespace().map(str::to_string))
                    .or_default()
                    .push(alert);
            }

            let mut router_receivers: HashMap<&str, Vec<Receiver>> = HashMap::new();
            let mut packets: BTreeMap<String, Packet> = BTreeMap::new();

            for (namespace, alerts) in by_namespace {
                let mut tenant_receivers: Option<Vec<Receiver>> = None;

                for alert in alerts {
                    let mut targets: Vec<Receiver> = Vec::new();
                    let matched = routers
                        .iter()
                        .filter(|router| router.matches(&alert))
                        .collect::<Vec<&Router>>();

                    for router in &matched {
                        if !router_receivers.contains_key(router.name.as_str()) {
                            let receivers = recoverable(
                                ctx.seq(),
                                &format!("router {}", router.name),
                                self.controller.rcvs_from_router(router).await,
                            )?;
                            router_receivers.insert(router.name.as_str(), receivers);
                        }
                        targets.extend(router_receivers[router.name.as_str()].iter().cloned());
                    }

                    let use_tenants = match policy {
                        RoutePolicy::All => true,
                        RoutePolicy::RouterFirst => matched.is_empty(),
                        RoutePolicy::RouterOnly => false,
                    };
                    if use_tenants {
                        if tenant_receivers.is_none() {
                            tenant_receivers = Some(recoverable(
                                ctx.seq(),
                                &format!("namespace {}", namespace.as_deref().unwrap_or("<none>")),
                                self.controller.rcvs_from_ns(namespace.as_deref()).await,
                            )?);
                        }
                        targets.extend(tenant_receivers.iter().flatten().cloned());
                    }

                    let mut seen = BTreeSet::new();
                    for receiver in targets {
                        if !seen.insert(receiver.hash.clone()) {
                            continue;
                        }
                        packets
                            .entry(receiver.hash.clone())
                            .or_insert_with(|| Packet {
                                receiver,
                                alerts: Vec::new(),
                            })
                            .alerts
                            .push(alert.clone());
                    }
                }
            }

            log::debug!("pipeline {}: routed to {} receivers", ctx.seq(), packets.len());
            let packets = packets.into_values().collect::<Vec<_>>();
            Ok((!packets.is_empty()).then_some(StageData::Packets(packets)))
        })
    }
}
