/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use regex::Regex;
use tokio::sync::oneshot;

use super::Stats;
use crate::{
    config::Config,
    error::Result,
    labels::LabelSelector,
    receiver::{Receiver, ReceiverType},
    resources::{Resource, ResourceRef},
    router::Router,
    settings::RoutingSettings,
    silence::Silence,
    tenant::TenantId,
};

/// A request to the controller loop. Every task carries the channel
/// its result is sent back on.
pub(super) enum Task {
    Apply {
        resource: Resource,
        done: oneshot::Sender<Result<()>>,
    },
    Delete {
        reference: ResourceRef,
        done: oneshot::Sender<Result<()>>,
    },
    RcvsFromTenants {
        tenants: Vec<TenantId>,
        done: oneshot::Sender<Vec<Receiver>>,
    },
    RcvsFromName {
        names: Vec<String>,
        regex: Option<Regex>,
        kind: Option<ReceiverType>,
        done: oneshot::Sender<Vec<Receiver>>,
    },
    RcvsFromSelector {
        selector: LabelSelector,
        kind: Option<ReceiverType>,
        done: oneshot::Sender<Vec<Receiver>>,
    },
    Receivers {
        tenant: Option<TenantId>,
        kind: Option<ReceiverType>,
        done: oneshot::Sender<Vec<Receiver>>,
    },
    Configs {
        tenant: Option<TenantId>,
        kind: Option<ReceiverType>,
        done: oneshot::Sender<Vec<Config>>,
    },
    ReceiverWithConfig {
        tenant: Option<TenantId>,
        name: Option<String>,
        kind: Option<ReceiverType>,
        done: oneshot::Sender<Vec<Receiver>>,
    },
    MatchConfig {
        receiver: Receiver,
        done: oneshot::Sender<Result<Receiver>>,
    },
    Routers {
        done: oneshot::Sender<Vec<Router>>,
    },
    Silences {
        done: oneshot::Sender<Vec<Silence>>,
    },
    Routing {
        done: oneshot::Sender<RoutingSettings>,
    },
    Stats {
        done: oneshot::Sender<Stats>,
    },
}

impl Task {
    pub(super) fn name(&self) -> &'static str {
        match self {
            Task::Apply { .. } => "apply",
            Task::Delete { .. } => "delete",
            Task::RcvsFromTenants { .. } => "rcvs_from_tenants",
            Task::RcvsFromName { .. } => "rcvs_from_name",
            Task::RcvsFromSelector { .. } => "rcvs_from_selector",
            Task::Receivers { .. } => "receivers",
            Task::Configs { .. } => "configs",
            Task::ReceiverWithConfig { .. } => "receiver_with_config",
            Task::MatchConfig { .. } => "match_config",
            Task::Routers { .. } => "routers",
            Task::Silences { .. } => "silences",
            Task::Routing { .. } => "routing",
            Task::Stats { .. } => "stats",
        }
    }
}
