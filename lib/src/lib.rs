/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

pub mod alert;
pub mod async_group;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod labels;
pub mod notify;
pub mod receiver;
pub mod resources;
pub mod router;
pub mod settings;
pub mod silence;
pub mod split;
pub mod stage;
pub mod store;
pub mod tenant;
pub mod throttle;
pub mod token;

mod hash;

pub use alert::{Alert, AlertStatus, AlertsPayload, Notification};
pub use config::{Config, ConfigSpec};
pub use context::ExecContext;
pub use controller::{Controller, Stats};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use labels::{LabelSelector, Labels};
pub use notify::{Notifier, NotifierEnv, NotifierRegistry};
pub use receiver::{Receiver, ReceiverSpec, ReceiverType};
pub use resources::{Resource, ResourceKind, ResourceRef, ResourceRegistry};
pub use router::Router;
pub use settings::{RoutePolicy, RoutingSettings, Settings};
pub use silence::Silence;
pub use stage::{MultiStage, Stage, StageData};
pub use store::AlertStore;
pub use tenant::{ObjectKind, TenantId, TenantSelectors};
