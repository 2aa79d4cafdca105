/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

mod credential;
mod registry;

use std::{collections::BTreeMap, fmt::Display, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    labels::Labels,
    router::RouterSpec,
    settings::RoutingSettings,
    silence::SilenceSpec,
};

pub use credential::{Credential, ValueSource};
pub use registry::{ConfigCtor, ReceiverCtor, ReceiverOptions, ResourceRegistry};

/// Provider sections of a Receiver or Config resource, keyed by the
/// provider type name.
pub type SectionMap = BTreeMap<String, serde_json::Value>;

/// A cluster configuration object.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
#[serde(tag = "kind")]
pub enum Resource {
    Receiver(Object<SectionMap>),
    Config(Object<SectionMap>),
    Router(Object<RouterSpec>),
    Silence(Object<SilenceSpec>),
    NotificationManager(Object<RoutingSettings>),
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Object<S> {
    pub metadata: Metadata,
    pub spec: S,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum ResourceKind {
    Receiver,
    Config,
    Router,
    Silence,
    NotificationManager,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Receiver(_) => ResourceKind::Receiver,
            Resource::Config(_) => ResourceKind::Config,
            Resource::Router(_) => ResourceKind::Router,
            Resource::Silence(_) => ResourceKind::Silence,
            Resource::NotificationManager(_) => ResourceKind::NotificationManager,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Resource::Receiver(o) | Resource::Config(o) => &o.metadata,
            Resource::Router(o) => &o.metadata,
            Resource::Silence(o) => &o.metadata,
            Resource::NotificationManager(o) => &o.metadata,
        }
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind(),
            name: self.metadata().name.clone(),
        }
    }

    /// Parse a (possibly multi-document) YAML or JSON file.
    pub fn parse_documents(path: &Path, data: &str) -> Result<Vec<Resource>> {
        serde_yaml::Deserializer::from_str(data)
            .filter_map(|doc| match serde_yaml::Value::deserialize(doc) {
                Ok(serde_yaml::Value::Null) => None,
                Ok(value) => Some(
                    serde_yaml::from_value(value)
                        .map_err(|e| Error::DecodeYaml(path.to_path_buf(), e)),
                ),
                Err(e) => Some(Err(Error::DecodeYaml(path.to_path_buf(), e))),
            })
            .collect()
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Receiver => write!(f, "Receiver"),
            ResourceKind::Config => write!(f, "Config"),
            ResourceKind::Router => write!(f, "Router"),
            ResourceKind::Silence => write!(f, "Silence"),
            ResourceKind::NotificationManager => write!(f, "NotificationManager"),
        }
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}
