/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::labels::{LabelSelector, Labels};

const GLOBAL_TENANT: &str = "notification-manager/type/global";
const DEFAULT_CONFIG_TENANT: &str = "notification-manager/type/default";

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn global() -> Self {
        Self(GLOBAL_TENANT.to_string())
    }

    pub fn default_config() -> Self {
        Self(DEFAULT_CONFIG_TENANT.to_string())
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_TENANT
    }

    pub fn is_default_config(&self) -> bool {
        self.0 == DEFAULT_CONFIG_TENANT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of object being attributed to a tenant. Only configs can
/// fall back to the default-config scope.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ObjectKind {
    Receiver,
    Config,
}

/// Selectors deciding which tenant a receiver, config or silence
/// belongs to.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantSelectors {
    pub tenant_key: String,
    pub global_receiver_selector: LabelSelector,
    pub tenant_receiver_selector: LabelSelector,
    pub default_config_selector: LabelSelector,
}

impl Default for TenantSelectors {
    fn default() -> Self {
        Self {
            tenant_key: String::from("user"),
            global_receiver_selector: LabelSelector::from_labels([("type", "global")]),
            tenant_receiver_selector: LabelSelector::from_labels([("type", "tenant")]),
            default_config_selector: LabelSelector::from_labels([("type", "default")]),
        }
    }
}

impl TenantSelectors {
    /// Attribute an object to a tenant from its labels. Returns `None`
    /// when the object cannot be attributed and must be discarded.
    pub fn tenant_id(&self, labels: &Labels, kind: ObjectKind) -> Option<TenantId> {
        if self.global_receiver_selector.any_match_label(labels) {
            return Some(TenantId::global());
        }

        if self.tenant_receiver_selector.any_match_label(labels) {
            if let Some(tenant) = labels.get(&self.tenant_key).filter(|t| !t.is_empty()) {
                return Some(TenantId::new(tenant.clone()));
            }
        }

        if kind == ObjectKind::Config && self.default_config_selector.matches(labels) {
            return Some(TenantId::default_config());
        }

        None
    }
}
