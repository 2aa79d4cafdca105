/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    alert::Alert,
    error::{Error, Result},
    labels::LabelSelector,
    receiver::ReceiverType,
};

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    pub alert_selector: LabelSelector,
    pub receivers: RouterReceivers,
}

/// Receivers targeted by a router. Names, name pattern and selector
/// are alternatives; a receiver matching any of them is selected.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RouterReceivers {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ReceiverType>,
}

#[derive(Serialize, Clone, Debug)]
pub struct Router {
    pub name: String,
    pub spec: RouterSpec,
    #[serde(skip)]
    regex: Option<Regex>,
}

impl Router {
    pub fn new(name: String, spec: RouterSpec) -> Result<Self> {
        let regex = spec
            .receivers
            .regex_name
            .as_deref()
            .map(|r| Regex::new(r).map_err(|e| Error::InvalidRegex(r.to_string(), e)))
            .transpose()?;
        Ok(Self { name, spec, regex })
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.spec.alert_selector.matches(&alert.labels)
    }

    pub fn names(&self) -> &[String] {
        &self.spec.receivers.name
    }

    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    pub fn selector(&self) -> Option<&LabelSelector> {
        self.spec.receivers.selector.as_ref()
    }

    pub fn receiver_type(&self) -> Option<ReceiverType> {
        self.spec.receivers.kind
    }
}
