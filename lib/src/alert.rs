/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::Labels;

pub const ALERTNAME_LABEL: &str = "alertname";
pub const NAMESPACE_LABEL: &str = "namespace";
pub const CLUSTER_LABEL: &str = "cluster";

/// Annotation set on alerts forwarded to the history receiver, so that
/// they are not recorded twice when they come back around.
pub const HISTORY_RECORDED_ANNOTATION: &str = "notification-manager/history-recorded";

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Default, Debug)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Firing,
    Resolved,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL", skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    status: AlertStatus,
    labels: &'a Labels,
    annotations: &'a Labels,
    starts_at: &'a Option<DateTime<Utc>>,
    ends_at: &'a Option<DateTime<Utc>>,
}

impl Alert {
    pub fn name(&self) -> Option<&str> {
        self.labels.get(ALERTNAME_LABEL).map(String::as_str)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.labels
            .get(NAMESPACE_LABEL)
            .map(String::as_str)
            .filter(|ns| !ns.is_empty())
    }

    /// Enrich a freshly ingested alert: add the cluster label if
    /// missing, derive the status from the end time when the sender
    /// did not set it, assign an id and compute the content hash.
    pub fn prepare(mut self, cluster: &str, now: DateTime<Utc>) -> Self {
        if !cluster.is_empty() && !self.labels.contains_key(CLUSTER_LABEL) {
            self.labels
                .insert(CLUSTER_LABEL.to_string(), cluster.to_string());
        }
        if self.ends_at.is_some_and(|t| t <= now) {
            self.status = AlertStatus::Resolved;
        }
        if self.id.is_empty() {
            self.id = match &self.fingerprint {
                Some(fp) => fp.clone(),
                None => uuid::Uuid::new_v4().to_string(),
            };
        }
        self.rehash();
        self
    }

    pub fn rehash(&mut self) {
        self.hash = crate::hash::content_hash(&HashedContent {
            status: self.status,
            labels: &self.labels,
            annotations: &self.annotations,
            starts_at: &self.starts_at,
            ends_at: &self.ends_at,
        });
    }

    pub fn is_recorded(&self) -> bool {
        self.annotations
            .get(HISTORY_RECORDED_ANNOTATION)
            .is_some_and(|v| v == "true")
    }

    pub fn mark_recorded(&mut self) {
        self.annotations
            .insert(HISTORY_RECORDED_ANNOTATION.to_string(), "true".to_string());
    }

    pub fn summary(&self) -> Option<&str> {
        ["summary", "message", "description"]
            .iter()
            .find_map(|k| self.annotations.get(*k))
            .map(String::as_str)
    }
}

impl Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Ingestion payload. Accepts the Alertmanager webhook body
/// (`{"alerts": [...]}`) as well as a bare list of alerts.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum AlertsPayload {
    Wrapped { alerts: Vec<Alert> },
    List(Vec<Alert>),
}

impl AlertsPayload {
    pub fn into_alerts(self) -> Vec<Alert> {
        match self {
            AlertsPayload::Wrapped { alerts } => alerts,
            AlertsPayload::List(alerts) => alerts,
        }
    }
}

/// Alertmanager-style notification body, as posted to webhooks.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub version: String,
    pub receiver: String,
    pub status: AlertStatus,
    pub group_labels: Labels,
    pub common_labels: Labels,
    pub common_annotations: Labels,
    pub alerts: Vec<Alert>,
}

impl Notification {
    pub fn new(receiver: &str, group_labels: &Labels, alerts: Vec<Alert>) -> Self {
        let status = if alerts.iter().any(|a| a.status == AlertStatus::Firing) {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        };
        let common_labels = common(alerts.iter().map(|a| &a.labels));
        let common_annotations = common(alerts.iter().map(|a| &a.annotations));
        Self {
            version: String::from("4"),
            receiver: receiver.to_string(),
            status,
            group_labels: group_labels.clone(),
            common_labels,
            common_annotations,
            alerts,
        }
    }
}

fn common<'a, I: Iterator<Item = &'a Labels>>(mut sets: I) -> Labels {
    let Some(first) = sets.next() else {
        return Labels::new();
    };
    sets.fold(first.clone(), |mut acc, labels| {
        acc.retain(|k, v| labels.get(k) == Some(v));
        acc
    })
}
