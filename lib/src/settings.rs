/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    receiver::ReceiverType,
    tenant::TenantSelectors,
};

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Default, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub cluster: String,
    #[serde(flatten)]
    pub routing: RoutingSettings,
    pub store: StoreSettings,
    pub dispatcher: DispatcherSettings,
    pub controller: ControllerSettings,
    pub notify: NotifySettings,
    pub history: Option<HistorySettings>,
    pub tenant_sidecar: Option<String>,
}

/// The part of the settings that may be overridden at runtime by a
/// NotificationManager resource.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingSettings {
    #[serde(flatten)]
    pub selectors: TenantSelectors,
    pub route_policy: RoutePolicy,
    pub group_labels: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default, Debug)]
pub enum RoutePolicy {
    /// Send to router receivers and to tenant receivers.
    #[default]
    All,
    /// Send to tenant receivers only when no router matched.
    RouterFirst,
    /// Send to router receivers only.
    RouterOnly,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub capacity: usize,
    #[serde(with = "humantime_serde")]
    pub push_timeout: Duration,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatcherSettings {
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub batch_wait: Duration,
    pub workers: usize,
    #[serde(with = "humantime_serde")]
    pub worker_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pipeline_timeout: Duration,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerSettings {
    pub queue_capacity: usize,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySettings {
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    pub throttle: BTreeMap<ReceiverType, ThrottleSettings>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleSettings {
    pub threshold: usize,
    #[serde(with = "humantime_serde")]
    pub unit: Duration,
    #[serde(with = "humantime_serde")]
    pub max_wait_time: Duration,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistorySettings {
    pub url: String,
    #[serde(default = "default_history_retry", with = "humantime_serde")]
    pub retry_delay: Duration,
}

fn default_history_retry() -> Duration {
    Duration::from_secs(10)
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            selectors: TenantSelectors::default(),
            route_policy: RoutePolicy::default(),
            group_labels: vec![String::from("alertname"), String::from("namespace")],
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            push_timeout: Duration::from_secs(3),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_wait: Duration::from_secs(1),
            workers: 100,
            worker_timeout: Duration::from_secs(30),
            pipeline_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
        }
    }
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            throttle: BTreeMap::from_iter([(
                ReceiverType::DingTalk,
                ThrottleSettings {
                    threshold: 20,
                    unit: Duration::from_secs(60),
                    max_wait_time: Duration::from_secs(10),
                },
            )]),
        }
    }
}

impl Settings {
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::ReadFile(path.to_path_buf(), e))?;
        serde_yaml::from_slice(&data).map_err(|e| Error::DecodeYaml(path.to_path_buf(), e))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{RoutePolicy, Settings};
    use crate::receiver::ReceiverType;

    #[test]
    fn decode_partial_settings() {
        let settings: Settings = serde_yaml::from_str(
            r#"
cluster: prod
tenantKey: team
routePolicy: RouterFirst
groupLabels: [alertname]
dispatcher:
  batchWait: 500ms
notify:
  throttle:
    feishu:
      threshold: 5
      unit: 1s
      maxWaitTime: 2s
history:
  url: http://history:8080/
"#,
        )
        .unwrap();

        assert_eq!(settings.cluster, "prod");
        assert_eq!(settings.routing.selectors.tenant_key, "team");
        assert_eq!(settings.routing.route_policy, RoutePolicy::RouterFirst);
        assert_eq!(settings.routing.group_labels, vec!["alertname".to_string()]);
        assert_eq!(settings.dispatcher.batch_wait, Duration::from_millis(500));
        assert_eq!(settings.dispatcher.batch_size, 100);
        assert_eq!(
            settings.notify.throttle[&ReceiverType::Feishu].threshold,
            5
        );
        assert_eq!(
            settings.history.unwrap().retry_delay,
            Duration::from_secs(10)
        );
    }
}
