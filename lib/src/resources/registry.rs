/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize};

use super::{Object, SectionMap};
use crate::{
    config::{self, Config, ConfigSpec},
    error::{Error, Result},
    labels::LabelSelector,
    receiver::{self, Receiver, ReceiverSpec, ReceiverType},
    tenant::TenantId,
};

/// Options common to every receiver section.
#[derive(Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverOptions {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub alert_selector: Option<LabelSelector>,
    #[serde(default)]
    pub config_selector: Option<LabelSelector>,
}

fn enabled() -> bool {
    true
}

pub type ReceiverCtor =
    fn(serde_json::Value) -> serde_json::Result<(ReceiverOptions, ReceiverSpec)>;
pub type ConfigCtor = fn(serde_json::Value) -> serde_json::Result<ConfigSpec>;

/// Registration table mapping provider type names to the constructors
/// that decode their resource sections.
#[derive(Clone)]
pub struct ResourceRegistry {
    receivers: BTreeMap<ReceiverType, ReceiverCtor>,
    configs: BTreeMap<ReceiverType, ConfigCtor>,
}

fn receiver_ctor<T>(value: serde_json::Value) -> serde_json::Result<(ReceiverOptions, ReceiverSpec)>
where
    T: DeserializeOwned + Into<ReceiverSpec>,
{
    let options = ReceiverOptions::deserialize(&value)?;
    let provider = T::deserialize(value)?;
    Ok((options, provider.into()))
}

fn config_ctor<T>(value: serde_json::Value) -> serde_json::Result<ConfigSpec>
where
    T: DeserializeOwned + Into<ConfigSpec>,
{
    Ok(T::deserialize(value)?.into())
}

macro_rules! spec_from {
    ($spec:ident: $($variant:ident($t:ty)),* $(,)?) => {
        $(impl From<$t> for $spec {
            fn from(value: $t) -> Self {
                $spec::$variant(value)
            }
        })*
    };
}

spec_from!(ReceiverSpec:
    DingTalk(receiver::DingTalkReceiver),
    Email(receiver::EmailReceiver),
    Slack(receiver::SlackReceiver),
    Webhook(receiver::WebhookReceiver),
    WeChat(receiver::WeChatReceiver),
    Sms(receiver::SmsReceiver),
    Telegram(receiver::TelegramReceiver),
    Discord(receiver::DiscordReceiver),
    Feishu(receiver::FeishuReceiver),
    Pushover(receiver::PushoverReceiver),
);

spec_from!(ConfigSpec:
    DingTalk(config::DingTalkConfig),
    Email(config::EmailConfig),
    Slack(config::SlackConfig),
    WeChat(config::WeChatConfig),
    Sms(config::SmsConfig),
    Telegram(config::TelegramConfig),
    Feishu(config::FeishuConfig),
    Pushover(config::PushoverConfig),
);

impl Default for ResourceRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_receiver(
            ReceiverType::DingTalk,
            receiver_ctor::<receiver::DingTalkReceiver>,
        );
        registry.register_receiver(ReceiverType::Email, receiver_ctor::<receiver::EmailReceiver>);
        registry.register_receiver(ReceiverType::Slack, receiver_ctor::<receiver::SlackReceiver>);
        registry.register_receiver(
            ReceiverType::Webhook,
            receiver_ctor::<receiver::WebhookReceiver>,
        );
        registry.register_receiver(ReceiverType::WeChat, receiver_ctor::<receiver::WeChatReceiver>);
        registry.register_receiver(ReceiverType::Sms, receiver_ctor::<receiver::SmsReceiver>);
        registry.register_receiver(
            ReceiverType::Telegram,
            receiver_ctor::<receiver::TelegramReceiver>,
        );
        registry.register_receiver(
            ReceiverType::Discord,
            receiver_ctor::<receiver::DiscordReceiver>,
        );
        registry.register_receiver(ReceiverType::Feishu, receiver_ctor::<receiver::FeishuReceiver>);
        registry.register_receiver(
            ReceiverType::Pushover,
            receiver_ctor::<receiver::PushoverReceiver>,
        );

        registry.register_config(ReceiverType::DingTalk, config_ctor::<config::DingTalkConfig>);
        registry.register_config(ReceiverType::Email, config_ctor::<config::EmailConfig>);
        registry.register_config(ReceiverType::Slack, config_ctor::<config::SlackConfig>);
        registry.register_config(ReceiverType::WeChat, config_ctor::<config::WeChatConfig>);
        registry.register_config(ReceiverType::Sms, config_ctor::<config::SmsConfig>);
        registry.register_config(ReceiverType::Telegram, config_ctor::<config::TelegramConfig>);
        registry.register_config(ReceiverType::Feishu, config_ctor::<config::FeishuConfig>);
        registry.register_config(ReceiverType::Pushover, config_ctor::<config::PushoverConfig>);
        registry
    }
}

impl ResourceRegistry {
    pub fn empty() -> Self {
        Self {
            receivers: BTreeMap::new(),
            configs: BTreeMap::new(),
        }
    }

    pub fn register_receiver(&mut self, kind: ReceiverType, ctor: ReceiverCtor) {
        self.receivers.insert(kind, ctor);
    }

    pub fn register_config(&mut self, kind: ReceiverType, ctor: ConfigCtor) {
        self.configs.insert(kind, ctor);
    }

    /// Expand a Receiver resource into one receiver per provider
    /// section.
    pub fn receivers(
        &self,
        object: &Object<SectionMap>,
        tenant: &TenantId,
    ) -> Vec<Result<Receiver>> {
        object
            .spec
            .iter()
            .map(|(section, value)| {
                let kind = ReceiverType::from_str(section)?;
                let ctor = self
                    .receivers
                    .get(&kind)
                    .ok_or(Error::UnknownReceiverType(kind))?;
                let (options, spec) = ctor(value.clone())
                    .map_err(|e| {
                        Error::DecodeSection(format!("{}/{}", section, object.metadata.name), e)
                    })?;
                let mut receiver = Receiver::new(
                    object.metadata.name.clone(),
                    tenant.clone(),
                    object.metadata.labels.clone(),
                    spec,
                );
                receiver.enabled = options.enabled;
                receiver.alert_selector = options.alert_selector;
                receiver.config_selector = options.config_selector;
                receiver.rehash();
                Ok(receiver)
            })
            .collect()
    }

    /// Expand a Config resource into one config per provider section.
    pub fn configs(&self, object: &Object<SectionMap>, tenant: &TenantId) -> Vec<Result<Config>> {
        object
            .spec
            .iter()
            .map(|(section, value)| {
                let kind = ReceiverType::from_str(section)?;
                let ctor = self
                    .configs
                    .get(&kind)
                    .ok_or(Error::UnknownReceiverType(kind))?;
                let spec = ctor(value.clone())
                    .map_err(|e| {
                        Error::DecodeSection(format!("{}/{}", section, object.metadata.name), e)
                    })?;
                Ok(Config::new(
                    object.metadata.name.clone(),
                    tenant.clone(),
                    object.metadata.labels.clone(),
                    spec,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::ResourceRegistry;
    use crate::{
        error::Error,
        receiver::ReceiverType,
        resources::{Object, SectionMap},
        tenant::TenantId,
    };

    fn object(spec: serde_json::Value) -> Object<SectionMap> {
        serde_json::from_value(json!({
            "metadata": {"name": "ops", "labels": {"type": "tenant", "user": "alice"}},
            "spec": spec
        }))
        .unwrap()
    }

    #[test]
    fn expand_receiver_sections() {
        let registry = ResourceRegistry::default();
        let receivers = registry.receivers(
            &object(json!({
                "email": {"to": ["ops@example.com"], "enabled": false},
                "webhook": {
                    "url": "http://hooks/alerts",
                    "alertSelector": {"matchLabels": {"severity": "critical"}}
                }
            })),
            &TenantId::new("alice".into()),
        );

        let receivers = receivers.into_iter().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(receivers.len(), 2);
        assert_eq!(receivers[0].kind(), ReceiverType::Email);
        assert!(!receivers[0].enabled);
        assert_eq!(receivers[1].key(), "webhook/ops");
        assert!(receivers[1].alert_selector.is_some());
    }

    #[test]
    fn unregistered_section() {
        let registry = ResourceRegistry::empty();
        let result = registry.configs(
            &object(json!({"slack": {"token": "x"}})),
            &TenantId::default_config(),
        );
        assert!(matches!(
            result.as_slice(),
            [Err(Error::UnknownReceiverType(ReceiverType::Slack))]
        ));

        let registry = ResourceRegistry::default();
        let result = registry.configs(
            &object(json!({"pager": {"token": "x"}})),
            &TenantId::default_config(),
        );
        assert!(matches!(result.as_slice(), [Err(Error::InvalidReceiverType(_))]));
    }
}
