/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::{
    config::Config,
    error::{Error, Result},
    labels::{LabelSelector, Labels},
    resources::Credential,
    tenant::TenantId,
};

#[derive(
    SerializeDisplay, DeserializeFromStr, PartialOrd, Ord, PartialEq, Eq, Hash, Clone, Copy, Debug,
)]
pub enum ReceiverType {
    DingTalk,
    Email,
    Slack,
    Webhook,
    WeChat,
    Sms,
    Telegram,
    Discord,
    Feishu,
    Pushover,
}

impl ReceiverType {
    pub const ALL: [ReceiverType; 10] = [
        ReceiverType::DingTalk,
        ReceiverType::Email,
        ReceiverType::Slack,
        ReceiverType::Webhook,
        ReceiverType::WeChat,
        ReceiverType::Sms,
        ReceiverType::Telegram,
        ReceiverType::Discord,
        ReceiverType::Feishu,
        ReceiverType::Pushover,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReceiverType::DingTalk => "dingtalk",
            ReceiverType::Email => "email",
            ReceiverType::Slack => "slack",
            ReceiverType::Webhook => "webhook",
            ReceiverType::WeChat => "wechat",
            ReceiverType::Sms => "sms",
            ReceiverType::Telegram => "telegram",
            ReceiverType::Discord => "discord",
            ReceiverType::Feishu => "feishu",
            ReceiverType::Pushover => "pushover",
        }
    }
}

impl Display for ReceiverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReceiverType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidReceiverType(s.to_string()))
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverSpec {
    DingTalk(DingTalkReceiver),
    Email(EmailReceiver),
    Slack(SlackReceiver),
    Webhook(WebhookReceiver),
    WeChat(WeChatReceiver),
    Sms(SmsReceiver),
    Telegram(TelegramReceiver),
    Discord(DiscordReceiver),
    Feishu(FeishuReceiver),
    Pushover(PushoverReceiver),
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DingTalkReceiver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatbot: Option<ChatBot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chat_ids: Vec<String>,
}

/// Incoming-webhook style chat bot (DingTalk, Feishu).
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatBot {
    pub webhook: Credential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Credential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub at_mobiles: Vec<String>,
    #[serde(default)]
    pub at_all: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
pub struct EmailReceiver {
    pub to: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
pub struct SlackReceiver {
    pub channels: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct WebhookReceiver {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WeChatReceiver {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_user: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_party: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_tag: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SmsReceiver {
    pub phone_numbers: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TelegramReceiver {
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mention_users: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DiscordReceiver {
    pub webhook: Credential,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_roles: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FeishuReceiver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatbot: Option<ChatBot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub department: Vec<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PushoverReceiver {
    pub user_keys: Vec<String>,
}

impl ReceiverSpec {
    pub fn kind(&self) -> ReceiverType {
        match self {
            ReceiverSpec::DingTalk(_) => ReceiverType::DingTalk,
            ReceiverSpec::Email(_) => ReceiverType::Email,
            ReceiverSpec::Slack(_) => ReceiverType::Slack,
            ReceiverSpec::Webhook(_) => ReceiverType::Webhook,
            ReceiverSpec::WeChat(_) => ReceiverType::WeChat,
            ReceiverSpec::Sms(_) => ReceiverType::Sms,
            ReceiverSpec::Telegram(_) => ReceiverType::Telegram,
            ReceiverSpec::Discord(_) => ReceiverType::Discord,
            ReceiverSpec::Feishu(_) => ReceiverType::Feishu,
            ReceiverSpec::Pushover(_) => ReceiverType::Pushover,
        }
    }

    fn problem(&self) -> Option<&'static str> {
        match self {
            ReceiverSpec::DingTalk(r) if r.chatbot.is_none() && r.chat_ids.is_empty() => {
                Some("either a chatbot or chat ids must be given")
            }
            ReceiverSpec::DingTalk(DingTalkReceiver {
                chatbot: Some(bot), ..
            })
            | ReceiverSpec::Feishu(FeishuReceiver {
                chatbot: Some(bot), ..
            }) if !bot.webhook.is_set() => Some("chatbot webhook is empty"),
            ReceiverSpec::Email(r) if r.to.is_empty() => Some("no recipients"),
            ReceiverSpec::Email(r) if r.to.iter().any(|a| !a.contains('@')) => {
                Some("invalid email address")
            }
            ReceiverSpec::Slack(r) if r.channels.is_empty() => Some("no channels"),
            ReceiverSpec::Webhook(r) if url::Url::parse(&r.url).is_err() => Some("invalid url"),
            ReceiverSpec::WeChat(r)
                if r.to_user.is_empty() && r.to_party.is_empty() && r.to_tag.is_empty() =>
            {
                Some("one of toUser, toParty or toTag must be given")
            }
            ReceiverSpec::Sms(r) if r.phone_numbers.is_empty() => Some("no phone numbers"),
            ReceiverSpec::Telegram(r) if r.channels.is_empty() => Some("no channels"),
            ReceiverSpec::Discord(r) if !r.webhook.is_set() => Some("webhook is empty"),
            ReceiverSpec::Feishu(r)
                if r.chatbot.is_none() && r.user.is_empty() && r.department.is_empty() =>
            {
                Some("one of chatbot, user or department must be given")
            }
            ReceiverSpec::Pushover(r) if r.user_keys.is_empty() => Some("no user keys"),
            _ => None,
        }
    }

    /// Whether delivery needs credentials from a matched config.
    pub fn requires_config(&self) -> bool {
        match self {
            ReceiverSpec::Webhook(_) | ReceiverSpec::Discord(_) => false,
            ReceiverSpec::DingTalk(r) => !r.chat_ids.is_empty(),
            ReceiverSpec::Feishu(r) => !r.user.is_empty() || !r.department.is_empty(),
            _ => true,
        }
    }
}

/// A resolved delivery target. Values are handed out as independent
/// clones; the controller's index is never shared with a pipeline run.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Receiver {
    pub name: String,
    pub tenant: TenantId,
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    #[serde(default)]
    pub hash: String,
    pub spec: ReceiverSpec,
}

#[derive(Serialize)]
struct HashedReceiver<'a> {
    name: &'a str,
    tenant: &'a TenantId,
    enabled: bool,
    labels: &'a Labels,
    alert_selector: &'a Option<LabelSelector>,
    config_selector: &'a Option<LabelSelector>,
    config: Option<&'a str>,
    spec: &'a ReceiverSpec,
}

impl Receiver {
    pub fn new(
        name: String,
        tenant: TenantId,
        labels: Labels,
        spec: ReceiverSpec,
    ) -> Self {
        let mut receiver = Self {
            name,
            tenant,
            enabled: true,
            labels,
            alert_selector: None,
            config_selector: None,
            config: None,
            hash: String::new(),
            spec,
        };
        receiver.rehash();
        receiver
    }

    pub fn kind(&self) -> ReceiverType {
        self.spec.kind()
    }

    /// Index key within a tenant: `type/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind(), self.name)
    }

    pub fn validate(&self) -> Result<()> {
        match self.spec.problem() {
            Some(problem) => Err(Error::InvalidReceiver(self.key(), problem.to_string())),
            None => Ok(()),
        }
    }

    pub fn requires_config(&self) -> bool {
        self.spec.requires_config()
    }

    pub fn set_config(&mut self, config: Option<Config>) {
        self.config = config;
        self.rehash();
    }

    pub fn rehash(&mut self) {
        self.hash = crate::hash::content_hash(&HashedReceiver {
            name: &self.name,
            tenant: &self.tenant,
            enabled: self.enabled,
            labels: &self.labels,
            alert_selector: &self.alert_selector,
            config_selector: &self.config_selector,
            config: self.config.as_ref().map(|c| c.hash.as_str()),
            spec: &self.spec,
        });
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use serde_json::json;

    use super::{Receiver, ReceiverSpec, ReceiverType, WebhookReceiver};
    use crate::{labels::Labels, tenant::TenantId};

    #[test]
    fn receiver_type_names() {
        for kind in ReceiverType::ALL {
            assert_eq!(ReceiverType::from_str(&kind.to_string()).unwrap(), kind);
        }
        assert!(ReceiverType::from_str("pager").is_err());
        assert_eq!(
            serde_json::to_value(ReceiverType::WeChat).unwrap(),
            json!("wechat")
        );
    }

    #[test]
    fn webhook_receiver() {
        let receiver = Receiver::new(
            "hook".into(),
            TenantId::global(),
            Labels::new(),
            ReceiverSpec::Webhook(WebhookReceiver {
                url: "http://example.com/alerts".into(),
                headers: Default::default(),
            }),
        );
        assert_eq!(receiver.key(), "webhook/hook");
        assert!(receiver.validate().is_ok());
        assert!(!receiver.requires_config());

        let mut broken = receiver.clone();
        broken.spec = ReceiverSpec::Webhook(WebhookReceiver {
            url: "not a url".into(),
            headers: Default::default(),
        });
        assert!(broken.validate().is_err());
    }

    #[test]
    fn hash_follows_content() {
        let spec: ReceiverSpec =
            serde_json::from_value(json!({"email": {"to": ["ops@example.com"]}})).unwrap();
        let a = Receiver::new("mail".into(), TenantId::new("alice".into()), Labels::new(), spec);
        let mut b = a.clone();
        b.rehash();
        assert_eq!(a.hash, b.hash);
        b.name = "other".into();
        b.rehash();
        assert_ne!(a.hash, b.hash);
        assert!(a.requires_config());
    }
}
