/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    labels::Labels,
    receiver::ReceiverType,
    resources::Credential,
    tenant::TenantId,
};

/// Label holding the config priority. Lower values win; configs
/// without a usable priority sort last.
pub const PRIORITY_LABEL: &str = "notification-manager/priority";

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSpec {
    DingTalk(DingTalkConfig),
    Email(EmailConfig),
    Slack(SlackConfig),
    WeChat(WeChatConfig),
    Sms(SmsConfig),
    Telegram(TelegramConfig),
    Feishu(FeishuConfig),
    Pushover(PushoverConfig),
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DingTalkConfig {
    pub app_key: Credential,
    pub app_secret: Credential,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub smart_host: HostPort,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<Credential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hello: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct SlackConfig {
    pub token: Credential,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WeChatConfig {
    #[serde(default = "default_wechat_api", rename = "wechatApiUrl")]
    pub api_url: String,
    #[serde(rename = "wechatApiCorpId")]
    pub corp_id: String,
    #[serde(rename = "wechatApiAgentId")]
    pub agent_id: String,
    #[serde(rename = "wechatApiSecret")]
    pub api_secret: Credential,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SmsConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Credential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_name: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub token: Credential,
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FeishuConfig {
    pub app_id: Credential,
    pub app_secret: Credential,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct PushoverConfig {
    pub token: Credential,
}

fn default_wechat_api() -> String {
    String::from("https://qyapi.weixin.qq.com/cgi-bin/")
}

fn default_telegram_api() -> String {
    String::from("https://api.telegram.org/")
}

impl ConfigSpec {
    pub fn kind(&self) -> ReceiverType {
        match self {
            ConfigSpec::DingTalk(_) => ReceiverType::DingTalk,
            ConfigSpec::Email(_) => ReceiverType::Email,
            ConfigSpec::Slack(_) => ReceiverType::Slack,
            ConfigSpec::WeChat(_) => ReceiverType::WeChat,
            ConfigSpec::Sms(_) => ReceiverType::Sms,
            ConfigSpec::Telegram(_) => ReceiverType::Telegram,
            ConfigSpec::Feishu(_) => ReceiverType::Feishu,
            ConfigSpec::Pushover(_) => ReceiverType::Pushover,
        }
    }

    fn problem(&self) -> Option<&'static str> {
        match self {
            ConfigSpec::DingTalk(c) if !c.app_key.is_set() || !c.app_secret.is_set() => {
                Some("appKey and appSecret are required")
            }
            ConfigSpec::Email(c) if c.smart_host.host.is_empty() || c.smart_host.port == 0 => {
                Some("invalid smartHost")
            }
            ConfigSpec::Email(c) if !c.from.contains('@') => Some("invalid from address"),
            ConfigSpec::Slack(c) if !c.token.is_set() => Some("token is required"),
            ConfigSpec::WeChat(c) if c.corp_id.is_empty() || c.agent_id.is_empty() => {
                Some("corp id and agent id are required")
            }
            ConfigSpec::WeChat(c) if url::Url::parse(&c.api_url).is_err() => {
                Some("invalid api url")
            }
            ConfigSpec::Sms(c) if url::Url::parse(&c.url).is_err() => Some("invalid url"),
            ConfigSpec::Telegram(c) if !c.token.is_set() => Some("token is required"),
            ConfigSpec::Telegram(c) if url::Url::parse(&c.api_url).is_err() => {
                Some("invalid api url")
            }
            ConfigSpec::Feishu(c) if !c.app_id.is_set() || !c.app_secret.is_set() => {
                Some("appId and appSecret are required")
            }
            ConfigSpec::Pushover(c) if !c.token.is_set() => Some("token is required"),
            _ => None,
        }
    }
}

/// Provider credentials shared by the receivers of one type.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub name: String,
    pub tenant: TenantId,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default)]
    pub hash: String,
    pub spec: ConfigSpec,
}

#[derive(Serialize)]
struct HashedConfig<'a> {
    name: &'a str,
    tenant: &'a TenantId,
    labels: &'a Labels,
    spec: &'a ConfigSpec,
}

impl Config {
    pub fn new(name: String, tenant: TenantId, labels: Labels, spec: ConfigSpec) -> Self {
        let priority = labels.get(PRIORITY_LABEL).and_then(|p| p.trim().parse().ok());
        let hash = crate::hash::content_hash(&HashedConfig {
            name: &name,
            tenant: &tenant,
            labels: &labels,
            spec: &spec,
        });
        Self {
            name,
            tenant,
            labels,
            priority,
            hash,
            spec,
        }
    }

    pub fn kind(&self) -> ReceiverType {
        self.spec.kind()
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.kind(), self.name)
    }

    pub fn validate(&self) -> Result<()> {
        match self.spec.problem() {
            Some(problem) => Err(Error::InvalidConfig(self.key(), problem.to_string())),
            None => Ok(()),
        }
    }

    pub fn priority_rank(&self) -> i64 {
        self.priority.unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::{Config, ConfigSpec, PRIORITY_LABEL};
    use crate::{labels::Labels, tenant::TenantId};

    fn slack(labels: Labels) -> Config {
        let spec: ConfigSpec = serde_json::from_value(json!({"slack": {"token": "xoxb"}})).unwrap();
        Config::new("slack".into(), TenantId::default_config(), labels, spec)
    }

    #[test]
    fn priority_from_label() {
        let config = slack(Labels::from_iter([(PRIORITY_LABEL.into(), "5".into())]));
        assert_eq!(config.priority, Some(5));
        assert_eq!(config.priority_rank(), 5);

        let config = slack(Labels::from_iter([(PRIORITY_LABEL.into(), "high".into())]));
        assert_eq!(config.priority, None);
        assert_eq!(config.priority_rank(), i64::MAX);
    }

    #[test]
    fn validation() {
        let config = slack(Labels::new());
        assert_eq!(config.key(), "slack/slack");
        assert!(config.validate().is_ok());

        let spec: ConfigSpec = serde_json::from_value(json!({"email": {
            "smartHost": {"host": "smtp.example.com", "port": 25},
            "from": "nobody"
        }}))
        .unwrap();
        let config = Config::new("mail".into(), TenantId::default_config(), Labels::new(), spec);
        assert!(config.validate().is_err());
    }

    #[test]
    fn wechat_defaults() {
        let spec: ConfigSpec = serde_json::from_value(json!({"wechat": {
            "wechatApiCorpId": "corp",
            "wechatApiAgentId": "1000002",
            "wechatApiSecret": {"value": "s"}
        }}))
        .unwrap();
        match &spec {
            ConfigSpec::WeChat(c) => assert!(c.api_url.starts_with("https://")),
            _ => panic!("expected wechat config"),
        }
    }
}
