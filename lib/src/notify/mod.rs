/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

mod dingtalk;
mod discord;
mod email;
#[cfg(test)]
mod fake_http;
mod feishu;
mod pushover;
mod slack;
mod sms;
mod telegram;
mod webhook;
mod wechat;

use std::{collections::BTreeMap, fmt::Write, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use itertools::Itertools;
use reqwest_middleware::ClientWithMiddleware;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    alert::Alert,
    config::ConfigSpec,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverType},
    settings::NotifySettings,
    throttle::Throttle,
    token::AccessTokenCache,
};

pub use dingtalk::DingTalkNotifier;
pub use discord::DiscordNotifier;
pub use email::EmailNotifier;
pub use feishu::FeishuNotifier;
pub use pushover::PushoverNotifier;
pub use slack::SlackNotifier;
pub use sms::SmsNotifier;
pub use telegram::TelegramNotifier;
pub use webhook::WebhookNotifier;
pub use wechat::WeChatNotifier;

/// Fixed pause between retries of providers that retry.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Delivers one group of alerts to one receiver.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>>;
}

/// Shared state of all notifiers.
pub struct NotifierEnv {
    pub client: ClientWithMiddleware,
    pub throttle: Throttle,
    pub tokens: AccessTokenCache,
    pub settings: NotifySettings,
}

impl NotifierEnv {
    pub fn new(client: ClientWithMiddleware, settings: NotifySettings) -> Self {
        Self {
            client,
            throttle: Throttle::new(),
            tokens: AccessTokenCache::new(),
            settings,
        }
    }

    /// Register the provider's rate limit for a destination key.
    pub(crate) fn throttle_key(&self, kind: ReceiverType, key: &str) {
        if let Some(settings) = self.settings.throttle.get(&kind) {
            self.throttle.register(key, *settings);
        }
    }

    pub(crate) async fn admit(&self, key: &str) -> Result<()> {
        match self.throttle.allow(key).await {
            true => Ok(()),
            false => Err(Error::Throttled(key.to_string())),
        }
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(url)
            .timeout(self.settings.send_timeout)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    pub(crate) async fn get(&self, url: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(url)
            .timeout(self.settings.send_timeout)
            .send()
            .await?)
    }
}

/// Decode a JSON response body, failing on non-success status.
pub(crate) async fn decode<T: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T> {
    check_status(url, &response)?;
    response
        .json()
        .await
        .map_err(|e| Error::DecodeResponse(redact(url), e))
}

pub(crate) fn check_status(url: &str, response: &reqwest::Response) -> Result<()> {
    match response.status().is_success() {
        true => Ok(()),
        false => Err(Error::HttpStatus(redact(url), response.status())),
    }
}

/// Strip query strings, which may carry access tokens, from urls used
/// in error messages.
fn redact(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

/// Config of the receiver, when it is of the expected kind.
pub(crate) fn receiver_config<'a, T>(
    receiver: &'a Receiver,
    extract: impl FnOnce(&'a ConfigSpec) -> Option<&'a T>,
) -> Result<&'a T> {
    receiver
        .config
        .as_ref()
        .and_then(|config| extract(&config.spec))
        .ok_or_else(|| Error::NoMatchedConfig(receiver.key()))
}

/// Plain-text rendering of a group of alerts.
pub fn render_message(group: &Labels, alerts: &[Alert]) -> String {
    let firing = alerts
        .iter()
        .filter(|a| a.status == crate::alert::AlertStatus::Firing)
        .count();
    let mut text = String::new();
    let _ = write!(
        text,
        "[{}:{}]",
        if firing > 0 { "FIRING" } else { "RESOLVED" },
        alerts.len()
    );
    if !group.is_empty() {
        let _ = write!(
            text,
            " {}",
            group.iter().map(|(k, v)| format!("{k}={v}")).join(" ")
        );
    }
    text.push('\n');

    for alert in alerts {
        let _ = writeln!(text);
        let _ = writeln!(
            text,
            "[{}] {}",
            alert.status,
            alert.name().unwrap_or("<unnamed>")
        );
        let labels = alert
            .labels
            .iter()
            .filter(|(k, _)| !group.contains_key(*k))
            .map(|(k, v)| format!("{k}={v}"))
            .join(", ");
        if !labels.is_empty() {
            let _ = writeln!(text, "Labels: {labels}");
        }
        if let Some(summary) = alert.summary() {
            let _ = writeln!(text, "Summary: {summary}");
        }
        if let Some(starts_at) = alert.starts_at {
            let _ = writeln!(text, "Starts at: {}", starts_at.to_rfc3339());
        }
    }
    text
}

pub type NotifierFactory =
    Arc<dyn Fn(&Receiver, &Arc<NotifierEnv>) -> Result<Arc<dyn Notifier>> + Send + Sync>;

/// Registration table from receiver type to notifier constructor.
#[derive(Clone)]
pub struct NotifierRegistry {
    env: Arc<NotifierEnv>,
    factories: BTreeMap<ReceiverType, NotifierFactory>,
}

impl NotifierRegistry {
    pub fn empty(env: Arc<NotifierEnv>) -> Self {
        Self {
            env,
            factories: BTreeMap::new(),
        }
    }

    pub fn new(env: Arc<NotifierEnv>) -> Self {
        let mut registry = Self::empty(env);
        registry.register(ReceiverType::DingTalk, |r, env| {
            Ok(Arc::new(DingTalkNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Email, |r, env| {
            Ok(Arc::new(EmailNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Slack, |r, env| {
            Ok(Arc::new(SlackNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Webhook, |r, env| {
            Ok(Arc::new(WebhookNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::WeChat, |r, env| {
            Ok(Arc::new(WeChatNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Sms, |r, env| {
            Ok(Arc::new(SmsNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Telegram, |r, env| {
            Ok(Arc::new(TelegramNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Discord, |r, env| {
            Ok(Arc::new(DiscordNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Feishu, |r, env| {
            Ok(Arc::new(FeishuNotifier::new(r, env.clone())?))
        });
        registry.register(ReceiverType::Pushover, |r, env| {
            Ok(Arc::new(PushoverNotifier::new(r, env.clone())?))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: ReceiverType, factory: F)
    where
        F: Fn(&Receiver, &Arc<NotifierEnv>) -> Result<Arc<dyn Notifier>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn env(&self) -> &Arc<NotifierEnv> {
        &self.env
    }

    pub fn notifier(&self, receiver: &Receiver) -> Result<Arc<dyn Notifier>> {
        let factory = self
            .factories
            .get(&receiver.kind())
            .ok_or(Error::UnknownReceiverType(receiver.kind()))?;
        factory(receiver, &self.env)
    }
}

/// Run `send` up to `1 + retries` times while `retryable` says the
/// failure is worth retrying, pausing between attempts.
pub(crate) async fn with_retries<F, Fut>(
    retries: usize,
    retryable: impl Fn(&Error) -> bool,
    mut send: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut attempt = 0;
    loop {
        match send().await {
            Err(e) if attempt < retries && retryable(&e) => {
                attempt += 1;
                log::debug!("retrying send ({attempt}/{retries}) after: {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use serde_json::json;

    use super::{render_message, with_retries, NotifierEnv, NotifierRegistry};
    use crate::{
        alert::Alert,
        error::Error,
        labels::Labels,
        receiver::{Receiver, ReceiverSpec},
        settings::NotifySettings,
        tenant::TenantId,
    };

    fn env() -> Arc<NotifierEnv> {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        Arc::new(NotifierEnv::new(client, NotifySettings::default()))
    }

    #[test]
    fn render_group() {
        let alert: Alert = serde_json::from_value(json!({
            "labels": {"alertname": "Down", "namespace": "ns1", "pod": "a"},
            "annotations": {"summary": "pod a is down"}
        }))
        .unwrap();
        let group = Labels::from_iter([("namespace".to_string(), "ns1".to_string())]);
        let text = render_message(&group, &[alert]);
        assert!(text.starts_with("[FIRING:1] namespace=ns1\n"));
        assert!(text.contains("[firing] Down"));
        assert!(text.contains("Labels: alertname=Down, pod=a"));
        assert!(text.contains("Summary: pod a is down"));
    }

    #[test]
    fn builds_registered_notifiers() {
        let registry = NotifierRegistry::new(env());
        let spec: ReceiverSpec =
            serde_json::from_value(json!({"webhook": {"url": "http://hook/"}})).unwrap();
        let receiver = Receiver::new("hook".into(), TenantId::global(), Labels::new(), spec);
        assert!(registry.notifier(&receiver).is_ok());

        let spec: ReceiverSpec =
            serde_json::from_value(json!({"slack": {"channels": ["#a"]}})).unwrap();
        let receiver = Receiver::new("slack".into(), TenantId::global(), Labels::new(), spec);
        assert!(matches!(
            registry.notifier(&receiver).err(),
            Some(Error::NoMatchedConfig(_))
        ));

        let empty = NotifierRegistry::empty(env());
        assert!(matches!(
            empty.notifier(&receiver).err(),
            Some(Error::UnknownReceiverType(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retries() {
        let throttled = AtomicUsize::new(0);
        let attempts = &throttled;
        let result = with_retries(
            3,
            |e| matches!(e, Error::Throttled(_)),
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Throttled("rate".into()))
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(throttled.load(Ordering::SeqCst), 4);

        let failed = AtomicUsize::new(0);
        let attempts = &failed;
        let start = tokio::time::Instant::now();
        let result = with_retries(
            3,
            |e| matches!(e, Error::Throttled(_)),
            move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::EmptyCredential)
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
