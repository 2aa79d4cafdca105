/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{sync::Arc, time::Duration};

use base64::Engine;
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use super::{decode, receiver_config, render_message, with_retries, Notifier, NotifierEnv};
use crate::{
    alert::Alert,
    async_group::AsyncGroup,
    config::ConfigSpec,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverSpec, ReceiverType},
};

const API: &str = "https://open.feishu.cn/open-apis";
const RATE_LIMITED: i64 = 9499;
const RETRIES: usize = 3;

struct Bot {
    webhook: String,
    secret: Option<String>,
    keywords: Vec<String>,
}

struct App {
    app_id: String,
    app_secret: String,
    user: Vec<String>,
    department: Vec<String>,
}

/// Sends to a chatbot webhook and, through the application api, to
/// users and departments.
pub struct FeishuNotifier {
    env: Arc<NotifierEnv>,
    bot: Option<Arc<Bot>>,
    app: Option<Arc<App>>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default, alias = "StatusCode")]
    code: i64,
    #[serde(default, alias = "StatusMessage")]
    msg: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: u64,
}

/// Chatbot signature: base64 HMAC-SHA256 over empty data, keyed with
/// `"{timestamp}\n{secret}"`.
pub(crate) fn sign(timestamp: i64, secret: &str) -> Result<String> {
    let mac = Hmac::<Sha256>::new_from_slice(format!("{timestamp}\n{secret}").as_bytes())
        .map_err(|_| Error::EmptyCredential)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn check(response: ApiResponse) -> Result<()> {
    match response.code {
        0 => Ok(()),
        code => Err(Error::Provider(ReceiverType::Feishu, code, response.msg)),
    }
}

fn rate_limited(e: &Error) -> bool {
    matches!(e, Error::Provider(ReceiverType::Feishu, RATE_LIMITED, _))
}

impl FeishuNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Feishu(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a feishu receiver"),
            ));
        };

        let bot = spec
            .chatbot
            .as_ref()
            .map(|bot| {
                Ok::<_, Error>(Arc::new(Bot {
                    webhook: bot.webhook.resolve()?,
                    secret: bot.secret.as_ref().map(|s| s.resolve()).transpose()?,
                    keywords: bot.keywords.clone(),
                }))
            })
            .transpose()?;

        let app = match spec.user.is_empty() && spec.department.is_empty() {
            true => None,
            false => {
                let config = receiver_config(receiver, |c| match c {
                    ConfigSpec::Feishu(c) => Some(c),
                    _ => None,
                })?;
                Some(Arc::new(App {
                    app_id: config.app_id.resolve()?,
                    app_secret: config.app_secret.resolve()?,
                    user: spec.user.clone(),
                    department: spec.department.clone(),
                }))
            }
        };

        Ok(Self { env, bot, app })
    }

    async fn send_bot(env: &NotifierEnv, bot: &Bot, text: &str) -> Result<()> {
        let mut content = String::new();
        if !bot.keywords.is_empty() {
            content.push_str(&format!("[{}]\n", bot.keywords.join(" ")));
        }
        content.push_str(text);

        let mut body = json!({
            "msg_type": "text",
            "content": { "text": content },
        });
        if let Some(secret) = &bot.secret {
            let timestamp = chrono::Utc::now().timestamp();
            body["timestamp"] = Value::String(timestamp.to_string());
            body["sign"] = Value::String(sign(timestamp, secret)?);
        }

        let body = &body;
        with_retries(RETRIES, rate_limited, move || async move {
            let response = env.post_json(&bot.webhook, None, body).await?;
            check(decode(&bot.webhook, response).await?)
        })
        .await
    }

    async fn token(env: &NotifierEnv, app: &App) -> Result<String> {
        let key = format!("feishu/{}", app.app_id);
        env.tokens
            .get_token(&key, move || async move {
                let url = format!("{API}/auth/v3/tenant_access_token/internal");
                let body = json!({ "app_id": app.app_id, "app_secret": app.app_secret });
                let response: TokenResponse =
                    decode(&url, env.post_json(&url, None, &body).await?).await?;
                match response.code {
                    0 => Ok((
                        response.tenant_access_token,
                        Duration::from_secs(response.expire),
                    )),
                    code => Err(Error::Provider(ReceiverType::Feishu, code, response.msg)),
                }
            })
            .await
    }

    async fn send_app(env: &NotifierEnv, app: &App, text: &str) -> Result<()> {
        let url = format!("{API}/message/v4/batch_send/");
        let body = json!({
            "open_ids": app.user,
            "department_ids": app.department,
            "msg_type": "text",
            "content": { "text": text },
        });
        let (url, body) = (&url, &body);
        with_retries(RETRIES, rate_limited, move || async move {
            let token = Self::token(env, app).await?;
            let response = env.post_json(url, Some(&token), body).await?;
            check(decode(url, response).await?)
        })
        .await
    }
}

impl Notifier for FeishuNotifier {
    fn notify<'a>(
        &'a self,
        ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let text = render_message(group, alerts);
            let mut sends =
                AsyncGroup::with_deadline(ctx.child_deadline(self.env.settings.send_timeout));
            if let Some(bot) = &self.bot {
                let (env, bot, text) = (self.env.clone(), bot.clone(), text.clone());
                sends.spawn(async move { Self::send_bot(&env, &bot, &text).await });
            }
            if let Some(app) = &self.app {
                let (env, app, text) = (self.env.clone(), app.clone(), text.clone());
                sends.spawn(async move { Self::send_app(&env, &app, &text).await });
            }
            Error::from_many(sends.wait().await)
        })
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::{check, rate_limited, sign, ApiResponse};
    use crate::{error::Error, receiver::ReceiverType};

    #[test]
    fn rate_limit_is_retryable() {
        let response: ApiResponse =
            serde_json::from_value(json!({"code": 9499, "msg": "too many requests"})).unwrap();
        let err = check(response).unwrap_err();
        assert!(rate_limited(&err));
        assert!(!rate_limited(&Error::Provider(ReceiverType::Feishu, 1, String::new())));

        let response: ApiResponse =
            serde_json::from_value(json!({"StatusCode": 0, "StatusMessage": "success"})).unwrap();
        assert!(check(response).is_ok());
    }

    #[test]
    fn signature_depends_on_timestamp() {
        assert_ne!(sign(1, "s").unwrap(), sign(2, "s").unwrap());
        assert_eq!(sign(1, "s").unwrap(), sign(1, "s").unwrap());
    }
}
