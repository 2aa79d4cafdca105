/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{sync::Arc, time::Duration};

use base64::Engine;
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use super::{decode, receiver_config, render_message, Notifier, NotifierEnv};
use crate::{
    alert::Alert,
    async_group::AsyncGroup,
    config::ConfigSpec,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{ChatBot, Receiver, ReceiverSpec, ReceiverType},
    split::split_message,
};

const API: &str = "https://oapi.dingtalk.com";
const MAX_MESSAGE_BYTES: usize = 5000;

struct Bot {
    webhook: String,
    secret: Option<String>,
    keywords: Vec<String>,
    at_mobiles: Vec<String>,
    at_all: bool,
}

struct Conversation {
    app_key: String,
    app_secret: String,
    chat_ids: Vec<String>,
}

/// Sends to a chatbot webhook (rate limited per webhook) and to
/// conversations through the application api.
pub struct DingTalkNotifier {
    env: Arc<NotifierEnv>,
    bot: Option<Bot>,
    conversation: Option<Arc<Conversation>>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Chatbot request signature: base64 HMAC-SHA256 of
/// `"{timestamp}\n{secret}"` keyed with the secret.
pub(crate) fn sign(timestamp_ms: i64, secret: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::EmptyCredential)?;
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

impl Bot {
    fn new(bot: &ChatBot) -> Result<Self> {
        Ok(Self {
            webhook: bot.webhook.resolve()?,
            secret: bot.secret.as_ref().map(|s| s.resolve()).transpose()?,
            keywords: bot.keywords.clone(),
            at_mobiles: bot.at_mobiles.clone(),
            at_all: bot.at_all,
        })
    }

    fn url(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.webhook)
            .map_err(|e| Error::InvalidUrl(self.webhook.clone(), e))?;
        if let Some(secret) = &self.secret {
            let timestamp = chrono::Utc::now().timestamp_millis();
            url.query_pairs_mut()
                .append_pair("timestamp", &timestamp.to_string())
                .append_pair("sign", &sign(timestamp, secret)?);
        }
        Ok(url.to_string())
    }

    fn content(&self, chunk: &str) -> String {
        let mut content = String::new();
        if !self.keywords.is_empty() {
            content.push_str(&format!("[{}]\n", self.keywords.join(" ")));
        }
        content.push_str(chunk);
        for mobile in &self.at_mobiles {
            content.push_str(&format!(" @{mobile}"));
        }
        content
    }
}

impl DingTalkNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::DingTalk(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a dingtalk receiver"),
            ));
        };

        let bot = spec.chatbot.as_ref().map(Bot::new).transpose()?;
        if let Some(bot) = &bot {
            env.throttle_key(ReceiverType::DingTalk, &bot.webhook);
        }

        let conversation = match spec.chat_ids.is_empty() {
            true => None,
            false => {
                let config = receiver_config(receiver, |c| match c {
                    ConfigSpec::DingTalk(c) => Some(c),
                    _ => None,
                })?;
                Some(Arc::new(Conversation {
                    app_key: config.app_key.resolve()?,
                    app_secret: config.app_secret.resolve()?,
                    chat_ids: spec.chat_ids.clone(),
                }))
            }
        };

        Ok(Self {
            env,
            bot,
            conversation,
        })
    }

    async fn send_bot(env: &NotifierEnv, bot: &Bot, chunk: &str) -> Result<()> {
        env.admit(&bot.webhook).await?;
        let body = json!({
            "msgtype": "text",
            "text": { "content": bot.content(chunk) },
            "at": { "atMobiles": bot.at_mobiles, "isAtAll": bot.at_all },
        });
        let url = bot.url()?;
        let response: ApiResponse = decode(&url, env.post_json(&url, None, &body).await?).await?;
        match response.errcode {
            0 => Ok(()),
            code => Err(Error::Provider(ReceiverType::DingTalk, code, response.errmsg)),
        }
    }

    async fn token(env: &NotifierEnv, conversation: &Conversation) -> Result<String> {
        let key = format!("dingtalk/{}", conversation.app_key);
        env.tokens
            .get_token(&key, move || async move {
                let mut url = url::Url::parse(&format!("{API}/gettoken"))
                    .map_err(|e| Error::InvalidUrl(API.to_string(), e))?;
                url.query_pairs_mut()
                    .append_pair("appkey", &conversation.app_key)
                    .append_pair("appsecret", &conversation.app_secret);
                let url = url.to_string();
                let response: TokenResponse = decode(&url, env.get(&url).await?).await?;
                match response.errcode {
                    0 => Ok((
                        response.access_token,
                        Duration::from_secs(response.expires_in),
                    )),
                    code => Err(Error::Provider(ReceiverType::DingTalk, code, response.errmsg)),
                }
            })
            .await
    }

    async fn send_chat(
        env: &NotifierEnv,
        conversation: &Conversation,
        chat_id: &str,
        chunk: &str,
    ) -> Result<()> {
        let token = Self::token(env, conversation).await?;
        let url = format!("{API}/chat/send?access_token={token}");
        let body = json!({
            "chatid": chat_id,
            "msg": { "msgtype": "text", "text": { "content": chunk } },
        });
        let response: ApiResponse = decode(&url, env.post_json(&url, None, &body).await?).await?;
        match response.errcode {
            0 => Ok(()),
            code => Err(Error::Provider(ReceiverType::DingTalk, code, response.errmsg)),
        }
    }
}

impl Notifier for DingTalkNotifier {
    fn notify<'a>(
        &'a self,
        ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let chunks = split_message(&render_message(group, alerts), MAX_MESSAGE_BYTES);
            let mut errors = Vec::new();

            if let Some(bot) = &self.bot {
                // Chunks go out in order.
                for chunk in &chunks {
                    if let Err(e) = Self::send_bot(&self.env, bot, chunk).await {
                        errors.push(e);
                        break;
                    }
                }
            }

            if let Some(conversation) = &self.conversation {
                let mut sends =
                    AsyncGroup::with_deadline(ctx.child_deadline(self.env.settings.send_timeout));
                for chat_id in &conversation.chat_ids {
                    let env = self.env.clone();
                    let conversation = conversation.clone();
                    let chat_id = chat_id.clone();
                    let chunks = chunks.clone();
                    sends.spawn(async move {
                        for chunk in &chunks {
                            Self::send_chat(&env, &conversation, &chat_id, chunk).await?;
                        }
                        Ok(())
                    });
                }
                errors.extend(sends.wait().await);
            }

            Error::from_many(errors)
        })
    }
}
