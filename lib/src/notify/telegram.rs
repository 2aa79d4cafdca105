/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;

use super::{decode, receiver_config, render_message, Notifier, NotifierEnv};
use crate::{
    alert::Alert,
    async_group::AsyncGroup,
    config::ConfigSpec,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverSpec, ReceiverType},
    split::split_message,
};

const MAX_MESSAGE_BYTES: usize = 4096;

pub struct TelegramNotifier {
    env: Arc<NotifierEnv>,
    url: String,
    channels: Vec<String>,
    mentions: String,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    description: String,
}

impl TelegramNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Telegram(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a telegram receiver"),
            ));
        };
        let config = receiver_config(receiver, |c| match c {
            ConfigSpec::Telegram(c) => Some(c),
            _ => None,
        })?;
        let url = format!(
            "{}/bot{}/sendMessage",
            config.api_url.trim_end_matches('/'),
            config.token.resolve()?
        );
        Ok(Self {
            env,
            url,
            channels: spec.channels.clone(),
            mentions: spec
                .mention_users
                .iter()
                .map(|u| format!("@{}", u.trim_start_matches('@')))
                .collect::<Vec<_>>()
                .join(" "),
        })
    }
}

impl Notifier for TelegramNotifier {
    fn notify<'a>(
        &'a self,
        ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut text = render_message(group, alerts);
            if !self.mentions.is_empty() {
                text.push_str(&self.mentions);
            }
            let chunks = split_message(&text, MAX_MESSAGE_BYTES);

            let mut sends =
                AsyncGroup::with_deadline(ctx.child_deadline(self.env.settings.send_timeout));
            for channel in &self.channels {
                let (env, url, channel, chunks) = (
                    self.env.clone(),
                    self.url.clone(),
                    channel.clone(),
                    chunks.clone(),
                );
                sends.spawn(async move {
                    for chunk in chunks {
                        let body = json!({ "chat_id": channel, "text": chunk });
                        let response: BotResponse =
                            decode(&url, env.post_json(&url, None, &body).await?).await?;
                        if !response.ok {
                            return Err(Error::Provider(
                                ReceiverType::Telegram,
                                response.error_code,
                                response.description,
                            ));
                        }
                    }
                    Ok(())
                });
            }
            Error::from_many(sends.wait().await)
        })
    }
}
