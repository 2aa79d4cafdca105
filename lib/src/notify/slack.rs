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
};

const POST_MESSAGE: &str = "https://slack.com/api/chat.postMessage";

/// Posts one message per channel. Failures are not retried.
pub struct SlackNotifier {
    env: Arc<NotifierEnv>,
    token: String,
    channels: Vec<String>,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Slack(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a slack receiver"),
            ));
        };
        let config = receiver_config(receiver, |c| match c {
            ConfigSpec::Slack(c) => Some(c),
            _ => None,
        })?;
        Ok(Self {
            env,
            token: config.token.resolve()?,
            channels: spec.channels.clone(),
        })
    }
}

impl Notifier for SlackNotifier {
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
            for channel in &self.channels {
                let env = self.env.clone();
                let token = self.token.clone();
                let body = json!({ "channel": channel, "text": text });
                sends.spawn(async move {
                    let response = env.post_json(POST_MESSAGE, Some(&token), &body).await?;
                    let response: SlackResponse = decode(POST_MESSAGE, response).await?;
                    match response.ok {
                        true => Ok(()),
                        false => Err(Error::Provider(
                            ReceiverType::Slack,
                            0,
                            response.error.unwrap_or_default(),
                        )),
                    }
                });
            }
            Error::from_many(sends.wait().await)
        })
    }
}
