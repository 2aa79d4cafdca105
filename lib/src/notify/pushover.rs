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

const MESSAGES: &str = "https://api.pushover.net/1/messages.json";
const MAX_MESSAGE_BYTES: usize = 1024;

pub struct PushoverNotifier {
    env: Arc<NotifierEnv>,
    token: String,
    user_keys: Vec<String>,
}

#[derive(Deserialize)]
struct PushoverResponse {
    status: i64,
    #[serde(default)]
    errors: Vec<String>,
}

impl PushoverNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Pushover(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a pushover receiver"),
            ));
        };
        let config = receiver_config(receiver, |c| match c {
            ConfigSpec::Pushover(c) => Some(c),
            _ => None,
        })?;
        Ok(Self {
            env,
            token: config.token.resolve()?,
            user_keys: spec.user_keys.clone(),
        })
    }
}

impl Notifier for PushoverNotifier {
    fn notify<'a>(
        &'a self,
        ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let chunks = split_message(&render_message(group, alerts), MAX_MESSAGE_BYTES);
            let mut sends =
                AsyncGroup::with_deadline(ctx.child_deadline(self.env.settings.send_timeout));
            for user in &self.user_keys {
                let (env, token, user, chunks) = (
                    self.env.clone(),
                    self.token.clone(),
                    user.clone(),
                    chunks.clone(),
                );
                sends.spawn(async move {
                    for chunk in chunks {
                        let body = json!({ "token": token, "user": user, "message": chunk });
                        let response: PushoverResponse =
                            decode(MESSAGES, env.post_json(MESSAGES, None, &body).await?).await?;
                        if response.status != 1 {
                            return Err(Error::Provider(
                                ReceiverType::Pushover,
                                response.status,
                                response.errors.join("; "),
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
