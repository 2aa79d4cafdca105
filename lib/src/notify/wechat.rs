/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;

use super::{decode, receiver_config, render_message, Notifier, NotifierEnv};
use crate::{
    alert::Alert,
    config::ConfigSpec,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverSpec, ReceiverType},
    split::split_message,
};

const MAX_MESSAGE_BYTES: usize = 2048;

/// Error codes signalling an expired or invalid access token.
const TOKEN_EXPIRED: [i64; 2] = [42001, 40014];

/// Sends application messages to users, parties and tags through the
/// enterprise messaging api.
pub struct WeChatNotifier {
    env: Arc<NotifierEnv>,
    api_url: String,
    corp_id: String,
    agent_id: String,
    secret: String,
    to_user: String,
    to_party: String,
    to_tag: String,
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

impl WeChatNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::WeChat(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a wechat receiver"),
            ));
        };
        let config = receiver_config(receiver, |c| match c {
            ConfigSpec::WeChat(c) => Some(c),
            _ => None,
        })?;
        let mut api_url = config.api_url.clone();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        Ok(Self {
            env,
            api_url,
            corp_id: config.corp_id.clone(),
            agent_id: config.agent_id.clone(),
            secret: config.api_secret.resolve()?,
            to_user: spec.to_user.join("|"),
            to_party: spec.to_party.join("|"),
            to_tag: spec.to_tag.join("|"),
        })
    }

    fn endpoint(&self, method: &str, query: &[(&str, &String)]) -> Result<String> {
        let base = format!("{}{method}", self.api_url);
        let mut url = url::Url::parse(&base).map_err(|e| Error::InvalidUrl(base, e))?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url.to_string())
    }

    fn token_key(&self) -> String {
        format!("wechat/{}/{}", self.corp_id, self.agent_id)
    }

    async fn token(&self) -> Result<String> {
        let env = &self.env;
        let url = self.endpoint(
            "gettoken",
            &[("corpid", &self.corp_id), ("corpsecret", &self.secret)],
        )?;
        env.tokens
            .get_token(&self.token_key(), move || async move {
                let response: TokenResponse = decode(&url, env.get(&url).await?).await?;
                match response.errcode {
                    0 => Ok((
                        response.access_token,
                        Duration::from_secs(response.expires_in),
                    )),
                    code => Err(Error::Provider(ReceiverType::WeChat, code, response.errmsg)),
                }
            })
            .await
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let body = json!({
            "touser": self.to_user,
            "toparty": self.to_party,
            "totag": self.to_tag,
            "msgtype": "text",
            "agentid": self.agent_id,
            "text": { "content": chunk },
        });

        // One retry with a fresh token when the cached one was rejected.
        let mut refreshed = false;
        loop {
            let token = self.token().await?;
            let url = self.endpoint("message/send", &[("access_token", &token)])?;
            let response: ApiResponse =
                decode(&url, self.env.post_json(&url, None, &body).await?).await?;
            match response.errcode {
                0 => return Ok(()),
                code if TOKEN_EXPIRED.contains(&code) && !refreshed => {
                    log::debug!("wechat token for {} expired, refreshing", self.corp_id);
                    self.env.tokens.invalidate_token(&self.token_key()).await;
                    refreshed = true;
                }
                code => return Err(Error::Provider(ReceiverType::WeChat, code, response.errmsg)),
            }
        }
    }
}

impl Notifier for WeChatNotifier {
    fn notify<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for chunk in split_message(&render_message(group, alerts), MAX_MESSAGE_BYTES) {
                self.send_chunk(&chunk).await?;
            }
            Ok(())
        })
    }
}
