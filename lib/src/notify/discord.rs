/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::sync::Arc;

use futures::future::BoxFuture;
use itertools::Itertools;
use reqwest::StatusCode;
use serde_json::json;

use super::{check_status, render_message, with_retries, Notifier, NotifierEnv};
use crate::{
    alert::Alert,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverSpec},
    split::split_message,
};

const MAX_MESSAGE_BYTES: usize = 2000;
const RETRIES: usize = 3;

/// Posts to a channel webhook, retrying when rate limited.
pub struct DiscordNotifier {
    env: Arc<NotifierEnv>,
    webhook: String,
    mentions: String,
}

fn rate_limited(e: &Error) -> bool {
    matches!(e, Error::HttpStatus(_, status) if *status == StatusCode::TOO_MANY_REQUESTS)
}

impl DiscordNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Discord(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a discord receiver"),
            ));
        };
        let mentions = spec
            .mentioned_users
            .iter()
            .map(|u| format!("<@{u}>"))
            .chain(spec.mentioned_roles.iter().map(|r| format!("<@&{r}>")))
            .join(" ");
        Ok(Self {
            env,
            webhook: spec.webhook.resolve()?,
            mentions,
        })
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let body = &json!({ "content": chunk });
        with_retries(
            RETRIES,
            rate_limited,
            move || async move {
                let response = self.env.post_json(&self.webhook, None, body).await?;
                check_status(&self.webhook, &response)
            },
        )
        .await
    }
}

impl Notifier for DiscordNotifier {
    fn notify<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut text = render_message(group, alerts);
            if !self.mentions.is_empty() {
                text = format!("{}\n{text}", self.mentions);
            }
            for chunk in split_message(&text, MAX_MESSAGE_BYTES) {
                self.send_chunk(&chunk).await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use reqwest::StatusCode;
    use serde_json::json;

    use super::DiscordNotifier;
    use crate::{
        alert::Alert,
        context::ExecContext,
        error::{Error, Result},
        labels::Labels,
        notify::{fake_http::FakeServer, Notifier, NotifierEnv},
        receiver::{Receiver, ReceiverSpec},
        settings::NotifySettings,
        tenant::TenantId,
    };

    async fn send(webhook: &str) -> Result<()> {
        let spec: ReceiverSpec = serde_json::from_value(json!({"discord": {
            "webhook": webhook,
            "mentionedUsers": ["42"]
        }}))
        .unwrap();
        let receiver = Receiver::new("chat".into(), TenantId::global(), Labels::new(), spec);
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let env = Arc::new(NotifierEnv::new(client, NotifySettings::default()));
        let notifier = DiscordNotifier::new(&receiver, env)?;

        let alert: Alert =
            serde_json::from_value(json!({"labels": {"alertname": "Down"}})).unwrap();
        let ctx = ExecContext::new(1, Duration::from_secs(30));
        notifier.notify(&ctx, &Labels::new(), &[alert]).await
    }

    #[tokio::test]
    async fn rate_limited_send_is_retried() {
        let server = FakeServer::start(vec![(429, json!({})), (200, json!({}))]).await;
        send(&server.url).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        let body: serde_json::Value = serde_json::from_str(&requests[1].body).unwrap();
        assert!(body["content"].as_str().unwrap().starts_with("<@42>\n"));
    }

    #[tokio::test]
    async fn gives_up_after_three_retries() {
        let server = FakeServer::start(vec![(429, json!({}))]).await;
        assert!(matches!(
            send(&server.url).await,
            Err(Error::HttpStatus(_, StatusCode::TOO_MANY_REQUESTS))
        ));
        assert_eq!(server.requests().len(), 4);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let server = FakeServer::start(vec![(500, json!({}))]).await;
        assert!(matches!(
            send(&server.url).await,
            Err(Error::HttpStatus(_, StatusCode::INTERNAL_SERVER_ERROR))
        ));
        assert_eq!(server.requests().len(), 1);
    }
}
