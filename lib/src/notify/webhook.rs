/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, sync::Arc};

use futures::future::BoxFuture;

use super::{check_status, Notifier, NotifierEnv};
use crate::{
    alert::{Alert, Notification},
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverSpec},
};

/// Posts Alertmanager-style notifications. Failures are not retried.
pub struct WebhookNotifier {
    env: Arc<NotifierEnv>,
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Webhook(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not a webhook receiver"),
            ));
        };
        Ok(Self {
            env,
            name: receiver.name.clone(),
            url: spec.url.clone(),
            headers: spec.headers.clone(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = Notification::new(&self.name, group, alerts.to_vec());
            let mut request = self
                .env
                .client
                .post(&self.url)
                .timeout(self.env.settings.send_timeout)
                .json(&body);
            for (name, value) in &self.headers {
                request = request.header(name, value);
            }
            let response = request.send().await?;
            check_status(&self.url, &response)?;
            log::debug!("webhook {}: delivered {} alerts", self.name, alerts.len());
            Ok(())
        })
    }
}
