/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::future::BoxFuture;

use super::{unexpected, Stage, StageData};
use crate::{
    context::ExecContext,
    error::Result,
    labels::Labels,
    notify::{Notifier, NotifierEnv, WebhookNotifier},
    receiver::{Receiver, ReceiverSpec, WebhookReceiver},
    settings::HistorySettings,
    tenant::TenantId,
};

/// Records delivered alerts with a history receiver. Alerts are marked
/// as recorded so they are not recorded again. A failed delivery is
/// retried once, detached from the pipeline, after `retry_delay`.
pub struct HistoryStage {
    sink: Arc<dyn Notifier>,
    retry_delay: Duration,
    retry_timeout: Duration,
}

impl HistoryStage {
    pub fn new(sink: Arc<dyn Notifier>, retry_delay: Duration, retry_timeout: Duration) -> Self {
        Self {
            sink,
            retry_delay,
            retry_timeout,
        }
    }

    /// History recorded by posting to a webhook.
    pub fn webhook(settings: &HistorySettings, env: Arc<NotifierEnv>) -> Result<Self> {
        let receiver = Receiver::new(
            String::from("history"),
            TenantId::global(),
            Labels::new(),
            ReceiverSpec::Webhook(WebhookReceiver {
                url: settings.url.clone(),
                headers: BTreeMap::new(),
            }),
        );
        let retry_timeout = env.settings.send_timeout;
        let sink = WebhookNotifier::new(&receiver, env)?;
        Ok(Self::new(Arc::new(sink), settings.retry_delay, retry_timeout))
    }
}

impl Stage for HistoryStage {
    fn name(&self) -> &'static str {
        "history"
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        data: StageData,
    ) -> BoxFuture<'a, Result<Option<StageData>>> {
        Box::pin(async move {
            let alerts = match data {
                StageData::Alerts(alerts) => alerts,
                other => return unexpected(self.name(), "alerts", &other),
            };

            let alerts = alerts
                .into_iter()
                .filter(|alert| !alert.is_recorded())
                .map(|mut alert| {
                    alert.mark_recorded();
                    alert
                })
                .collect::<Vec<_>>();
            if alerts.is_empty() {
                return Ok(None);
            }

            let group = Labels::new();
            if let Err(e) = self.sink.notify(ctx, &group, &alerts).await {
                log::warn!(
                    "pipeline {}: failed to record {} alerts, retrying in {:?}: {e}",
                    ctx.seq(),
                    alerts.len(),
                    self.retry_delay
                );
                let sink = self.sink.clone();
                let (seq, delay, timeout) = (ctx.seq(), self.retry_delay, self.retry_timeout);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let ctx = ExecContext::new(seq, timeout);
                    match sink.notify(&ctx, &Labels::new(), &alerts).await {
                        Ok(()) => {
                            log::debug!("pipeline {seq}: recorded {} alerts on retry", alerts.len())
                        }
                        Err(e) => log::error!(
                            "pipeline {seq}: dropping {} alerts after failed history retry: {e}",
                            alerts.len()
                        ),
                    }
                });
            } else {
                log::debug!("pipeline {}: recorded {} alerts", ctx.seq(), alerts.len());
            }

            Ok(None)
        })
    }
}
