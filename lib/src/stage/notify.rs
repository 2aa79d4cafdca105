/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use super::{unexpected, Stage, StageData};
use crate::{
    async_group::AsyncGroup,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    notify::NotifierRegistry,
};

/// Delivers each alert group through the notifier of its receiver.
/// Outputs the alerts handed to at least one notifier.
pub struct NotifyStage {
    registry: NotifierRegistry,
    fail_on_error: bool,
}

impl NotifyStage {
    /// Delivery failures are logged and do not fail the pipeline.
    pub fn new(registry: NotifierRegistry) -> Self {
        Self {
            registry,
            fail_on_error: false,
        }
    }

    /// Delivery failures are returned to the caller.
    pub fn on_demand(registry: NotifierRegistry) -> Self {
        Self {
            registry,
            fail_on_error: true,
        }
    }
}

impl Stage for NotifyStage {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        data: StageData,
    ) -> BoxFuture<'a, Result<Option<StageData>>> {
        Box::pin(async move {
            let packets = match data {
                StageData::Groups(packets) => packets,
                other => return unexpected(self.name(), "groups", &other),
            };

            let mut errors = Vec::new();
            let mut dispatched = BTreeMap::new();
            let mut sends = AsyncGroup::with_deadline(ctx.deadline());

            for packet in packets {
                let key = packet.receiver.key();
                let notifier = match self.registry.notifier(&packet.receiver) {
                    Ok(notifier) => notifier,
                    Err(e) => {
                        log::warn!("pipeline {}: no notifier for {key}: {e}", ctx.seq());
                        errors.push(e);
                        continue;
                    }
                };

                for (group, alerts) in packet.groups {
                    let labels: Labels = serde_json::from_str(&group).unwrap_or_default();
                    for alert in &alerts {
                        dispatched
                            .entry(alert.hash.clone())
                            .or_insert_with(|| alert.clone());
                    }
                    let (notifier, ctx, key) = (notifier.clone(), ctx.clone(), key.clone());
                    sends.spawn(async move {
                        let result = notifier.notify(&ctx, &labels, &alerts).await;
                        match &result {
                            Ok(()) => log::debug!(
                                "pipeline {}: sent {} alerts to {key}",
                                ctx.seq(),
                                alerts.len()
                            ),
                            Err(e) => {
                                log::warn!("pipeline {}: failed to notify {key}: {e}", ctx.seq())
                            }
                        }
                        result
                    });
                }
            }

            errors.extend(sends.wait().await);
            if self.fail_on_error {
                Error::from_many(errors)?;
            } else if !errors.is_empty() {
                log::error!(
                    "pipeline {}: {} notification(s) failed",
                    ctx.seq(),
                    errors.len()
                );
            }

            let alerts = dispatched.into_values().collect::<Vec<_>>();
            Ok((!alerts.is_empty()).then_some(StageData::Alerts(alerts)))
        })
    }
}
