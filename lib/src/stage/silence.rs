/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use chrono::Utc;
use futures::future::BoxFuture;

use super::{unexpected, Stage, StageData};
use crate::{context::ExecContext, controller::Controller, error::Result};

/// Drops alerts matched by an active global silence.
pub struct SilenceStage {
    controller: Controller,
}

impl SilenceStage {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }
}

impl Stage for SilenceStage {
    fn name(&self) -> &'static str {
        "silence"
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

            let now = Utc::now();
            let silences = self
                .controller
                .silences()
                .await?
                .into_iter()
                .filter(|s| s.is_global() && s.is_active(now))
                .collect::<Vec<_>>();

            let total = alerts.len();
            let alerts = alerts
                .into_iter()
                .filter(|alert| !silences.iter().any(|s| s.matches(alert)))
                .collect::<Vec<_>>();
            if alerts.len() < total {
                log::debug!(
                    "pipeline {}: {} alerts silenced",
                    ctx.seq(),
                    total - alerts.len()
                );
            }

            Ok((!alerts.is_empty()).then_some(StageData::Alerts(alerts)))
        })
    }
}
