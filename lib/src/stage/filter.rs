/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use chrono::Utc;
use futures::future::BoxFuture;

use super::{unexpected, Stage, StageData};
use crate::{
    context::ExecContext, controller::Controller, error::Result, labels::selector_matches,
};

/// Applies tenant silences and each receiver's own alert selector.
pub struct FilterStage {
    controller: Controller,
}

impl FilterStage {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }
}

impl Stage for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        data: StageData,
    ) -> BoxFuture<'a, Result<Option<StageData>>> {
        Box::pin(async move {
            let packets = match data {
                StageData::Packets(packets) => packets,
                other => return unexpected(self.name(), "packets", &other),
            };

            let now = Utc::now();
            let silences = self
                .controller
                .silences()
                .await?
                .into_iter()
                .filter(|s| !s.is_global() && s.is_active(now))
                .collect::<Vec<_>>();

            let packets = packets
                .into_iter()
                .filter_map(|mut packet| {
                    let receiver = &packet.receiver;
                    packet.alerts.retain(|alert| {
                        !silences
                            .iter()
                            .any(|s| s.tenant == receiver.tenant && s.matches(alert))
                            && selector_matches(receiver.alert_selector.as_ref(), &alert.labels)
                    });
                    if packet.alerts.is_empty() {
                        log::debug!(
                            "pipeline {}: all alerts filtered for {}",
                            ctx.seq(),
                            packet.receiver.key()
                        );
                        return None;
                    }
                    Some(packet)
                })
                .collect::<Vec<_>>();

            Ok((!packets.is_empty()).then_some(StageData::Packets(packets)))
        })
    }
}
