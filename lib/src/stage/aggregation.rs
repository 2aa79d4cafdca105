/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use super::{unexpected, GroupedPacket, Stage, StageData};
use crate::{context::ExecContext, controller::Controller, error::Result, labels::group_key};

/// Groups each receiver's alerts by the configured group labels.
pub struct AggregationStage {
    controller: Controller,
}

impl AggregationStage {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }
}

impl Stage for AggregationStage {
    fn name(&self) -> &'static str {
        "aggregation"
    }

    fn exec<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        data: StageData,
    ) -> BoxFuture<'a, Result<Option<StageData>>> {
        Box::pin(async move {
            let packets = match data {
                StageData::Packets(packets) => packets,
                other => return unexpected(self.name(), "packets", &other),
            };

            let group_by = self.controller.routing().await?.group_labels;
            let grouped = packets
                .into_iter()
                .map(|packet| {
                    let mut groups: BTreeMap<String, Vec<_>> = BTreeMap::new();
                    for alert in packet.alerts {
                        groups
                            .entry(group_key(&alert.labels, &group_by))
                            .or_default()
                            .push(alert);
                    }
                    GroupedPacket {
                        receiver: packet.receiver,
                        groups,
                    }
                })
                .collect::<Vec<_>>();

            Ok((!grouped.is_empty()).then_some(StageData::Groups(grouped)))
        })
    }
}
