/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

mod aggregation;
mod filter;
mod history;
mod notify;
mod route;
mod silence;

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::{
    alert::Alert,
    context::ExecContext,
    error::{Error, Result},
    receiver::Receiver,
};

pub use aggregation::AggregationStage;
pub use filter::FilterStage;
pub use history::HistoryStage;
pub use notify::NotifyStage;
pub use route::RouteStage;
pub use silence::SilenceStage;

/// Alerts merged for one receiver.
#[derive(Clone, Debug)]
pub struct Packet {
    pub receiver: Receiver,
    pub alerts: Vec<Alert>,
}

/// A receiver's alerts, grouped by their canonical group key.
#[derive(Clone, Debug)]
pub struct GroupedPacket {
    pub receiver: Receiver,
    pub groups: BTreeMap<String, Vec<Alert>>,
}

/// Data flowing between stages.
#[derive(Clone, Debug)]
pub enum StageData {
    Alerts(Vec<Alert>),
    Packets(Vec<Packet>),
    Groups(Vec<GroupedPacket>),
}

impl StageData {
    fn shape(&self) -> &'static str {
        match self {
            StageData::Alerts(_) => "alerts",
            StageData::Packets(_) => "packets",
            StageData::Groups(_) => "groups",
        }
    }
}

/// One step of the pipeline. Returning `None` ends the run early
/// without error: there is nothing left to do.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        data: StageData,
    ) -> BoxFuture<'a, Result<Option<StageData>>>;
}

fn unexpected<T>(stage: &'static str, expected: &'static str, data: &StageData) -> Result<T> {
    log::error!("{stage} stage received {}, expected {expected}", data.shape());
    Err(Error::UnexpectedData(stage, expected))
}

/// Stages run in order, each on the output of the previous one.
#[derive(Default)]
pub struct MultiStage {
    stages: Vec<Box<dyn Stage>>,
}

impl MultiStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push<S: Stage + 'static>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
    }
}

impl Stage for MultiStage {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a ExecContext,
        data: StageData,
    ) -> BoxFuture<'a, Result<Option<StageData>>> {
        Box::pin(async move {
            let mut data = data;
            for stage in &self.stages {
                if ctx.is_cancelled() {
                    return Err(Error::Cancelled(ctx.seq()));
                }
                log::debug!("pipeline {}: running {} stage", ctx.seq(), stage.name());
                match stage.exec(ctx, data).await? {
                    Some(next) => data = next,
                    None => {
                        log::debug!(
                            "pipeline {}: nothing left after {} stage",
                            ctx.seq(),
                            stage.name()
                        );
                        return Ok(None);
                    }
                }
            }
            Ok(Some(data))
        })
    }
}
