/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{future::Future, time::Duration};

use futures::future::BoxFuture;
use tokio::{sync::oneshot, task::JoinSet, time::Instant};

use crate::error::{Error, Result};

/// Completion signal of a group worker.
#[derive(Debug)]
pub enum Outcome {
    Done,
    Failed(Error),
    FailedMany(Vec<Error>),
}

impl From<Result<()>> for Outcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Done,
            Err(Error::Multiple(errors)) => Outcome::FailedMany(errors),
            Err(e) => Outcome::Failed(e),
        }
    }
}

type Worker = Box<dyn FnOnce(oneshot::Sender<Outcome>) -> BoxFuture<'static, ()> + Send>;

/// Deadline-bound fan-out. Workers are started together by `wait`,
/// which returns the flattened errors of all workers, or a single
/// `GroupTimeout` when the deadline passes first. Workers still running
/// at the deadline are aborted.
pub struct AsyncGroup {
    deadline: Instant,
    workers: Vec<Worker>,
}

impl AsyncGroup {
    pub fn new(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            workers: Vec::new(),
        }
    }

    /// Register a worker. It must signal its outcome on the given
    /// channel; dropping the channel counts as success.
    pub fn add<F, Fut>(&mut self, worker: F)
    where
        F: FnOnce(oneshot::Sender<Outcome>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.workers
            .push(Box::new(move |tx| Box::pin(worker(tx)) as BoxFuture<'static, ()>));
    }

    /// Register a future whose result is the worker's outcome.
    pub fn spawn<Fut>(&mut self, fut: Fut)
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add(move |tx| async move {
            let _ = tx.send(fut.await.into());
        });
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub async fn wait(self) -> Vec<Error> {
        let mut set = JoinSet::new();
        let signals = self
            .workers
            .into_iter()
            .map(|worker| {
                let (tx, rx) = oneshot::channel();
                set.spawn(worker(tx));
                rx
            })
            .collect::<Vec<_>>();

        let collect = async move {
            let mut errors = Vec::new();
            for signal in signals {
                match signal.await {
                    Ok(Outcome::Done) | Err(_) => {}
                    Ok(Outcome::Failed(e)) => errors.push(e),
                    Ok(Outcome::FailedMany(es)) => errors.extend(es),
                }
            }
            errors
        };

        match tokio::time::timeout_at(self.deadline, collect).await {
            Ok(errors) => {
                set.detach_all();
                errors
            }
            Err(_) => {
                log::warn!("async group timed out; aborting {} workers", set.len());
                set.abort_all();
                vec![Error::GroupTimeout]
            }
        }
    }
}
