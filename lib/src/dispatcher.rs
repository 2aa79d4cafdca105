/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{oneshot, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::{
    alert::Alert,
    context::ExecContext,
    error::{Error, Result},
    settings::DispatcherSettings,
    stage::{Stage, StageData},
    store::AlertStore,
};

/// Lower bound on the batch wait, so an idle store cannot spin the
/// pull loop.
const MIN_BATCH_WAIT: Duration = Duration::from_millis(10);

/// Pulls batches from the store and runs each one through the pipeline,
/// bounded by a fixed number of worker slots.
pub struct Dispatcher {
    store: Arc<AlertStore>,
    pipeline: Arc<dyn Stage>,
    slots: Arc<Semaphore>,
    settings: DispatcherSettings,
    seq: AtomicU64,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        store: Arc<AlertStore>,
        pipeline: Arc<dyn Stage>,
        settings: &DispatcherSettings,
    ) -> Self {
        Self {
            store,
            pipeline,
            slots: Arc::new(Semaphore::new(settings.workers.max(1))),
            settings: DispatcherSettings {
                batch_size: settings.batch_size.max(1),
                batch_wait: settings.batch_wait.max(MIN_BATCH_WAIT),
                ..settings.clone()
            },
            seq: AtomicU64::new(0),
            tracker: TaskTracker::new(),
        }
    }

    /// Run until the store is closed. Batches are processed
    /// concurrently; the final batch pulled from a closed store is
    /// processed before returning, after all running batches finish.
    pub async fn run(self: Arc<Self>) {
        loop {
            let (alerts, result) = self
                .store
                .pull(self.settings.batch_size, self.settings.batch_wait)
                .await;
            match result {
                Ok(()) => {
                    if alerts.is_empty() {
                        continue;
                    }
                    let this = self.clone();
                    self.tracker.spawn(async move {
                        let _ = this.process(alerts).await;
                    });
                }
                Err(e) => {
                    log::info!("{e}: processing final batch of {} alerts", alerts.len());
                    if !alerts.is_empty() {
                        let _ = self.process(alerts).await;
                    }
                    break;
                }
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        log::info!("dispatcher stopped");
    }

    /// Run one batch through the pipeline. The batch is dropped when no
    /// worker slot frees up within the worker timeout. A pipeline still
    /// running at its deadline is cancelled.
    pub async fn process(&self, alerts: Vec<Alert>) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let count = alerts.len();

        let permit = match tokio::time::timeout(
            self.settings.worker_timeout,
            self.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::SlotsClosed),
            Err(_) => {
                log::warn!("pipeline {seq}: no worker slot available, dropping {count} alerts");
                return Err(Error::SlotTimeout(self.settings.worker_timeout));
            }
        };

        let ctx = ExecContext::new(seq, self.settings.pipeline_timeout);
        let (tx, rx) = oneshot::channel();
        let pipeline = self.pipeline.clone();
        let run_ctx = ctx.clone();
        tokio::spawn(
            async move {
                log::debug!("pipeline {}: processing {count} alerts", run_ctx.seq());
                let result = tokio::select! {
                    result = pipeline.exec(&run_ctx, StageData::Alerts(alerts)) => {
                        result.map(|_| ())
                    }
                    _ = run_ctx.token().cancelled() => Err(Error::Cancelled(run_ctx.seq())),
                };
                let _ = tx.send(result);
            }
            .instrument(tracing::info_span!("pipeline", seq)),
        );

        let result = tokio::select! {
            result = rx => result.unwrap_or(Err(Error::Cancelled(seq))),
            _ = tokio::time::sleep_until(ctx.deadline()) => {
                ctx.cancel();
                Err(Error::PipelineTimeout(seq))
            }
        };
        drop(permit);

        match &result {
            Ok(()) => log::debug!("pipeline {seq}: done"),
            Err(e) => log::warn!("pipeline {seq}: {e}"),
        }
        result
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use futures::future::BoxFuture;

    use super::Dispatcher;
    use crate::{
        alert::Alert,
        context::ExecContext,
        error::{Error, Result},
        settings::{DispatcherSettings, StoreSettings},
        stage::{Stage, StageData},
        store::AlertStore,
    };

    /// Counts alerts, optionally taking `delay` per batch.
    #[derive(Default)]
    struct Sink {
        delay: Duration,
        alerts: AtomicUsize,
    }

    impl Stage for Sink {
        fn name(&self) -> &'static str {
            "sink"
        }

        fn exec<'a>(
            &'a self,
            _ctx: &'a ExecContext,
            data: StageData,
        ) -> BoxFuture<'a, Result<Option<StageData>>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                if let StageData::Alerts(alerts) = &data {
                    self.alerts.fetch_add(alerts.len(), Ordering::SeqCst);
                }
                Ok(None)
            })
        }
    }

    fn alerts(n: usize) -> Vec<Alert> {
        (0..n)
            .map(|i| Alert {
                id: i.to_string(),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn drains_store_on_close() {
        let store = Arc::new(AlertStore::new(&StoreSettings::default()));
        for alert in alerts(5) {
            store.push(alert).await.unwrap();
        }
        store.close();

        let sink = Arc::new(Sink::default());
        let dispatcher = Arc::new(Dispatcher::new(
            store,
            sink.clone(),
            &DispatcherSettings::default(),
        ));
        dispatcher.run().await;
        assert_eq!(sink.alerts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_batch_settings_are_clamped() {
        let store = Arc::new(AlertStore::new(&StoreSettings::default()));
        for alert in alerts(3) {
            store.push(alert).await.unwrap();
        }

        let sink = Arc::new(Sink::default());
        let settings = DispatcherSettings {
            batch_size: 0,
            batch_wait: Duration::ZERO,
            ..DispatcherSettings::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), sink.clone(), &settings));
        let task = tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.alerts.load(Ordering::SeqCst), 3);

        store.close();
        tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancels_at_deadline() {
        let sink = Arc::new(Sink {
            delay: Duration::from_secs(60),
            ..Sink::default()
        });
        let settings = DispatcherSettings {
            pipeline_timeout: Duration::from_secs(1),
            ..DispatcherSettings::default()
        };
        let store = Arc::new(AlertStore::new(&StoreSettings::default()));
        let dispatcher = Dispatcher::new(store, sink.clone(), &settings);

        let result = dispatcher.process(alerts(1)).await;
        assert!(matches!(result, Err(Error::PipelineTimeout(1))));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.alerts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drops_batch_without_slot() {
        let sink = Arc::new(Sink {
            delay: Duration::from_secs(5),
            ..Sink::default()
        });
        let settings = DispatcherSettings {
            workers: 1,
            worker_timeout: Duration::from_secs(1),
            pipeline_timeout: Duration::from_secs(10),
            ..DispatcherSettings::default()
        };
        let store = Arc::new(AlertStore::new(&StoreSettings::default()));
        let dispatcher = Dispatcher::new(store, sink.clone(), &settings);

        let (first, second) = tokio::join!(
            dispatcher.process(alerts(2)),
            dispatcher.process(alerts(3))
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::SlotTimeout(_))));
        assert_eq!(sink.alerts.load(Ordering::SeqCst), 2);
    }
}
