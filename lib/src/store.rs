/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::time::Duration;

use tokio::{
    sync::mpsc::{self, error::SendTimeoutError},
    time::Instant,
};

use crate::{
    alert::Alert,
    error::{Error, Result},
    settings::StoreSettings,
};

/// Bounded in-memory alert queue. Pushes wait at most `push_timeout`
/// for room; pulls collect batches.
pub struct AlertStore {
    tx: parking_lot::RwLock<Option<mpsc::Sender<Alert>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Alert>>,
    capacity: usize,
    push_timeout: Duration,
}

impl AlertStore {
    pub fn new(settings: &StoreSettings) -> Self {
        let capacity = settings.capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: parking_lot::RwLock::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            capacity,
            push_timeout: settings.push_timeout,
        }
    }

    pub async fn push(&self, alert: Alert) -> Result<()> {
        let tx = self.tx.read().clone().ok_or(Error::StoreClosed)?;
        tx.send_timeout(alert, self.push_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => Error::StorePushTimeout(self.push_timeout),
                SendTimeoutError::Closed(_) => Error::StoreClosed,
            })
    }

    /// Collect up to `size` alerts, waiting at most `wait`. A partial
    /// batch is not an error. Once the store is closed and drained, the
    /// remaining alerts are returned together with `StoreClosed`.
    pub async fn pull(&self, size: usize, wait: Duration) -> (Vec<Alert>, Result<()>) {
        let size = size.max(1);
        let deadline = Instant::now() + wait;
        let mut rx = self.rx.lock().await;
        let mut alerts = Vec::with_capacity(size.min(self.capacity));

        while alerts.len() < size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => return (alerts, Err(Error::StoreClosed)),
                Err(_) => break,
            }
        }

        (alerts, Ok(()))
    }

    /// Stop accepting alerts. Queued alerts can still be pulled.
    pub fn close(&self) {
        if self.tx.write().take().is_some() {
            log::info!("alert store closed");
        }
    }

    pub fn len(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::AlertStore;
    use crate::{alert::Alert, error::Error, settings::StoreSettings};

    fn store(capacity: usize) -> AlertStore {
        AlertStore::new(&StoreSettings {
            capacity,
            push_timeout: Duration::from_millis(100),
        })
    }

    fn alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_returns_immediately() {
        let store = store(10);
        for i in 0..5 {
            store.push(alert(&i.to_string())).await.unwrap();
        }
        assert_eq!(store.len(), 5);

        let start = Instant::now();
        let (alerts, result) = store.pull(3, Duration::from_secs(10)).await;
        assert!(result.is_ok());
        assert_eq!(alerts.len(), 3);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_after_wait() {
        let store = store(10);
        store.push(alert("a")).await.unwrap();

        let start = Instant::now();
        let (alerts, result) = store.pull(3, Duration::from_secs(1)).await;
        assert!(result.is_ok());
        assert_eq!(alerts.len(), 1);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn push_times_out_when_full() {
        let store = store(1);
        store.push(alert("a")).await.unwrap();
        assert!(matches!(
            store.push(alert("b")).await,
            Err(Error::StorePushTimeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_queue() {
        let store = store(10);
        store.push(alert("a")).await.unwrap();
        store.push(alert("b")).await.unwrap();
        store.close();
        store.close();

        assert!(matches!(store.push(alert("c")).await, Err(Error::StoreClosed)));

        let (alerts, result) = store.pull(10, Duration::from_secs(1)).await;
        assert_eq!(alerts.len(), 2);
        assert!(matches!(result, Err(Error::StoreClosed)));

        let (alerts, result) = store.pull(10, Duration::from_secs(1)).await;
        assert!(alerts.is_empty());
        assert!(matches!(result, Err(Error::StoreClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_size_pull_takes_one() {
        let store = store(10);
        store.push(alert("a")).await.unwrap();
        store.close();

        let (alerts, result) = store.pull(0, Duration::ZERO).await;
        assert_eq!(alerts.len(), 1);
        assert!(result.is_ok());

        let (alerts, result) = store.pull(0, Duration::ZERO).await;
        assert!(alerts.is_empty());
        assert!(matches!(result, Err(Error::StoreClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn close_wakes_blocked_pull() {
        let store = std::sync::Arc::new(store(10));
        let puller = tokio::spawn({
            let store = store.clone();
            async move { store.pull(10, Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.push(alert("a")).await.unwrap();
        store.close();

        let (alerts, result) = puller.await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(result, Err(Error::StoreClosed)));
    }
}
