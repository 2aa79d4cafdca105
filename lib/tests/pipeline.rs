/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;

use notification_manager::{
    notify::{Notifier, NotifierEnv, NotifierRegistry},
    settings::NotifySettings,
    stage::{
        AggregationStage, FilterStage, HistoryStage, NotifyStage, RouteStage, SilenceStage,
    },
    Alert, Controller, ExecContext, Labels, MultiStage, ReceiverType, Resource, ResourceRegistry,
    Result, Settings, Stage, StageData,
};

/// Records every call instead of delivering.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(Labels, Vec<Alert>)>>,
}

impl Recorder {
    fn calls(&self) -> Vec<(Labels, Vec<Alert>)> {
        self.calls.lock().clone()
    }
}

impl Notifier for Recorder {
    fn notify<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().push((group.clone(), alerts.to_vec()));
            Ok(())
        })
    }
}

struct Fixture {
    controller: Controller,
    notified: Arc<Recorder>,
    history: Arc<Recorder>,
    pipeline: MultiStage,
}

async fn fixture() -> Fixture {
    let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
    let controller = Controller::spawn(
        &Settings::default(),
        ResourceRegistry::default(),
        client.clone(),
    )
    .unwrap();

    for resource in [
        json!({
            "kind": "Receiver",
            "metadata": {"name": "ns1-slack", "labels": {"type": "tenant", "user": "ns1"}},
            "spec": {"slack": {
                "channels": ["#ns1"],
                "alertSelector": {"matchLabels": {"severity": "critical"}}
            }}
        }),
        json!({
            "kind": "Config",
            "metadata": {"name": "default-slack", "labels": {"type": "default"}},
            "spec": {"slack": {"token": "xoxb-default"}}
        }),
    ] {
        let resource: Resource = serde_json::from_value(resource).unwrap();
        controller.apply(resource).await.unwrap();
    }

    let notified = Arc::new(Recorder::default());
    let history = Arc::new(Recorder::default());

    let env = Arc::new(NotifierEnv::new(client, NotifySettings::default()));
    let mut registry = NotifierRegistry::empty(env);
    let sink = notified.clone();
    registry.register(ReceiverType::Slack, move |_, _| {
        Ok(sink.clone() as Arc<dyn Notifier>)
    });

    let pipeline = MultiStage::new()
        .with(SilenceStage::new(controller.clone()))
        .with(RouteStage::new(controller.clone()))
        .with(FilterStage::new(controller.clone()))
        .with(AggregationStage::new(controller.clone()))
        .with(NotifyStage::new(registry))
        .with(HistoryStage::new(
            history.clone(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        ));

    Fixture {
        controller,
        notified,
        history,
        pipeline,
    }
}

fn alert(labels: serde_json::Value) -> Alert {
    serde_json::from_value::<Alert>(json!({ "labels": labels }))
        .unwrap()
        .prepare("test", Utc::now())
}

fn ctx(seq: u64) -> ExecContext {
    ExecContext::new(seq, Duration::from_secs(5))
}

#[tokio::test]
async fn delivers_and_records_once() {
    let f = fixture().await;
    let critical = alert(json!({"alertname": "Down", "severity": "critical", "namespace": "ns1"}));

    let out = f
        .pipeline
        .exec(&ctx(1), StageData::Alerts(vec![critical.clone()]))
        .await
        .unwrap();
    assert!(out.is_none());

    let calls = f.notified.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec![critical.clone()]);
    assert_eq!(calls[0].0.get("alertname").map(String::as_str), Some("Down"));
    assert_eq!(calls[0].0.get("namespace").map(String::as_str), Some("ns1"));

    let recorded = f.history.calls();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].1.len(), 1);
    assert!(recorded[0].1[0].is_recorded());
    assert!(!critical.is_recorded());

    // Coming back around with the marker set, the alert is delivered
    // but not recorded again.
    let returned = recorded[0].1[0].clone();
    f.pipeline
        .exec(&ctx(2), StageData::Alerts(vec![returned]))
        .await
        .unwrap();
    assert_eq!(f.notified.calls().len(), 2);
    assert_eq!(f.history.calls().len(), 1);
}

#[tokio::test]
async fn receiver_selector_filters() {
    let f = fixture().await;
    let warning = alert(json!({"alertname": "Slow", "severity": "warning", "namespace": "ns1"}));
    let other = alert(json!({"alertname": "Down", "severity": "critical", "namespace": "ns2"}));

    let out = f
        .pipeline
        .exec(&ctx(1), StageData::Alerts(vec![warning, other]))
        .await
        .unwrap();
    assert!(out.is_none());
    assert!(f.notified.calls().is_empty());
    assert!(f.history.calls().is_empty());
}

#[tokio::test]
async fn active_silences_drop_alerts() {
    let f = fixture().await;
    let critical = alert(json!({"alertname": "Down", "severity": "critical", "namespace": "ns1"}));

    let expired: Resource = serde_json::from_value(json!({
        "kind": "Silence",
        "metadata": {"name": "expired", "labels": {"type": "global"}},
        "spec": {
            "matcher": {"matchLabels": {"alertname": "Down"}},
            "startsAt": "2020-01-01T00:00:00Z",
            "duration": "1h"
        }
    }))
    .unwrap();
    f.controller.apply(expired).await.unwrap();

    f.pipeline
        .exec(&ctx(1), StageData::Alerts(vec![critical.clone()]))
        .await
        .unwrap();
    assert_eq!(f.notified.calls().len(), 1);

    let tenant: Resource = serde_json::from_value(json!({
        "kind": "Silence",
        "metadata": {"name": "ns1-down", "labels": {"type": "tenant", "user": "ns1"}},
        "spec": {"matcher": {"matchLabels": {"alertname": "Down"}}}
    }))
    .unwrap();
    f.controller.apply(tenant).await.unwrap();

    f.pipeline
        .exec(&ctx(2), StageData::Alerts(vec![critical.clone()]))
        .await
        .unwrap();
    assert_eq!(f.notified.calls().len(), 1);

    let global: Resource = serde_json::from_value(json!({
        "kind": "Silence",
        "metadata": {"name": "all-down", "labels": {"type": "global"}},
        "spec": {"matcher": {"matchLabels": {"alertname": "Down"}}}
    }))
    .unwrap();
    f.controller.apply(global).await.unwrap();

    let out = SilenceStage::new(f.controller.clone())
        .exec(&ctx(3), StageData::Alerts(vec![critical]))
        .await
        .unwrap();
    assert!(out.is_none());
}
