/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, time::Duration};

use chrono::Utc;
use serde_json::json;

use notification_manager::{
    stage::RouteStage, Alert, Controller, ExecContext, Resource, ResourceRegistry, Settings,
    Stage, StageData,
};

async fn controller(routers: Vec<serde_json::Value>) -> Controller {
    let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
    let controller =
        Controller::spawn(&Settings::default(), ResourceRegistry::default(), client).unwrap();

    let receivers = [
        json!({
            "kind": "Receiver",
            "metadata": {"name": "ns1-slack", "labels": {"type": "tenant", "user": "ns1"}},
            "spec": {"slack": {"channels": ["#ns1"]}}
        }),
        json!({
            "kind": "Receiver",
            "metadata": {"name": "ops-webhook",
                         "labels": {"type": "tenant", "user": "ops", "team": "sre"}},
            "spec": {"webhook": {"url": "http://ops/"}}
        }),
        json!({
            "kind": "Receiver",
            "metadata": {"name": "ops-pager", "labels": {"type": "tenant", "user": "ops"}},
            "spec": {"webhook": {"url": "http://pager/"}}
        }),
        json!({
            "kind": "Config",
            "metadata": {"name": "default-slack", "labels": {"type": "default"}},
            "spec": {"slack": {"token": "xoxb-default"}}
        }),
    ];

    for resource in receivers.into_iter().chain(routers) {
        let resource: Resource = serde_json::from_value(resource).unwrap();
        controller.apply(resource).await.unwrap();
    }
    controller
}

fn router(name: &str, alertname: &str, receivers: serde_json::Value) -> serde_json::Value {
    json!({
        "kind": "Router",
        "metadata": {"name": name},
        "spec": {
            "alertSelector": {"matchLabels": {"alertname": alertname}},
            "receivers": receivers
        }
    })
}

async fn set_policy(controller: &Controller, policy: &str) {
    let resource: Resource = serde_json::from_value(json!({
        "kind": "NotificationManager",
        "metadata": {"name": "nm"},
        "spec": {"routePolicy": policy}
    }))
    .unwrap();
    controller.apply(resource).await.unwrap();
}

fn alert(alertname: &str, namespace: &str) -> Alert {
    serde_json::from_value::<Alert>(json!({
        "labels": {"alertname": alertname, "namespace": namespace}
    }))
    .unwrap()
    .prepare("test", Utc::now())
}

/// Alert count per receiver name after routing.
async fn route(controller: &Controller, alerts: Vec<Alert>) -> BTreeMap<String, usize> {
    let ctx = ExecContext::new(1, Duration::from_secs(5));
    match RouteStage::new(controller.clone())
        .exec(&ctx, StageData::Alerts(alerts))
        .await
        .unwrap()
    {
        Some(StageData::Packets(packets)) => packets
            .into_iter()
            .map(|packet| (packet.receiver.name, packet.alerts.len()))
            .collect(),
        None => BTreeMap::new(),
        Some(_) => panic!("route stage returned groups"),
    }
}

fn counts(entries: &[(&str, usize)]) -> BTreeMap<String, usize> {
    entries
        .iter()
        .map(|(name, count)| (name.to_string(), *count))
        .collect()
}

#[tokio::test]
async fn routers_resolve_by_name_regex_and_selector() {
    let controller = controller(vec![
        router("by-name", "Down", json!({"name": ["ops-pager"]})),
        router("by-regex", "Disk", json!({"regexName": "^ops-"})),
        router("by-selector", "Cpu", json!({"selector": {"matchLabels": {"team": "sre"}}})),
    ])
    .await;

    let routed = route(
        &controller,
        vec![
            alert("Down", "ns2"),
            alert("Disk", "ns2"),
            alert("Cpu", "ns2"),
        ],
    )
    .await;
    assert_eq!(routed, counts(&[("ops-pager", 2), ("ops-webhook", 2)]));
}

#[tokio::test]
async fn route_policies() {
    let controller = controller(vec![router(
        "down-to-ops",
        "Down",
        json!({"name": ["ops-webhook"]}),
    )])
    .await;
    let alerts = || vec![alert("Down", "ns1"), alert("Slow", "ns1")];

    assert_eq!(
        route(&controller, alerts()).await,
        counts(&[("ns1-slack", 2), ("ops-webhook", 1)])
    );

    set_policy(&controller, "RouterFirst").await;
    assert_eq!(
        route(&controller, alerts()).await,
        counts(&[("ns1-slack", 1), ("ops-webhook", 1)])
    );

    set_policy(&controller, "RouterOnly").await;
    assert_eq!(
        route(&controller, alerts()).await,
        counts(&[("ops-webhook", 1)])
    );
}

#[tokio::test]
async fn receiver_reached_twice_gets_alert_once() {
    let controller = controller(vec![router(
        "down-to-ns1",
        "Down",
        json!({"name": ["ns1-slack"]}),
    )])
    .await;

    let routed = route(&controller, vec![alert("Down", "ns1")]).await;
    assert_eq!(routed, counts(&[("ns1-slack", 1)]));
}

#[tokio::test]
async fn removed_router_stops_routing() {
    let controller = controller(vec![router(
        "down-to-ops",
        "Down",
        json!({"name": ["ops-webhook"]}),
    )])
    .await;
    controller
        .delete(notification_manager::ResourceRef {
            kind: notification_manager::ResourceKind::Router,
            name: "down-to-ops".into(),
        })
        .await
        .unwrap();

    let routed = route(&controller, vec![alert("Down", "ns2")]).await;
    assert!(routed.is_empty());
}
