/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use actix_web::{
    web::{self, Data, Json, ServiceConfig},
    HttpResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use notification_manager::{
    resources::{Object, SectionMap},
    stage::{AggregationStage, NotifyStage, Packet},
    Alert, AlertsPayload, ExecContext, Labels, MultiStage, ObjectKind, Stage, StageData,
};

use crate::{http_response, AppData, Error, Result};

pub(crate) fn service(cfg: &mut ServiceConfig) {
    cfg.service(web::resource("/api/v2/verify").route(web::post().to(post_verify)))
        .service(web::resource("/api/v2/notifications").route(web::post().to(post_notifications)));
}

/// An inline receiver resource, with an optional inline config
/// resource providing its credentials.
#[derive(Deserialize, Debug)]
struct SendRequest {
    receiver: Option<Object<SectionMap>>,
    #[serde(default)]
    config: Option<Object<SectionMap>>,
    #[serde(default)]
    alerts: Option<AlertsPayload>,
}

#[derive(Serialize, PartialEq, Eq, Debug)]
struct Sent {
    receivers: usize,
    alerts: usize,
}

#[instrument(skip_all)]
async fn post_verify(data: Data<AppData>, request: Json<SendRequest>) -> HttpResponse {
    http_response(run_send(&data, request.into_inner(), true).await)
}

#[instrument(skip_all)]
async fn post_notifications(data: Data<AppData>, request: Json<SendRequest>) -> HttpResponse {
    http_response(run_send(&data, request.into_inner(), false).await)
}

/// Deliver alerts directly to an inline receiver, bypassing the store
/// and the routing stages. Without alerts, a verification request sends
/// a single test alert.
async fn run_send(data: &AppData, request: SendRequest, verify: bool) -> Result<Sent> {
    let object = request.receiver.ok_or(Error::MissingReceiver)?;
    let alerts = match request.alerts {
        Some(payload) => payload.into_alerts(),
        None if verify => vec![test_alert(&object.metadata.name)],
        None => Vec::new(),
    };
    if alerts.is_empty() {
        return Err(Error::MissingAlerts);
    }

    let now = Utc::now();
    let alerts = alerts
        .into_iter()
        .map(|alert| alert.prepare(&data.cluster, now))
        .collect::<Vec<_>>();

    let routing = data.controller.routing().await?;
    let tenant = routing
        .selectors
        .tenant_id(&object.metadata.labels, ObjectKind::Receiver)
        .ok_or_else(|| notification_manager::Error::UnknownTenant(object.metadata.name.clone()))?;

    let configs = match &request.config {
        Some(config) => data
            .registry
            .configs(config, &tenant)
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let mut packets = Vec::new();
    for receiver in data.registry.receivers(&object, &tenant) {
        let mut receiver = receiver?;
        receiver.validate()?;
        if let Some(config) = configs.iter().find(|c| c.kind() == receiver.kind()) {
            config.validate()?;
            receiver.set_config(Some(config.clone()));
        }
        let receiver = data.controller.match_config(receiver).await?;
        packets.push(Packet {
            receiver,
            alerts: alerts.clone(),
        });
    }
    if packets.is_empty() {
        return Err(Error::EmptyReceiver(object.metadata.name));
    }

    let sent = Sent {
        receivers: packets.len(),
        alerts: alerts.len(),
    };
    let pipeline = MultiStage::new()
        .with(AggregationStage::new(data.controller.clone()))
        .with(NotifyStage::on_demand(data.notifiers.clone()));
    let ctx = ExecContext::new(0, data.pipeline_timeout);
    pipeline.exec(&ctx, StageData::Packets(packets)).await?;

    log::info!(
        "sent {} alerts to {} receivers of {}",
        sent.alerts,
        sent.receivers,
        object.metadata.name
    );
    Ok(sent)
}

fn test_alert(receiver: &str) -> Alert {
    Alert {
        labels: Labels::from_iter([
            (String::from("alertname"), String::from("NotificationTest")),
            (String::from("severity"), String::from("info")),
        ]),
        annotations: Labels::from_iter([(
            String::from("message"),
            format!("Test notification for {receiver}"),
        )]),
        starts_at: Some(Utc::now()),
        ..Default::default()
    }
}

#[cfg(test)]
mod test {
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;
    use tokio::{
        io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
        sync::oneshot,
    };

    use crate::AppData;

    /// Accepts one http request, answers 200 and hands back the body.
    async fn webhook() -> (String, oneshot::Receiver<serde_json::Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut length = 0;
            loop {
                let mut line = String::new();
                stream.read_line(&mut line).await.unwrap();
                let line = line.trim_end().to_ascii_lowercase();
                if line.is_empty() {
                    break;
                }
                if let Some(value) = line.strip_prefix("content-length:") {
                    length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0; length];
            stream.read_exact(&mut body).await.unwrap();
            stream
                .get_mut()
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            let _ = tx.send(serde_json::from_slice(&body).unwrap());
        });

        (url, rx)
    }

    #[actix_web::test]
    async fn verify_sends_test_alert() {
        let data = AppData::for_test(std::env::temp_dir());
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .configure(super::service),
        )
        .await;
        let (url, body) = webhook().await;

        let req = test::TestRequest::post()
            .uri("/api/v2/verify")
            .set_json(json!({
                "receiver": {
                    "metadata": {"name": "ops", "labels": {"type": "global"}},
                    "spec": {"webhook": {"url": url}}
                }
            }))
            .to_request();
        let res: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(res, json!({"receivers": 1, "alerts": 1}));

        let body = body.await.unwrap();
        assert_eq!(body["receiver"], "ops");
        assert_eq!(body["alerts"][0]["labels"]["alertname"], "NotificationTest");
        assert_eq!(body["alerts"][0]["labels"]["cluster"], "test");
    }

    #[actix_web::test]
    async fn resolution_failures_are_bad_requests() {
        let data = AppData::for_test(std::env::temp_dir());
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .configure(super::service),
        )
        .await;

        for body in [
            json!({"alerts": [{"labels": {"alertname": "Down"}}]}),
            json!({
                "receiver": {
                    "metadata": {"name": "ops", "labels": {"type": "global"}},
                    "spec": {"webhook": {"url": "http://localhost/"}}
                }
            }),
            json!({
                "receiver": {
                    "metadata": {"name": "nobody", "labels": {}},
                    "spec": {"webhook": {"url": "http://localhost/"}}
                },
                "alerts": [{"labels": {"alertname": "Down"}}]
            }),
            json!({
                "receiver": {
                    "metadata": {"name": "ops", "labels": {"type": "global"}},
                    "spec": {"slack": {"channels": ["#ops"]}}
                },
                "alerts": [{"labels": {"alertname": "Down"}}]
            }),
        ] {
            let req = test::TestRequest::post()
                .uri("/api/v2/notifications")
                .set_json(body)
                .to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }
    }
}
