/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use actix_web::{
    web::{self, Data, Json, ServiceConfig},
    HttpResponse,
};
use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use notification_manager::AlertsPayload;

use crate::{http_response, AppData, Error, Result};

pub(crate) fn service(cfg: &mut ServiceConfig) {
    cfg.service(web::resource("/api/v2/alerts").route(web::post().to(post_alerts)));
}

#[derive(Serialize, Debug)]
struct Accepted {
    accepted: usize,
}

#[instrument(skip_all)]
async fn post_alerts(data: Data<AppData>, payload: Json<AlertsPayload>) -> HttpResponse {
    http_response(run_post_alerts(&data, payload.into_inner()).await)
}

/// Queue every alert of the payload. Alerts that cannot be queued are
/// logged and dropped; the others are still accepted.
async fn run_post_alerts(data: &AppData, payload: AlertsPayload) -> Result<Accepted> {
    let now = Utc::now();
    let alerts = payload.into_alerts();
    let total = alerts.len();
    let mut accepted = 0;
    let mut failure = None;

    for alert in alerts {
        match data.store.push(alert.prepare(&data.cluster, now)).await {
            Ok(()) => accepted += 1,
            Err(e) => {
                log::warn!("failed to queue alert: {e}");
                failure = Some(e);
            }
        }
    }

    log::debug!("queued {accepted} of {total} alerts");
    match failure {
        Some(e) => Err(Error::Rejected(total - accepted, total, e)),
        None => Ok(Accepted { accepted }),
    }
}
