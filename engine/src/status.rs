/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::fmt::Write;

use actix_web::{
    web::{self, Data, ServiceConfig},
    HttpResponse,
};
use serde::Serialize;
use tracing::instrument;

use notification_manager::Stats;

use crate::{http_response, resources::ReloadSummary, AppData, Result};

pub(crate) fn service(cfg: &mut ServiceConfig) {
    cfg.service(web::resource("/-/ready").route(web::get().to(get_ready)))
        .service(web::resource("/-/live").route(web::get().to(get_live)))
        .service(web::resource("/-/reload").route(web::get().to(get_reload)))
        .service(web::resource("/status").route(web::get().to(get_status)))
        .service(web::resource("/metrics").route(web::get().to(get_metrics)));
}

#[derive(Serialize, Debug)]
struct Status {
    version: String,
    queued: usize,
    capacity: usize,
    #[serde(flatten)]
    stats: Stats,
}

/// Ready once the controller answers.
#[instrument(skip_all)]
async fn get_ready(data: Data<AppData>) -> HttpResponse {
    match data.controller.stats().await {
        Ok(_) => HttpResponse::Ok().body("ready"),
        Err(e) => HttpResponse::ServiceUnavailable().body(e.to_string()),
    }
}

async fn get_live() -> HttpResponse {
    HttpResponse::Ok().body("live")
}

#[instrument(skip_all)]
async fn get_status(data: Data<AppData>) -> HttpResponse {
    http_response(run_get_status(&data).await)
}

#[instrument(skip_all)]
async fn get_reload(data: Data<AppData>) -> HttpResponse {
    http_response(run_reload(&data).await)
}

#[instrument(skip_all)]
async fn get_metrics(data: Data<AppData>) -> HttpResponse {
    let mut body = String::new();
    let _ = writeln!(body, "# TYPE notification_manager_queued_alerts gauge");
    let _ = writeln!(
        body,
        "notification_manager_queued_alerts {}",
        data.store.len()
    );
    let _ = writeln!(body, "# TYPE notification_manager_store_capacity gauge");
    let _ = writeln!(
        body,
        "notification_manager_store_capacity {}",
        data.store.capacity()
    );
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body)
}

async fn run_get_status(data: &AppData) -> Result<Status> {
    Ok(Status {
        version: data.app_version.clone(),
        queued: data.store.len(),
        capacity: data.store.capacity(),
        stats: data.controller.stats().await?,
    })
}

async fn run_reload(data: &AppData) -> Result<ReloadSummary> {
    data.resources.reload(&data.controller).await
}
