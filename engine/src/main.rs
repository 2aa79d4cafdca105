/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

mod alerts;
mod error;
mod notifications;
mod receivers;
mod resources;
mod status;

mod app_data;
pub(crate) mod utils;

use std::{path::PathBuf, sync::Arc};

use actix_web::{
    http::StatusCode,
    middleware,
    web::{Data, JsonConfig, ServiceConfig},
    App, HttpResponse, HttpResponseBuilder, HttpServer,
};
use async_recursion::async_recursion;
use clap::Parser;
use serde::Serialize;

use notification_manager::{
    stage::{
        AggregationStage, FilterStage, HistoryStage, NotifyStage, RouteStage, SilenceStage,
    },
    AlertStore, Controller, Dispatcher, MultiStage, NotifierEnv, NotifierRegistry,
    ResourceRegistry, Settings,
};

use error::{Error, Result};
use opentelemetry::trace::TracerProvider;
use resources::ResourceDir;
use tracing::Instrument;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mimalloc::MiMalloc;

pub(crate) use app_data::AppData;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const MAX_PAYLOAD: usize = 10 * (1 << 20);

#[derive(Parser)]
struct Args {
    #[clap(long, env, help = "The application's instance id, for tracing.")]
    instance_id: Option<String>,
    #[clap(long, env, help = "The name of the Node.")]
    k8s_node_name: Option<String>,
    #[clap(
        long,
        env,
        help = "The name of the namespace that the pod is running in."
    )]
    k8s_namespace_name: Option<String>,
    #[clap(long, env, help = "The name of the Pod.")]
    k8s_pod_name: Option<String>,
    #[clap(long, env, help = "The UID of the Pod.")]
    k8s_pod_uid: Option<String>,
    #[clap(
        long,
        env,
        help = "The name of the Container from Pod specification, must be unique within a Pod."
    )]
    k8s_container_name: Option<String>,
    /// Export traces over OTLP.
    #[clap(long)]
    otlp: bool,
    #[clap(long, default_value = "0.0.0.0:19093")]
    bind: String,
    /// Directory holding the Receiver, Config, Router, Silence and
    /// NotificationManager resources.
    #[clap(long, env, default_value = "/etc/notification-manager/resources")]
    resources: PathBuf,
    /// Settings file (yaml).
    #[clap(long, env)]
    settings: Option<PathBuf>,
    /// Cluster label added to ingested alerts. Overrides the settings
    /// file.
    #[clap(long, env)]
    cluster: Option<String>,
    /// App version.
    #[clap(long, env = "APP_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    app_version: String,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();

    if args.otlp {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()
            .map_err(Error::OpenTelemetry)?;

        let mut attrs = vec![
            opentelemetry::KeyValue::new("service.namespace", "notification-manager"),
            opentelemetry::KeyValue::new("service.name", "notification-manager-engine"),
            opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ];

        for (attr, value) in [
            ("service.instance.id", &args.instance_id),
            ("k8s.node.name", &args.k8s_node_name),
            ("k8s.namespace.name", &args.k8s_namespace_name),
            ("k8s.pod.name", &args.k8s_pod_name),
            ("k8s.pod.uid", &args.k8s_pod_uid),
            ("k8s.container.name", &args.k8s_container_name),
        ] {
            if let Some(value) = value.as_ref() {
                attrs.push(opentelemetry::KeyValue::new(attr, value.to_string()));
            }
        }

        let tracer = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(opentelemetry_sdk::Resource::new(attrs))
            .build()
            .tracer("Notification Manager");

        subscriber
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();

        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
    } else {
        subscriber.init();
    }

    let r = main_traced(args)
        .instrument(tracing::span!(tracing::Level::INFO, "main"))
        .await;

    if let Err(e) = &r {
        log::error!("{e}");
    }

    r
}

async fn main_traced(args: Args) -> Result<()> {
    let mut settings = match &args.settings {
        Some(path) => Settings::load(path).await?,
        None => Settings::default(),
    };
    if let Some(cluster) = args.cluster {
        settings.cluster = cluster;
    }
    if settings.cluster.is_empty() {
        settings.cluster = String::from("default");
    }

    let client = reqwest::Client::builder()
        .build()
        .map_err(Error::BuildClient)?;
    let client = reqwest_middleware::ClientBuilder::new(client)
        .with(reqwest_tracing::TracingMiddleware::<
            reqwest_tracing::SpanBackendWithUrl,
        >::new())
        .build();

    let registry = ResourceRegistry::default();
    let controller = Controller::spawn(&settings, registry.clone(), client.clone())?;

    log::info!("Loading resources from {}...", args.resources.display());
    let resources = ResourceDir::new(args.resources);
    resources.reload(&controller).await?;

    let env = Arc::new(NotifierEnv::new(client, settings.notify.clone()));
    let notifiers = NotifierRegistry::new(env.clone());

    let mut pipeline = MultiStage::new()
        .with(SilenceStage::new(controller.clone()))
        .with(RouteStage::new(controller.clone()))
        .with(FilterStage::new(controller.clone()))
        .with(AggregationStage::new(controller.clone()))
        .with(NotifyStage::new(notifiers.clone()));
    if let Some(history) = &settings.history {
        log::info!("Recording history at {}", history.url);
        pipeline.push(HistoryStage::webhook(history, env)?);
    }

    let store = Arc::new(AlertStore::new(&settings.store));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(pipeline),
        &settings.dispatcher,
    ));

    log::info!("Starting dispatcher...");
    let dispatcher = tokio::spawn(
        dispatcher
            .run()
            .instrument(tracing::span!(tracing::Level::INFO, "dispatcher")),
    );

    let data = Data::new(AppData {
        controller,
        store,
        notifiers,
        registry,
        resources,
        cluster: settings.cluster.clone(),
        pipeline_timeout: settings.dispatcher.pipeline_timeout,
        app_version: args.app_version,
    });

    log::info!("Starting http server...");

    let server_data = data.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .app_data(JsonConfig::default().limit(MAX_PAYLOAD))
            .app_data(server_data.clone())
            .configure(routes)
    })
    .bind_auto_h2c(&args.bind)
    .map_err(Error::Bind)?
    .run()
    .await
    .map_err(Error::Server)?;

    log::info!("Http server stopped; draining alert store...");

    data.store.close();
    dispatcher.await.map_err(Error::JoinDispatcher)?;

    log::info!("Dispatcher stopped");

    Ok(())
}

fn routes(cfg: &mut ServiceConfig) {
    cfg.configure(alerts::service)
        .configure(notifications::service)
        .configure(receivers::service)
        .configure(status::service);
}

fn http_response<T: Serialize>(response: Result<T>) -> HttpResponse {
    match response {
        Ok(res) => HttpResponseBuilder::new(StatusCode::OK).json(res),
        Err(e) => HttpResponseBuilder::new(e.http_status_code()).json(e.to_string()),
    }
}

#[async_recursion]
async fn is_file(
    entry_path: PathBuf,
    visited: &mut Vec<PathBuf>,
) -> std::result::Result<bool, tokio::io::Error> {
    if visited.contains(&entry_path) {
        return Ok(false);
    }
    let metadata = tokio::fs::metadata(&entry_path).await?;
    if metadata.is_file() {
        return Ok(true);
    }
    if metadata.is_symlink() {
        visited.push(entry_path.clone());
        let symlink_path = entry_path.read_link()?;
        let symlink_metadata = tokio::fs::metadata(&symlink_path).await?;
        if symlink_metadata.is_file() {
            return Ok(true);
        }
        if symlink_metadata.is_symlink() {
            return is_file(symlink_path, visited).await;
        }
    }
    Ok(false)
}
