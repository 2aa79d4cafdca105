/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

mod error;

use std::{
    collections::BTreeMap,
    future::Future,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use notification_manager::{
    split::split_message,
    stage::{AggregationStage, FilterStage, RouteStage, SilenceStage},
    AlertsPayload, Controller, ExecContext, Labels, MultiStage, ObjectKind, Resource,
    ResourceRegistry, Settings, Stage, StageData,
};

use error::{Error, Result};

/// Inspect notification manager resources from the command line.
#[derive(clap::Parser)]
struct Args {
    /// Settings file (yaml).
    #[clap(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    Tenant(TenantArgs),
    MatchConfig(MatchConfigArgs),
    DryRun(DryRunArgs),
    Split(SplitArgs),
}

/// Resolve the tenant an object with the given labels belongs to.
#[derive(clap::Args)]
struct TenantArgs {
    #[clap(long, value_enum, default_value = "receiver")]
    kind: Kind,
    /// Labels of the object (json or yaml map).
    labels: PathBuf,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum Kind {
    Receiver,
    Config,
}

/// Show the config each receiver with the given name resolves to.
#[derive(clap::Args)]
struct MatchConfigArgs {
    /// Resource file or directory.
    resources: PathBuf,
    /// Receiver name.
    name: String,
}

/// Route alerts offline and show the resulting receivers and groups.
#[derive(clap::Args)]
struct DryRunArgs {
    /// Resource file or directory.
    resources: PathBuf,
    /// Alerts (json or yaml; a list or an alertmanager payload).
    alerts: PathBuf,
}

/// Split a message into provider-sized chunks.
#[derive(clap::Args)]
struct SplitArgs {
    #[clap(long, default_value = "4096")]
    max_bytes: usize,
    file: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();

    let res = match &args.cmd {
        Command::Tenant(cmd) => tenant(args.settings.as_deref(), cmd),
        Command::MatchConfig(cmd) => run(match_config(args.settings.as_deref(), cmd)),
        Command::DryRun(cmd) => run(dry_run(args.settings.as_deref(), cmd)),
        Command::Split(cmd) => split(cmd),
    };

    if let Err(e) = res {
        eprintln!("Error: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run<F>(fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)?
        .block_on(fut)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::Read(path.to_path_buf(), e))
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => serde_yaml::from_str(&read(path)?)
            .map_err(|e| Error::Decode(path.to_path_buf(), e)),
        None => Ok(Settings::default()),
    }
}

/// Resources from a file, or from every yaml and json file in a
/// directory.
fn load_resources(path: &Path) -> Result<Vec<Resource>> {
    if !path.is_dir() {
        return Ok(Resource::parse_documents(path, &read(path)?)?);
    }

    let mut paths = std::fs::read_dir(path)
        .map_err(|e| Error::Read(path.to_path_buf(), e))?
        .map(|ent| ent.map(|ent| ent.path()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Read(path.to_path_buf(), e))?;
    paths.retain(|p| {
        p.is_file()
            && p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"))
    });
    paths.sort();

    let mut resources = Vec::new();
    for path in paths {
        resources.extend(Resource::parse_documents(&path, &read(&path)?)?);
    }
    Ok(resources)
}

async fn controller(settings: &Settings, resources: &Path) -> Result<Controller> {
    let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
    let controller = Controller::spawn(settings, ResourceRegistry::default(), client)?;
    for resource in load_resources(resources)? {
        let reference = resource.reference();
        if let Err(e) = controller.apply(resource).await {
            log::warn!("skipping {reference}: {e}");
        }
    }
    Ok(controller)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).map_err(Error::Encode)?
    );
    Ok(())
}

fn tenant(settings: Option<&Path>, args: &TenantArgs) -> Result<()> {
    let settings = load_settings(settings)?;
    let labels: Labels = serde_yaml::from_str(&read(&args.labels)?)
        .map_err(|e| Error::Decode(args.labels.clone(), e))?;
    let kind = match args.kind {
        Kind::Receiver => ObjectKind::Receiver,
        Kind::Config => ObjectKind::Config,
    };
    let tenant = settings
        .routing
        .selectors
        .tenant_id(&labels, kind)
        .ok_or(Error::NoTenant)?;
    println!("{tenant}");
    Ok(())
}

#[derive(Serialize)]
struct MatchedConfig {
    tenant: String,
    receiver: String,
    config: Option<String>,
}

async fn match_config(settings: Option<&Path>, args: &MatchConfigArgs) -> Result<()> {
    let settings = load_settings(settings)?;
    let controller = controller(&settings, &args.resources).await?;

    let receivers = controller
        .receiver_with_config(None, Some(args.name.clone()), None)
        .await?;
    if receivers.is_empty() {
        return Err(Error::NoReceiver(args.name.clone()));
    }

    let matched = receivers
        .into_iter()
        .map(|receiver| MatchedConfig {
            tenant: receiver.tenant.to_string(),
            receiver: receiver.key(),
            config: receiver.config.as_ref().map(|config| {
                format!("{} ({})", config.key(), config.tenant)
            }),
        })
        .collect::<Vec<_>>();
    print_json(&matched)
}

#[derive(Serialize)]
struct Delivery {
    tenant: String,
    receiver: String,
    config: Option<String>,
    groups: BTreeMap<String, Vec<String>>,
}

async fn dry_run(settings: Option<&Path>, args: &DryRunArgs) -> Result<()> {
    let settings = load_settings(settings)?;
    let controller = controller(&settings, &args.resources).await?;

    let payload: AlertsPayload = serde_yaml::from_str(&read(&args.alerts)?)
        .map_err(|e| Error::Decode(args.alerts.clone(), e))?;
    let now = Utc::now();
    let alerts = payload
        .into_alerts()
        .into_iter()
        .map(|alert| alert.prepare(&settings.cluster, now))
        .collect::<Vec<_>>();

    let pipeline = MultiStage::new()
        .with(SilenceStage::new(controller.clone()))
        .with(RouteStage::new(controller.clone()))
        .with(FilterStage::new(controller.clone()))
        .with(AggregationStage::new(controller));
    let ctx = ExecContext::new(1, Duration::from_secs(30));

    let deliveries = match pipeline.exec(&ctx, StageData::Alerts(alerts)).await? {
        Some(StageData::Groups(packets)) => packets
            .into_iter()
            .map(|packet| Delivery {
                tenant: packet.receiver.tenant.to_string(),
                receiver: packet.receiver.key(),
                config: packet.receiver.config.as_ref().map(|config| config.key()),
                groups: packet
                    .groups
                    .into_iter()
                    .map(|(key, alerts)| {
                        let ids = alerts.into_iter().map(|alert| alert.id).collect();
                        (key, ids)
                    })
                    .collect(),
            })
            .collect(),
        _ => Vec::new(),
    };
    print_json(&deliveries)
}

fn split(args: &SplitArgs) -> Result<()> {
    let text = read(&args.file)?;
    for (i, chunk) in split_message(&text, args.max_bytes).iter().enumerate() {
        println!("----- chunk {} ({} bytes)", i + 1, chunk.len());
        print!("{chunk}");
        if !chunk.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
