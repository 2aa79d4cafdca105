/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{fmt::Debug, sync::Arc, time::Duration};

use notification_manager::{AlertStore, Controller, NotifierRegistry, ResourceRegistry};

use crate::resources::ResourceDir;

pub(crate) struct AppData {
    pub(crate) controller: Controller,
    pub(crate) store: Arc<AlertStore>,
    pub(crate) notifiers: NotifierRegistry,
    pub(crate) registry: ResourceRegistry,
    pub(crate) resources: ResourceDir,
    pub(crate) cluster: String,
    /// Deadline for on-demand sends.
    pub(crate) pipeline_timeout: Duration,
    pub(crate) app_version: String,
}

#[derive(Debug)]
enum AppDataDebug {
    Controller,
    NotifierRegistry,
    ResourceRegistry,
    ResourceDir,
}

impl Debug for AppData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppData")
            .field("controller", &AppDataDebug::Controller)
            .field("queued", &self.store.len())
            .field("notifiers", &AppDataDebug::NotifierRegistry)
            .field("registry", &AppDataDebug::ResourceRegistry)
            .field("resources", &AppDataDebug::ResourceDir)
            .field("cluster", &self.cluster)
            .field("pipeline_timeout", &self.pipeline_timeout)
            .field("app_version", &self.app_version)
            .finish()
    }
}

#[cfg(test)]
impl AppData {
    /// Application state with an empty index, reading resources from
    /// `resources`.
    pub(crate) fn for_test(resources: std::path::PathBuf) -> actix_web::web::Data<Self> {
        use notification_manager::{NotifierEnv, Settings};

        let settings = Settings::default();
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let registry = ResourceRegistry::default();
        let controller =
            Controller::spawn(&settings, registry.clone(), client.clone()).unwrap();
        let env = Arc::new(NotifierEnv::new(client, settings.notify.clone()));

        actix_web::web::Data::new(Self {
            controller,
            store: Arc::new(AlertStore::new(&settings.store)),
            notifiers: NotifierRegistry::new(env),
            registry,
            resources: ResourceDir::new(resources),
            cluster: String::from("test"),
            pipeline_timeout: Duration::from_secs(5),
            app_version: String::from("0.0.0-test"),
        })
    }
}
