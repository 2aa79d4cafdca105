/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::BTreeMap, path::PathBuf};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use notification_manager::{Controller, Resource, ResourceRef};

use crate::{is_file, Error, Result};

const EXTENSIONS: [&str; 3] = [".yaml", ".yml", ".json"];

/// Resources provisioned from a directory. Reloading submits the
/// difference with the previously loaded set to the controller.
pub(crate) struct ResourceDir {
    path: PathBuf,
    loaded: AsyncMutex<BTreeMap<ResourceRef, Resource>>,
}

#[derive(Serialize, PartialEq, Eq, Default, Debug)]
pub(crate) struct ReloadSummary {
    pub(crate) applied: usize,
    pub(crate) deleted: usize,
    pub(crate) unchanged: usize,
    pub(crate) failed: usize,
}

impl ResourceDir {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            loaded: AsyncMutex::new(BTreeMap::new()),
        }
    }

    /// Read every resource file in the directory.
    pub(crate) async fn read(&self) -> Result<BTreeMap<ResourceRef, Resource>> {
        let mut resources = BTreeMap::new();
        let mut dir = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| Error::ReadResources(self.path.clone(), e))?;

        while let Some(ent) = dir
            .next_entry()
            .await
            .map_err(|e| Error::ReadResources(self.path.clone(), e))?
        {
            if !is_file(ent.path(), &mut Vec::new())
                .await
                .map_err(|e| Error::ReadResources(ent.path(), e))?
            {
                continue;
            }
            let name = ent
                .file_name()
                .into_string()
                .map_err(Error::InvalidFileName)?;
            if name.starts_with('.') || !EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
                continue;
            }

            let data = tokio::fs::read_to_string(ent.path())
                .await
                .map_err(|e| Error::ReadResources(ent.path(), e))?;
            for resource in Resource::parse_documents(&ent.path(), &data)? {
                let reference = resource.reference();
                if resources.insert(reference.clone(), resource).is_some() {
                    return Err(Error::DuplicateResource(reference, ent.path()));
                }
            }
        }

        Ok(resources)
    }

    /// Re-read the directory and bring the controller up to date.
    /// Resources that fail to apply are logged and retried on the
    /// next reload.
    pub(crate) async fn reload(&self, controller: &Controller) -> Result<ReloadSummary> {
        let current = self.read().await?;
        let mut loaded = self.loaded.lock().await;
        let mut summary = ReloadSummary::default();

        let removed = loaded
            .keys()
            .filter(|reference| !current.contains_key(reference))
            .cloned()
            .collect::<Vec<_>>();
        for reference in removed {
            match controller.delete(reference.clone()).await {
                Ok(()) => {
                    loaded.remove(&reference);
                    summary.deleted += 1;
                }
                Err(e) => {
                    log::warn!("failed to delete {reference}: {e}");
                    summary.failed += 1;
                }
            }
        }

        for (reference, resource) in current {
            if loaded.get(&reference) == Some(&resource) {
                summary.unchanged += 1;
                continue;
            }
            match controller.apply(resource.clone()).await {
                Ok(()) => {
                    loaded.insert(reference, resource);
                    summary.applied += 1;
                }
                Err(e) => {
                    log::warn!("failed to apply {reference}: {e}");
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "resources reloaded from {}: {} applied, {} deleted, {} unchanged, {} failed",
            self.path.display(),
            summary.applied,
            summary.deleted,
            summary.unchanged,
            summary.failed
        );
        Ok(summary)
    }
}
