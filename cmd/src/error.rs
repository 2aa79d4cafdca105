/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    NotificationManager(#[from] notification_manager::Error),
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to decode {0}: {1}")]
    Decode(PathBuf, serde_yaml::Error),
    #[error("failed to encode output: {0}")]
    Encode(serde_json::Error),
    #[error("labels do not match any tenant")]
    NoTenant,
    #[error("no receiver named {0}")]
    NoReceiver(String),
}
