/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{path::PathBuf, time::Duration};

use itertools::Itertools;

use crate::{receiver::ReceiverType, tenant::TenantId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("timed out pushing alert to the store after {0:?}")]
    StorePushTimeout(Duration),
    #[error("alert store is closed")]
    StoreClosed,
    #[error("no worker slot available within {0:?}")]
    SlotTimeout(Duration),
    #[error("worker slots closed")]
    SlotsClosed,
    #[error("pipeline {0} timed out")]
    PipelineTimeout(u64),
    #[error("pipeline {0} cancelled")]
    Cancelled(u64),
    #[error("async group timed out")]
    GroupTimeout,
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("failed to fetch access token for {0}: {1}")]
    FetchToken(String, #[source] Box<Error>),
    #[error("environment variable {0} is not set")]
    MissingCredential(String),
    #[error("empty credential")]
    EmptyCredential,
    #[error("invalid receiver {0}: {1}")]
    InvalidReceiver(String, String),
    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),
    #[error("no config matched receiver {0}")]
    NoMatchedConfig(String),
    #[error("no notifier registered for receiver type {0}")]
    UnknownReceiverType(ReceiverType),
    #[error("invalid receiver type: {0}")]
    InvalidReceiverType(String),
    #[error("failed to decode {0} section: {1}")]
    DecodeSection(String, serde_json::Error),
    #[error("unable to resolve tenant for {0}")]
    UnknownTenant(String),
    #[error("receiver {1} not found for tenant {0}")]
    ReceiverNotFound(TenantId, String),
    #[error("unexpected stage data for stage {0}: expected {1}")]
    UnexpectedData(&'static str, &'static str),
    #[error("controller is not running")]
    ControllerStopped,
    #[error("invalid regular expression {0}: {1}")]
    InvalidRegex(String, regex::Error),
    #[error("invalid url {0}: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest_middleware::Error),
    #[error("http request to {0} returned status {1}")]
    HttpStatus(String, reqwest::StatusCode),
    #[error("failed to decode response from {0}: {1}")]
    DecodeResponse(String, reqwest::Error),
    #[error("{0} returned error {1}: {2}")]
    Provider(ReceiverType, i64, String),
    #[error("smtp error: {0}")]
    Smtp(String),
    #[error("smtp connection failed: {0}")]
    SmtpIo(#[from] std::io::Error),
    #[error("failed to encode payload: {0}")]
    Encode(serde_json::Error),
    #[error("failed to read {0}: {1}")]
    ReadFile(PathBuf, std::io::Error),
    #[error("failed to decode {0}: {1}")]
    DecodeYaml(PathBuf, serde_yaml::Error),
    #[error("{}", .0.iter().join("; "))]
    Multiple(Vec<Error>),
}

impl Error {
    /// Collapse a list of errors into a single result.
    pub fn from_many(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    /// Errors caused by the request rather than by the environment.
    pub fn is_resolution_error(&self) -> bool {
        match self {
            Error::InvalidReceiver(_, _)
            | Error::InvalidConfig(_, _)
            | Error::NoMatchedConfig(_)
            | Error::UnknownReceiverType(_)
            | Error::InvalidReceiverType(_)
            | Error::DecodeSection(_, _)
            | Error::UnknownTenant(_)
            | Error::ReceiverNotFound(_, _)
            | Error::InvalidRegex(_, _)
            | Error::InvalidUrl(_, _)
            | Error::EmptyCredential
            | Error::MissingCredential(_) => true,
            Error::Multiple(errors) => errors.iter().all(Error::is_resolution_error),
            _ => false,
        }
    }

    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            Error::StorePushTimeout(_)
                | Error::StoreClosed
                | Error::SlotTimeout(_)
                | Error::GroupTimeout
                | Error::PipelineTimeout(_)
        )
    }
}
