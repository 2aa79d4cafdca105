/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{ffi::OsString, path::PathBuf};

use actix_web::{http::StatusCode, ResponseError};

use notification_manager::resources::ResourceRef;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to initialize tracer : {0}")]
    OpenTelemetry(opentelemetry::trace::TraceError),
    #[error("failed to build http client: {0}")]
    BuildClient(reqwest::Error),
    #[error("failed to read resources from {0}: {1}")]
    ReadResources(PathBuf, std::io::Error),
    #[error("invalid resource file name: {0:?}")]
    InvalidFileName(OsString),
    #[error("duplicate resource {0} in {1}")]
    DuplicateResource(ResourceRef, PathBuf),
    #[error("failed to bind socket: {0}")]
    Bind(std::io::Error),
    #[error("server error: {0}")]
    Server(std::io::Error),
    #[error("failed to join dispatcher: {0}")]
    JoinDispatcher(tokio::task::JoinError),
    #[error("request has no receiver")]
    MissingReceiver,
    #[error("request has no alerts")]
    MissingAlerts,
    #[error("receiver resource {0} has no provider section")]
    EmptyReceiver(String),
    #[error("{0} of {1} alerts were not accepted")]
    Rejected(usize, usize, #[source] notification_manager::Error),
    #[error(transparent)]
    Lib(#[from] notification_manager::Error),
}

impl Error {
    pub(crate) fn http_status_code(&self) -> StatusCode {
        match self {
            Error::MissingReceiver | Error::MissingAlerts | Error::EmptyReceiver(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Rejected(_, _, e) | Error::Lib(e) if e.is_resolution_error() => {
                StatusCode::BAD_REQUEST
            }
            Error::Rejected(_, _, e) | Error::Lib(e) if e.is_backpressure() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ResponseError for crate::Error {
    fn status_code(&self) -> StatusCode {
        self.http_status_code()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use actix_web::http::StatusCode;

    use super::Error;

    #[test]
    fn status_codes() {
        assert_eq!(
            Error::Lib(notification_manager::Error::UnknownTenant("ns".into())).http_status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Rejected(
                1,
                3,
                notification_manager::Error::StorePushTimeout(Duration::from_secs(3))
            )
            .http_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Lib(notification_manager::Error::ControllerStopped).http_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::MissingAlerts.http_status_code(), StatusCode::BAD_REQUEST);
    }
}
