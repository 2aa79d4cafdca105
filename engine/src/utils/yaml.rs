/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use actix_web::{
    body::EitherBody,
    http::header::{ContentDisposition, DispositionParam, DispositionType},
    HttpResponse, Responder, ResponseError,
};
use serde::Serialize;

/// Serializes the value as a yaml attachment with the given file name.
pub(crate) struct YamlFile<T>(pub(crate) String, pub(crate) T);

impl<T: Serialize> Responder for YamlFile<T> {
    type Body = EitherBody<String>;

    fn respond_to(self, _req: &actix_web::HttpRequest) -> actix_web::HttpResponse<Self::Body> {
        match serde_yaml::to_string(&self.1) {
            Ok(body) => match HttpResponse::Ok()
                .content_type("application/yaml")
                .append_header(ContentDisposition {
                    disposition: DispositionType::Attachment,
                    parameters: Vec::from_iter([DispositionParam::Filename(self.0)]),
                })
                .message_body(body)
            {
                Ok(res) => res.map_into_left_body(),
                Err(err) => HttpResponse::from_error(err).map_into_right_body(),
            },

            Err(err) => {
                HttpResponse::from_error(YamlPayloadError::Serialize(err)).map_into_right_body()
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum YamlPayloadError {
    #[error("serialization failed: {0}")]
    Serialize(serde_yaml::Error),
}

impl ResponseError for YamlPayloadError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
    }
}
