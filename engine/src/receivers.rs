/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::str::FromStr;

use actix_web::{
    web::{self, Data, Query, ServiceConfig},
    Either, HttpResponse,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use notification_manager::{Config, Receiver, ReceiverType, TenantId};

use crate::{http_response, utils::yaml::YamlFile, AppData, Result};

pub(crate) fn service(cfg: &mut ServiceConfig) {
    cfg.service(web::resource("/receivers").route(web::get().to(get_receivers)))
        .service(web::resource("/configs").route(web::get().to(get_configs)))
        .service(
            web::resource("/receiverWithConfig").route(web::get().to(get_receiver_with_config)),
        );
}

#[derive(Deserialize, Debug)]
struct IndexQuery {
    tenant: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    output: Output,
}

#[derive(Deserialize, PartialEq, Eq, Clone, Copy, Default, Debug)]
#[serde(rename_all = "lowercase")]
enum Output {
    #[default]
    Json,
    Yaml,
}

impl IndexQuery {
    fn tenant(&self) -> Option<TenantId> {
        self.tenant.clone().map(TenantId::new)
    }

    fn kind(&self) -> Result<Option<ReceiverType>> {
        Ok(self.kind.as_deref().map(ReceiverType::from_str).transpose()?)
    }
}

type IndexResponse<T> = Either<YamlFile<T>, HttpResponse>;

fn respond<T: Serialize>(name: &str, output: Output, result: Result<T>) -> IndexResponse<T> {
    match (output, result) {
        (Output::Yaml, Ok(value)) => Either::Left(YamlFile(format!("{name}.yaml"), value)),
        (_, result) => Either::Right(http_response(result)),
    }
}

#[instrument(skip(data))]
async fn get_receivers(
    data: Data<AppData>,
    query: Query<IndexQuery>,
) -> IndexResponse<Vec<Receiver>> {
    respond("receivers", query.output, run_get_receivers(&data, &query).await)
}

#[instrument(skip(data))]
async fn get_configs(data: Data<AppData>, query: Query<IndexQuery>) -> IndexResponse<Vec<Config>> {
    respond("configs", query.output, run_get_configs(&data, &query).await)
}

#[instrument(skip(data))]
async fn get_receiver_with_config(
    data: Data<AppData>,
    query: Query<IndexQuery>,
) -> IndexResponse<Vec<Receiver>> {
    respond(
        "receivers",
        query.output,
        run_get_receiver_with_config(&data, &query).await,
    )
}

async fn run_get_receivers(data: &AppData, query: &IndexQuery) -> Result<Vec<Receiver>> {
    Ok(data
        .controller
        .receivers(query.tenant(), query.kind()?)
        .await?)
}

async fn run_get_configs(data: &AppData, query: &IndexQuery) -> Result<Vec<Config>> {
    Ok(data
        .controller
        .configs(query.tenant(), query.kind()?)
        .await?)
}

async fn run_get_receiver_with_config(
    data: &AppData,
    query: &IndexQuery,
) -> Result<Vec<Receiver>> {
    Ok(data
        .controller
        .receiver_with_config(query.tenant(), query.name.clone(), query.kind()?)
        .await?)
}

#[cfg(test)]
mod test {
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    use notification_manager::Resource;

    use crate::AppData;

    #[actix_web::test]
    async fn index_dumps() {
        let data = AppData::for_test(std::env::temp_dir());
        for resource in [
            json!({"kind": "Receiver",
                   "metadata": {"name": "ops", "labels": {"type": "global"}},
                   "spec": {"webhook": {"url": "http://ops/"}}}),
            json!({"kind": "Receiver",
                   "metadata": {"name": "dev", "labels": {"type": "tenant", "user": "dev"}},
                   "spec": {"slack": {"channels": ["#dev"]}}}),
            json!({"kind": "Config",
                   "metadata": {"name": "default-slack", "labels": {"type": "default"}},
                   "spec": {"slack": {"token": "xoxb"}}}),
        ] {
            let resource: Resource = serde_json::from_value(resource).unwrap();
            data.controller.apply(resource).await.unwrap();
        }

        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .configure(super::service),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/receivers?tenant=dev")
            .to_request();
        let res: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(res.len(), 1);
        assert_eq!(res[0]["name"], "dev");

        let req = test::TestRequest::get()
            .uri("/receiverWithConfig?tenant=dev&name=dev")
            .to_request();
        let res: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(res[0]["config"]["name"], "default-slack");

        let req = test::TestRequest::get()
            .uri("/configs?type=slack&output=yaml")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("content-type").unwrap(),
            "application/yaml"
        );
        let body = test::read_body(res).await;
        assert!(std::str::from_utf8(&body)
            .unwrap()
            .contains("name: default-slack"));

        let req = test::TestRequest::get()
            .uri("/receivers?type=pager")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
