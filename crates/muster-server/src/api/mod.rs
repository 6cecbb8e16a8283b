//! Agent, catalog and health HTTP handlers.
//!
//! Every response carries an `X-Index` header with the index returned by
//! the operation. Validation and not-found failures map to 400,
//! replication failures to 5xx; the body mirrors the error text.

use actix_web::{HttpResponse, Scope, web};
use serde::Deserialize;
use tracing::info;

use muster_api::{
    DeregisterRequest, RegisterResponse, RegisterServiceRequest, convert_check_defs,
    parse_duration,
};
use muster_registry::{CheckStatus, CheckType, ListOptions, RegistryError};

use crate::AppState;

const INDEX_HEADER: &str = "X-Index";

/// Route table for the public surface.
pub fn routes() -> Scope {
    web::scope("/v1")
        .service(
            web::scope("/agent")
                .route("/service/register", web::put().to(register_service))
                .route("/service/deregister/{id}", web::put().to(deregister_by_id))
                .route("/service/deregister", web::put().to(deregister_body))
                .route("/check/pass/{check_id}", web::put().to(pass_check))
                .route("/check/warn/{check_id}", web::put().to(warn_check))
                .route("/check/fail/{check_id}", web::put().to(fail_check)),
        )
        .service(web::scope("/catalog").route("/services", web::get().to(catalog_services)))
        .service(web::scope("/health").route("/service/{service}", web::get().to(health_service)))
}

fn error_response(err: &RegistryError) -> HttpResponse {
    let mut builder = if err.is_client_error() {
        HttpResponse::BadRequest()
    } else {
        HttpResponse::InternalServerError()
    };
    if let Some(index) = err.index() {
        builder.insert_header((INDEX_HEADER, index.to_string()));
    }
    builder.json(serde_json::json!({ "Error": err.to_string() }))
}

/// PUT /v1/agent/service/register
async fn register_service(
    data: web::Data<AppState>,
    body: web::Json<RegisterServiceRequest>,
) -> HttpResponse {
    let req = body.into_inner();
    let specs = match convert_check_defs(&req.checks) {
        Ok(specs) => specs,
        Err(e) => return error_response(&e),
    };

    match data.registry.register(req.to_instance(), specs).await {
        Ok((index, check_ids)) => {
            info!(
                namespace = %req.namespace,
                service = %req.name,
                id = %req.id,
                index,
                "instance registered"
            );
            HttpResponse::Ok()
                .insert_header((INDEX_HEADER, index.to_string()))
                .json(RegisterResponse {
                    index,
                    instance_id: req.id,
                    check_ids,
                })
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct DeregisterQuery {
    #[serde(default)]
    ns: String,
    #[serde(default)]
    service: String,
}

/// PUT /v1/agent/service/deregister/{id}
async fn deregister_by_id(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<DeregisterQuery>,
) -> HttpResponse {
    deregister(&data, &query.ns, &query.service, &path.into_inner()).await
}

/// PUT /v1/agent/service/deregister
async fn deregister_body(
    data: web::Data<AppState>,
    body: web::Json<DeregisterRequest>,
) -> HttpResponse {
    deregister(&data, &body.namespace, &body.service, &body.id).await
}

async fn deregister(data: &AppState, ns: &str, service: &str, id: &str) -> HttpResponse {
    match data.registry.deregister(ns, service, id).await {
        Ok(index) => {
            info!(id = %id, index, "instance deregistered");
            HttpResponse::Ok()
                .insert_header((INDEX_HEADER, index.to_string()))
                .finish()
        }
        Err(e) => error_response(&e),
    }
}

/// PUT /v1/agent/check/pass/{check_id}
///
/// TTL checks are renewed; anything else is reported passing.
async fn pass_check(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let check_id = path.into_inner();
    let result = match data.registry.check_kind(&check_id) {
        Some(CheckType::Ttl) => data.registry.renew_ttl(&check_id).await,
        _ => {
            data.registry
                .report_check(&check_id, CheckStatus::Passing, "")
                .await
        }
    };
    check_response(result)
}

/// PUT /v1/agent/check/warn/{check_id}
async fn warn_check(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    check_response(
        data.registry
            .report_check(&path.into_inner(), CheckStatus::Warning, "")
            .await,
    )
}

/// PUT /v1/agent/check/fail/{check_id}
async fn fail_check(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    check_response(
        data.registry
            .report_check(&path.into_inner(), CheckStatus::Critical, "")
            .await,
    )
}

fn check_response(result: muster_registry::Result<u64>) -> HttpResponse {
    match result {
        Ok(index) => HttpResponse::Ok()
            .insert_header((INDEX_HEADER, index.to_string()))
            .finish(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CatalogQuery {
    #[serde(default)]
    ns: String,
}

/// GET /v1/catalog/services
async fn catalog_services(data: web::Data<AppState>, query: web::Query<CatalogQuery>) -> HttpResponse {
    let (names, index) = data.registry.list_services(&query.ns);
    HttpResponse::Ok()
        .insert_header((INDEX_HEADER, index.to_string()))
        .json(names)
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    ns: String,
    #[serde(default)]
    passing: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    index: u64,
    #[serde(default)]
    wait: String,
}

/// GET /v1/health/service/{service}
///
/// With `index` and `wait` set this long-polls: the watch either fires
/// on the next mutation of the service key (or immediately when the
/// caller is behind) or the wait deadline elapses. Either way the body
/// reflects the state at reply time.
async fn health_service(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HealthQuery>,
) -> HttpResponse {
    let service = path.into_inner();
    let wait = match parse_duration(&query.wait) {
        Ok(wait) => wait,
        Err(e) => return error_response(&e),
    };

    if let Some(wait) = wait
        && !wait.is_zero()
        && query.index > 0
    {
        let (_, signal) = data
            .registry
            .watch_service(&query.ns, &service, query.index);
        tokio::select! {
            _ = signal => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    let opts = ListOptions {
        passing_only: query.passing == "1" || query.passing.eq_ignore_ascii_case("true"),
        tag: (!query.tag.is_empty()).then(|| query.tag.clone()),
        zone: (!query.zone.is_empty()).then(|| query.zone.clone()),
    };
    let (views, index) = data.registry.list_healthy(&query.ns, &service, &opts);
    HttpResponse::Ok()
        .insert_header((INDEX_HEADER, index.to_string()))
        .json(views)
}
