//! HTTP handlers. Each write goes to the store first and is replayed into
//! the cache only once the store confirmed it; reads are served from the
//! cache alone.
use crate::cache::{Cache, CacheError};
use crate::config::Listener as ListenerConfig;
use crate::metrics_defs::{CACHE_MUTATIONS, STORE_WRITE_FAILURES};
use crate::store::{Store, StoreError};
use crate::types::{
    AppLimits, Application, Blockchain, LoadBalancer, PayPlan, Redirect, UpdateApplication,
    UpdateError, UpdateFirstDateSurpassed, UpdateLoadBalancer,
};
use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    cache: Arc<Cache>,
    store: Arc<dyn Store>,
    api_keys: Arc<HashSet<String>>,
    // Held from a store write until its cache replay, so concurrent writes
    // reach the cache in the order the store applied them
    writes: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(cache: Arc<Cache>, store: Arc<dyn Store>, api_keys: Vec<String>) -> Self {
        AppState {
            cache,
            store,
            api_keys: Arc::new(api_keys.into_iter().collect()),
            writes: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/blockchain", get(get_blockchains).post(create_blockchain))
        .route("/blockchain/{id}", get(get_blockchain))
        .route("/blockchain/{id}/activate", post(activate_blockchain))
        .route("/application", get(get_applications).post(create_application))
        .route("/application/limits", get(get_applications_limits))
        .route(
            "/application/first_date_surpassed",
            post(update_first_date_surpassed),
        )
        .route(
            "/application/{id}",
            get(get_application).put(update_application),
        )
        .route(
            "/load_balancer",
            get(get_load_balancers).post(create_load_balancer),
        )
        .route(
            "/load_balancer/{id}",
            get(get_load_balancer).put(update_load_balancer),
        )
        .route("/user/{id}/application", get(get_applications_by_user))
        .route("/user/{id}/load_balancer", get(get_load_balancers_by_user))
        .route("/pay_plan", get(get_pay_plans))
        .route("/pay_plan/{type}", get(get_pay_plan))
        .route("/redirect", post(create_redirect))
        .layer(middleware::from_fn_with_state(state.clone(), authorize))
        .with_state(state)
}

pub async fn serve(listener: &ListenerConfig, state: AppState) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Portal DB listening");
    axum::serve(listener, router(state)).await
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        source: StoreError,
    },

    #[error("{operation} failed: {source}")]
    Cache {
        operation: &'static str,
        source: CacheError,
    },
}

impl ApiError {
    fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{entity} not found"))
    }

    fn store(operation: &'static str) -> impl FnOnce(StoreError) -> ApiError {
        move |source| ApiError::Store { operation, source }
    }

    fn cache(operation: &'static str) -> impl FnOnce(CacheError) -> ApiError {
        move |source| ApiError::Cache { operation, source }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<UpdateError> for ApiError {
    fn from(err: UpdateError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Store { operation, .. } => {
                tracing::error!(error = %self, "Store write failed");
                crate::counter!(STORE_WRITE_FAILURES, "operation" => *operation).increment(1);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Cache {
                source: CacheError::NotFound { .. },
                ..
            } => StatusCode::NOT_FOUND,
            ApiError::Cache { .. } => {
                // The store accepted a write the cache cannot apply
                tracing::error!(error = %self, "Cache diverged from store");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ApiErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

fn record_mutation(entity: &'static str) {
    crate::counter!(CACHE_MUTATIONS, "entity" => entity).increment(1);
}

/// Every route but the health check requires a configured API key in the
/// `Authorization` header.
async fn authorize(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.uri().path() == "/" {
        return next.run(req).await;
    }

    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|key| state.api_keys.contains(key));
    if !authorized {
        return ApiError::Unauthorized.into_response();
    }

    next.run(req).await
}

async fn health() -> &'static str {
    "Portal DB is up and running!"
}

async fn get_blockchains(State(state): State<AppState>) -> Json<Vec<Blockchain>> {
    Json(state.cache.list_blockchains())
}

async fn get_blockchain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Blockchain>, ApiError> {
    state
        .cache
        .get_blockchain(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("blockchain"))
}

async fn create_blockchain(
    State(state): State<AppState>,
    payload: Result<Json<Blockchain>, JsonRejection>,
) -> Result<Json<Blockchain>, ApiError> {
    let Json(blockchain) = payload?;
    let _write = state.writes.lock().await;
    let blockchain = state
        .store
        .write_blockchain(blockchain)
        .await
        .map_err(ApiError::store("WriteBlockchain"))?;

    let blockchain = state.cache.apply_create_blockchain(blockchain);
    record_mutation("blockchain");
    Ok(Json(blockchain))
}

async fn activate_blockchain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<bool>, JsonRejection>,
) -> Result<Json<bool>, ApiError> {
    let Json(active) = payload?;
    let _write = state.writes.lock().await;
    if state.cache.get_blockchain(&id).is_none() {
        return Err(ApiError::not_found("blockchain"));
    }

    state
        .store
        .activate_blockchain(&id, active)
        .await
        .map_err(ApiError::store("ActivateBlockchain"))?;
    state
        .cache
        .apply_activate_blockchain(&id, active)
        .map_err(ApiError::cache("ActivateBlockchain"))?;
    record_mutation("blockchain");
    Ok(Json(active))
}

async fn get_applications(State(state): State<AppState>) -> Json<Vec<Application>> {
    Json(state.cache.list_applications())
}

async fn get_applications_limits(State(state): State<AppState>) -> Json<Vec<AppLimits>> {
    Json(state.cache.list_app_limits())
}

async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Application>, ApiError> {
    state
        .cache
        .get_application(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("application"))
}

async fn create_application(
    State(state): State<AppState>,
    payload: Result<Json<Application>, JsonRejection>,
) -> Result<Json<Application>, ApiError> {
    let Json(app) = payload?;
    let _write = state.writes.lock().await;
    let app = state
        .store
        .write_application(app)
        .await
        .map_err(ApiError::store("WriteApplication"))?;

    let app = state
        .cache
        .apply_create_application(app)
        .map_err(ApiError::cache("CreateApplication"))?;
    record_mutation("application");
    Ok(Json(app))
}

async fn update_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateApplication>, JsonRejection>,
) -> Result<Json<Application>, ApiError> {
    if state.cache.get_application(&id).is_none() {
        return Err(ApiError::not_found("application"));
    }
    let Json(update) = payload?;
    let _write = state.writes.lock().await;
    update.validate()?;

    let app = if update.remove {
        state
            .store
            .remove_application(&id)
            .await
            .map_err(ApiError::store("RemoveApplication"))?;
        state
            .cache
            .apply_remove_application(&id)
            .map_err(ApiError::cache("RemoveApplication"))?
    } else {
        state
            .store
            .update_application(&id, &update)
            .await
            .map_err(ApiError::store("UpdateApplication"))?;
        state
            .cache
            .apply_update_application(&id, &update)
            .map_err(ApiError::cache("UpdateApplication"))?
    };

    record_mutation("application");
    Ok(Json(app))
}

async fn update_first_date_surpassed(
    State(state): State<AppState>,
    payload: Result<Json<UpdateFirstDateSurpassed>, JsonRejection>,
) -> Result<Json<Vec<Application>>, ApiError> {
    let Json(update) = payload?;
    let _write = state.writes.lock().await;
    update.validate()?;
    if let Some(missing) = update
        .application_ids
        .iter()
        .find(|id| state.cache.get_application(id).is_none())
    {
        return Err(ApiError::NotFound(format!("{missing} not found")));
    }

    state
        .store
        .update_first_date_surpassed(&update)
        .await
        .map_err(ApiError::store("UpdateFirstDateSurpassed"))?;
    let apps = state
        .cache
        .apply_first_date_surpassed(&update.application_ids, update.first_date_surpassed)
        .map_err(ApiError::cache("UpdateFirstDateSurpassed"))?;

    record_mutation("application");
    Ok(Json(apps))
}

async fn get_applications_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Application>>, ApiError> {
    let apps = state.cache.list_applications_by_user(&user_id);
    if apps.is_empty() {
        return Err(ApiError::not_found("applications"));
    }
    Ok(Json(apps))
}

async fn get_load_balancers(State(state): State<AppState>) -> Json<Vec<LoadBalancer>> {
    Json(state.cache.list_load_balancers())
}

async fn get_load_balancer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LoadBalancer>, ApiError> {
    state
        .cache
        .get_load_balancer(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("load balancer"))
}

async fn create_load_balancer(
    State(state): State<AppState>,
    payload: Result<Json<LoadBalancer>, JsonRejection>,
) -> Result<Json<LoadBalancer>, ApiError> {
    let Json(lb) = payload?;
    let _write = state.writes.lock().await;
    let lb = state
        .store
        .write_load_balancer(lb)
        .await
        .map_err(ApiError::store("WriteLoadBalancer"))?;

    let lb = state
        .cache
        .apply_create_load_balancer(lb)
        .map_err(ApiError::cache("CreateLoadBalancer"))?;
    record_mutation("load_balancer");
    Ok(Json(lb))
}

async fn update_load_balancer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateLoadBalancer>, JsonRejection>,
) -> Result<Json<LoadBalancer>, ApiError> {
    if state.cache.get_load_balancer(&id).is_none() {
        return Err(ApiError::not_found("load balancer"));
    }
    let Json(update) = payload?;
    let _write = state.writes.lock().await;
    update.validate()?;

    let lb = if update.remove {
        state
            .store
            .remove_load_balancer(&id)
            .await
            .map_err(ApiError::store("RemoveLoadBalancer"))?;
        state
            .cache
            .apply_remove_load_balancer(&id)
            .map_err(ApiError::cache("RemoveLoadBalancer"))?
    } else {
        state
            .store
            .update_load_balancer(&id, &update)
            .await
            .map_err(ApiError::store("UpdateLoadBalancer"))?;
        state
            .cache
            .apply_update_load_balancer(&id, &update)
            .map_err(ApiError::cache("UpdateLoadBalancer"))?
    };

    record_mutation("load_balancer");
    Ok(Json(lb))
}

async fn get_load_balancers_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<LoadBalancer>>, ApiError> {
    let lbs = state.cache.list_load_balancers_by_user(&user_id);
    if lbs.is_empty() {
        return Err(ApiError::not_found("load balancer"));
    }
    Ok(Json(lbs))
}

async fn get_pay_plans(State(state): State<AppState>) -> Json<Vec<PayPlan>> {
    Json(state.cache.list_pay_plans())
}

async fn get_pay_plan(
    State(state): State<AppState>,
    Path(plan_type): Path<String>,
) -> Result<Json<PayPlan>, ApiError> {
    state
        .cache
        .get_pay_plan(&plan_type.to_uppercase())
        .map(Json)
        .ok_or_else(|| ApiError::not_found("pay plan"))
}

async fn create_redirect(
    State(state): State<AppState>,
    payload: Result<Json<Redirect>, JsonRejection>,
) -> Result<Json<Redirect>, ApiError> {
    let Json(redirect) = payload?;
    let _write = state.writes.lock().await;
    let redirect = state
        .store
        .write_redirect(redirect)
        .await
        .map_err(ApiError::store("WriteRedirect"))?;

    let redirect = state
        .cache
        .apply_create_redirect(redirect)
        .map_err(ApiError::cache("CreateRedirect"))?;
    record_mutation("redirect");
    Ok(Json(redirect))
}
