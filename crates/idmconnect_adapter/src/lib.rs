#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use idmconnect_engines::contract_lifecycle::LifecyclePolicyError;
use idmconnect_engines::idm_client::{IdmClient, IdmClientConfig};
use idmconnect_engines::idm_transport::IdmTransportError;
use idmconnect_kernel_contracts::contract::{
    BulkDeleteRequest, Contract, BASE_PATH_CONTRACTS, BASE_PATH_READER_NUMBER,
    BASE_PATH_SEARCHIDM, PATH_BULK_DELETE,
};
use idmconnect_kernel_contracts::idm::{ReaderNumberQuery, RemoteResult, SearchQuery};
use idmconnect_os::{ContractWorkflow, WorkflowError};
use idmconnect_storage::{ContractRepo, ContractStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_HTTP_BIND: &str = "IDMCONNECT_HTTP_BIND";
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8081";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid IDMCONNECT_HTTP_BIND value {value:?}: {source}")]
    InvalidBind {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error(transparent)]
    Transport(#[from] IdmTransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_env_var_map(|key| std::env::var(key).ok())
    }

    pub fn from_env_var_map<F>(lookup: F) -> Result<Self, AdapterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = lookup(ENV_HTTP_BIND)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let bind = value
            .parse()
            .map_err(|source| AdapterError::InvalidBind { value, source })?;
        Ok(Self { bind })
    }
}

#[derive(Debug, Clone)]
pub struct AdapterRuntime {
    workflow: ContractWorkflow,
}

impl AdapterRuntime {
    pub fn new(workflow: ContractWorkflow) -> Self {
        Self { workflow }
    }

    /// Fresh in-memory store plus a ureq-backed IDM client.
    pub fn from_client_config(config: IdmClientConfig) -> Result<Self, AdapterError> {
        let client = IdmClient::from_config(config)?;
        let store = Arc::new(ContractStore::new_in_memory());
        Ok(Self::new(ContractWorkflow::new(store, client)))
    }

    pub fn default_from_env() -> Result<Self, AdapterError> {
        Self::from_client_config(IdmClientConfig::from_env())
    }

    pub fn workflow(&self) -> &ContractWorkflow {
        &self.workflow
    }

    pub fn health_report(&self) -> Result<AdapterHealthResponse, WorkflowError> {
        let contracts = self.workflow.store().contract_row_count()?;
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            contracts,
            endpoints_configured: self.workflow.client().config().configured_endpoints(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub contracts: usize,
    pub endpoints_configured: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListParams {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// `WorkflowError` as an HTTP answer with a plain-text body.
#[derive(Debug)]
pub struct ApiError(pub WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
            WorkflowError::PolicyViolation(LifecyclePolicyError::DeleteNotAllowed { .. }) => {
                StatusCode::BAD_REQUEST
            }
            WorkflowError::PolicyViolation(LifecyclePolicyError::LibraryCardImmutable)
            | WorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::VersionConflict { .. } => StatusCode::CONFLICT,
            WorkflowError::StoreInconsistency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(status = status.as_u16(), error = %self.0, "request rejected");
        (status, self.0.to_string()).into_response()
    }
}

/// Relays a remote answer: status, `Content-Type` when there is one, and the body as text.
fn remote_response(remote: RemoteResult) -> Response {
    let status = StatusCode::from_u16(remote.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = remote
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok());
    let mut response = (status, remote.body).into_response();
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    response
}

pub fn router(runtime: Arc<AdapterRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            BASE_PATH_CONTRACTS,
            get(list_contracts).post(create_contract),
        )
        .route(
            &format!("{BASE_PATH_CONTRACTS}{PATH_BULK_DELETE}"),
            post(bulk_delete_contracts),
        )
        .route(
            &format!("{BASE_PATH_CONTRACTS}/:id"),
            get(get_contract)
                .put(replace_contract)
                .delete(delete_contract),
        )
        .route(
            &format!("{BASE_PATH_CONTRACTS}/:id/transmit"),
            get(transmit_contract),
        )
        .route(BASE_PATH_SEARCHIDM, get(search_idm))
        .route(
            BASE_PATH_READER_NUMBER,
            post(register_reader_number).delete(remove_reader_number),
        )
        .with_state(runtime)
}

async fn healthz(State(runtime): State<Arc<AdapterRuntime>>) -> Response {
    match runtime.health_report() {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn list_contracts(
    State(runtime): State<Arc<AdapterRuntime>>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let list = runtime.workflow().list(params.offset, params.limit)?;
    Ok(Json(list).into_response())
}

async fn create_contract(
    State(runtime): State<Arc<AdapterRuntime>>,
    Json(contract): Json<Contract>,
) -> Result<Response, ApiError> {
    let stored = runtime.workflow().create(contract)?;
    let mut response = (StatusCode::CREATED, Json(&stored)).into_response();
    if let Some(location) = stored
        .id
        .as_ref()
        .and_then(|id| HeaderValue::from_str(&format!("{BASE_PATH_CONTRACTS}/{id}")).ok())
    {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

async fn get_contract(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let contract = runtime.workflow().get(&id)?;
    Ok(Json(contract).into_response())
}

async fn replace_contract(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
    Json(contract): Json<Contract>,
) -> Result<StatusCode, ApiError> {
    runtime.workflow().replace(&id, contract).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_contract(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    runtime.workflow().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_delete_contracts(
    State(runtime): State<Arc<AdapterRuntime>>,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Response, ApiError> {
    let result = runtime.workflow().bulk_delete(request).await?;
    Ok((StatusCode::OK, Json(result)).into_response())
}

async fn transmit_contract(
    State(runtime): State<Arc<AdapterRuntime>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let remote = runtime.workflow().transmit(&id).await?;
    Ok(remote_response(remote))
}

async fn search_idm(
    State(runtime): State<Arc<AdapterRuntime>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    remote_response(runtime.workflow().search(query).await)
}

async fn register_reader_number(
    State(runtime): State<Arc<AdapterRuntime>>,
    Query(query): Query<ReaderNumberQuery>,
) -> Response {
    // The library-card task keeps running after its handle is dropped.
    let outcome = runtime.workflow().register_reader_number(query).await;
    remote_response(outcome.remote)
}

async fn remove_reader_number(
    State(runtime): State<Arc<AdapterRuntime>>,
    Query(query): Query<ReaderNumberQuery>,
) -> Response {
    let outcome = runtime.workflow().remove_reader_number(query.unilogin).await;
    remote_response(outcome.remote)
}
