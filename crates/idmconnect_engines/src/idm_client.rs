#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use idmconnect_kernel_contracts::contract::Contract;
use idmconnect_kernel_contracts::idm::{
    IdmEndpoint, IdmOperation, ReaderNumberQuery, RemoteResult, SearchQuery,
    QUERY_PARAM_DATE_OF_BIRTH, QUERY_PARAM_GIVENNAME, QUERY_PARAM_READER_NUMBER,
    QUERY_PARAM_SURNAME, QUERY_PARAM_UNILOGIN,
};

use crate::idm_transport::{
    trim_non_empty, IdmHttpRequest, IdmMethod, IdmProxyConfig, IdmTransport, IdmTransportError,
    UreqTransport, UreqTransportConfig,
};

pub const ENV_IDM_TOKEN: &str = "IDM_TOKEN";
pub const ENV_IDM_TRUST_ALL: &str = "IDM_TRUST_ALL";
pub const ENV_IDM_TIMEOUT_MS: &str = "IDM_TIMEOUT_MS";
pub const ENV_IDM_HTTP_USER_AGENT: &str = "IDM_HTTP_USER_AGENT";

const DEFAULT_TIMEOUT_MS: u32 = 30_000;
const MIN_TIMEOUT_MS: u32 = 100;
const MAX_TIMEOUT_MS: u32 = 300_000;
const DEFAULT_USER_AGENT: &str = "idmconnect/0.1";

#[derive(Clone, PartialEq, Eq)]
pub struct IdmClientConfig {
    pub search_url: Option<String>,
    pub contract_url: Option<String>,
    pub reader_number_url: Option<String>,
    pub token: Option<String>,
    pub trust_all: bool,
    pub timeout_ms: u32,
    pub user_agent: String,
    pub proxy: IdmProxyConfig,
}

impl std::fmt::Debug for IdmClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdmClientConfig")
            .field("search_url", &self.search_url)
            .field("contract_url", &self.contract_url)
            .field("reader_number_url", &self.reader_number_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("trust_all", &self.trust_all)
            .field("timeout_ms", &self.timeout_ms)
            .field("user_agent", &self.user_agent)
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl Default for IdmClientConfig {
    fn default() -> Self {
        Self {
            search_url: None,
            contract_url: None,
            reader_number_url: None,
            token: None,
            trust_all: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: IdmProxyConfig::default(),
        }
    }
}

impl IdmClientConfig {
    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| std::env::var(key).ok())
    }

    pub fn from_env_var_map<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout_ms = lookup(ENV_IDM_TIMEOUT_MS)
            .and_then(trim_non_empty)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        let trust_all = lookup(ENV_IDM_TRUST_ALL)
            .and_then(trim_non_empty)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            search_url: lookup(IdmEndpoint::Search.env_name()).and_then(trim_non_empty),
            contract_url: lookup(IdmEndpoint::Contract.env_name()).and_then(trim_non_empty),
            reader_number_url: lookup(IdmEndpoint::ReaderNumber.env_name())
                .and_then(trim_non_empty),
            token: lookup(ENV_IDM_TOKEN).and_then(trim_non_empty),
            trust_all,
            timeout_ms,
            user_agent: lookup(ENV_IDM_HTTP_USER_AGENT)
                .and_then(trim_non_empty)
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            proxy: IdmProxyConfig::from_env_var_map(&lookup),
        }
    }

    pub fn endpoint_url(&self, endpoint: IdmEndpoint) -> Option<&str> {
        match endpoint {
            IdmEndpoint::Search => self.search_url.as_deref(),
            IdmEndpoint::Contract => self.contract_url.as_deref(),
            IdmEndpoint::ReaderNumber => self.reader_number_url.as_deref(),
        }
    }

    /// Env names of the endpoints that have a URL, in a stable order.
    pub fn configured_endpoints(&self) -> Vec<&'static str> {
        [
            IdmEndpoint::Search,
            IdmEndpoint::Contract,
            IdmEndpoint::ReaderNumber,
        ]
        .into_iter()
        .filter(|e| self.endpoint_url(*e).is_some())
        .map(IdmEndpoint::env_name)
        .collect()
    }
}

/// Outbound client for the IDM system. Calls never fail: every transport problem or missing
/// configuration comes back as a synthetic `RemoteResult`.
///
/// Calls block; async callers run them on the blocking pool.
#[derive(Clone)]
pub struct IdmClient {
    config: IdmClientConfig,
    transport: Arc<dyn IdmTransport>,
}

impl std::fmt::Debug for IdmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdmClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdmClient {
    pub fn new(config: IdmClientConfig, transport: Arc<dyn IdmTransport>) -> Self {
        Self { config, transport }
    }

    pub fn from_config(config: IdmClientConfig) -> Result<Self, IdmTransportError> {
        let transport = UreqTransport::new(&UreqTransportConfig {
            timeout_ms: config.timeout_ms,
            user_agent: config.user_agent.clone(),
            trust_all: config.trust_all,
            proxy: config.proxy.clone(),
        })?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &IdmClientConfig {
        &self.config
    }

    pub fn search(&self, query: &SearchQuery) -> RemoteResult {
        let mut params = Vec::new();
        if let Some(first) = query.first_name.clone() {
            params.push((QUERY_PARAM_GIVENNAME, first));
        }
        if let Some(last) = query.last_name.clone() {
            params.push((QUERY_PARAM_SURNAME, last));
        }
        if let Some(dob) = query.date_of_birth.as_deref() {
            params.push((QUERY_PARAM_DATE_OF_BIRTH, to_basic_iso_date(dob)));
        }
        self.call(IdmOperation::Search, IdmMethod::Get, params, None)
    }

    pub fn post_contract(&self, contract: &Contract) -> RemoteResult {
        self.transmit(IdmOperation::CreateContract, contract)
    }

    pub fn put_contract(&self, contract: &Contract) -> RemoteResult {
        self.transmit(IdmOperation::ReplaceContract, contract)
    }

    /// Sends `contract` with the verb `operation` implies. Only the two contract operations carry a
    /// body; any other operation is answered with a synthetic failure.
    pub fn transmit(&self, operation: IdmOperation, contract: &Contract) -> RemoteResult {
        let method = match operation {
            IdmOperation::CreateContract => IdmMethod::Post,
            IdmOperation::ReplaceContract => IdmMethod::Put,
            other => {
                return RemoteResult::synthetic_failure(format!(
                    "{} is not a contract operation.",
                    other.as_str()
                ))
            }
        };
        let body = match serde_json::to_value(contract) {
            Ok(body) => body,
            Err(err) => return RemoteResult::synthetic_failure(err.to_string()),
        };
        self.call(operation, method, Vec::new(), Some(body))
    }

    pub fn post_reader_number(&self, query: &ReaderNumberQuery) -> RemoteResult {
        let mut params = Vec::new();
        if let Some(unilogin) = query.unilogin.clone() {
            params.push((QUERY_PARAM_UNILOGIN, unilogin));
        }
        if let Some(number) = query.reader_number.clone() {
            params.push((QUERY_PARAM_READER_NUMBER, number));
        }
        self.call(
            IdmOperation::RegisterReaderNumber,
            IdmMethod::Post,
            params,
            None,
        )
    }

    pub fn delete_reader_number(&self, unilogin: Option<&str>) -> RemoteResult {
        let params = unilogin
            .map(|u| vec![(QUERY_PARAM_UNILOGIN, u.to_string())])
            .unwrap_or_default();
        self.call(
            IdmOperation::RemoveReaderNumber,
            IdmMethod::Delete,
            params,
            None,
        )
    }

    fn call(
        &self,
        operation: IdmOperation,
        method: IdmMethod,
        query: Vec<(&'static str, String)>,
        json_body: Option<serde_json::Value>,
    ) -> RemoteResult {
        let endpoint = operation.endpoint();
        let Some(url) = self.config.endpoint_url(endpoint) else {
            tracing::warn!(
                operation = operation.as_str(),
                endpoint = endpoint.env_name(),
                "idm endpoint not configured"
            );
            return RemoteResult::not_configured(endpoint);
        };
        let request = IdmHttpRequest {
            method,
            url: url.to_string(),
            query,
            authorization: self.config.token.clone(),
            json_body,
        };
        match self.transport.send(&request) {
            Ok(response) => {
                tracing::debug!(
                    operation = operation.as_str(),
                    status = response.status,
                    "idm call completed"
                );
                RemoteResult::new(response.status, response.content_type, response.body)
            }
            Err(err) => {
                tracing::warn!(
                    operation = operation.as_str(),
                    endpoint = endpoint.env_name(),
                    kind = err.kind(),
                    error = %err,
                    "idm call failed"
                );
                RemoteResult::synthetic_failure(err.to_string())
            }
        }
    }
}

/// `YYYY-MM-DD` to `YYYYMMDD`. Anything that is not an ISO date passes through untouched.
pub fn to_basic_iso_date(raw: &str) -> String {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|date| date.format("%Y%m%d").to_string())
        .unwrap_or_else(|_| raw.to_string())
}
