#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const ENV_IDM_PROXY_MODE: &str = "IDM_PROXY_MODE";
pub const ENV_IDM_HTTP_PROXY_URL: &str = "IDM_HTTP_PROXY_URL";
pub const ENV_IDM_HTTPS_PROXY_URL: &str = "IDM_HTTPS_PROXY_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdmMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl IdmMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdmHttpRequest {
    pub method: IdmMethod,
    pub url: String,
    pub query: Vec<(&'static str, String)>,
    pub authorization: Option<String>,
    pub json_body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdmHttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdmTransportError {
    /// Connection refused/reset, timeout, DNS or TLS failure. `detail` is the transport's text.
    #[error("{detail}")]
    Transport { kind: &'static str, detail: String },

    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl IdmTransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { kind, .. } => kind,
            Self::Config(_) => "config_invalid",
        }
    }
}

/// Blocking outbound HTTP seam. Anything reaching the network goes through here.
pub trait IdmTransport: Send + Sync {
    fn send(&self, request: &IdmHttpRequest) -> Result<IdmHttpResponse, IdmTransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdmProxyMode {
    Off,
    Env,
    Explicit,
}

impl IdmProxyMode {
    pub fn from_env_value(raw: Option<String>) -> Self {
        match raw
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("off") => Self::Off,
            Some("explicit") => Self::Explicit,
            _ => Self::Env,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Env => "env",
            Self::Explicit => "explicit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdmProxyConfig {
    pub mode: IdmProxyMode,
    pub http_proxy_url: Option<String>,
    pub https_proxy_url: Option<String>,
}

impl Default for IdmProxyConfig {
    fn default() -> Self {
        Self {
            mode: IdmProxyMode::Env,
            http_proxy_url: None,
            https_proxy_url: None,
        }
    }
}

impl IdmProxyConfig {
    pub fn from_env_var_map<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            mode: IdmProxyMode::from_env_value(lookup(ENV_IDM_PROXY_MODE)),
            http_proxy_url: lookup(ENV_IDM_HTTP_PROXY_URL).and_then(trim_non_empty),
            https_proxy_url: lookup(ENV_IDM_HTTPS_PROXY_URL).and_then(trim_non_empty),
        }
    }
}

pub(crate) fn trim_non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_pair<F>(lookup: &F, upper: &str, lower: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(upper)
        .and_then(trim_non_empty)
        .or_else(|| lookup(lower).and_then(trim_non_empty))
}

fn no_proxy_matches(no_proxy: &str, host: &str) -> bool {
    let host = host.trim_matches(['[', ']']).to_ascii_lowercase();
    no_proxy
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let entry = entry.to_ascii_lowercase();
            match entry.rsplit_once(':') {
                Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                    name.to_string()
                }
                _ => entry,
            }
        })
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            if let Some(suffix) = entry.strip_prefix('.') {
                return host == suffix || host.ends_with(&entry);
            }
            host == entry || host.ends_with(&format!(".{entry}"))
        })
}

/// Proxy URL to use for `target_url`, or `None` for a direct connection. Unparsable target or
/// proxy URLs degrade to a direct connection.
pub fn resolve_proxy_for_target<F>(
    proxy_config: &IdmProxyConfig,
    target_url: &str,
    lookup: F,
) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if target_url.trim().is_empty() {
        return None;
    }
    let target = match Url::parse(target_url) {
        Ok(target) => target,
        Err(err) => {
            tracing::error!(target_url, error = %err, "error resolving proxy for target");
            return None;
        }
    };
    let is_https = target.scheme().eq_ignore_ascii_case("https");

    let candidate = match proxy_config.mode {
        IdmProxyMode::Off => None,
        IdmProxyMode::Explicit => {
            let (primary, fallback) = if is_https {
                (&proxy_config.https_proxy_url, &proxy_config.http_proxy_url)
            } else {
                (&proxy_config.http_proxy_url, &proxy_config.https_proxy_url)
            };
            primary.clone().or_else(|| fallback.clone())
        }
        IdmProxyMode::Env => {
            let host = target.host_str().unwrap_or_default();
            let bypass = env_pair(&lookup, "NO_PROXY", "no_proxy")
                .map(|no_proxy| no_proxy_matches(&no_proxy, host))
                .unwrap_or(false);
            if bypass {
                None
            } else if is_https {
                env_pair(&lookup, "HTTPS_PROXY", "https_proxy")
            } else {
                env_pair(&lookup, "HTTP_PROXY", "http_proxy")
            }
        }
    }?;

    let normalized = if candidate.contains("://") {
        candidate
    } else {
        format!("http://{candidate}")
    };
    match Url::parse(&normalized) {
        Ok(proxy) if proxy.host_str().is_some() => {
            tracing::debug!(
                target_url,
                proxy_host = proxy.host_str().unwrap_or_default(),
                proxy_port = proxy.port_or_known_default().unwrap_or_default(),
                "proxy configured for target"
            );
            Some(normalized)
        }
        Ok(_) => {
            tracing::error!(target_url, "error resolving proxy for target: proxy has no host");
            None
        }
        Err(err) => {
            tracing::error!(target_url, error = %err, "error resolving proxy for target");
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UreqTransportConfig {
    pub timeout_ms: u32,
    pub user_agent: String,
    pub trust_all: bool,
    pub proxy: IdmProxyConfig,
}

/// `IdmTransport` backed by a ureq agent built per call, so proxy resolution follows the target.
pub struct UreqTransport {
    timeout: Duration,
    user_agent: String,
    proxy: IdmProxyConfig,
    tls_connector: Option<Arc<native_tls::TlsConnector>>,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("proxy_mode", &self.proxy.mode.as_str())
            .field("trust_all", &self.tls_connector.is_some())
            .finish()
    }
}

impl UreqTransport {
    pub fn new(config: &UreqTransportConfig) -> Result<Self, IdmTransportError> {
        if config.timeout_ms == 0 {
            return Err(IdmTransportError::Config("timeout must be > 0".to_string()));
        }
        let tls_connector = if config.trust_all {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|err| IdmTransportError::Config(format!("tls connector: {err}")))?;
            Some(Arc::new(connector))
        } else {
            None
        };
        Ok(Self {
            timeout: Duration::from_millis(u64::from(config.timeout_ms).max(100)),
            user_agent: config.user_agent.clone(),
            proxy: config.proxy.clone(),
            tls_connector,
        })
    }

    fn agent_for(&self, target_url: &str) -> ureq::Agent {
        let mut builder = ureq::AgentBuilder::new()
            .timeout_connect(self.timeout)
            .timeout_read(self.timeout)
            .timeout_write(self.timeout)
            .user_agent(&self.user_agent)
            .try_proxy_from_env(false);
        if let Some(proxy_url) =
            resolve_proxy_for_target(&self.proxy, target_url, |key| std::env::var(key).ok())
        {
            match ureq::Proxy::new(&proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(err) => {
                    tracing::error!(target_url, error = %err, "proxy rejected; connecting directly")
                }
            }
        }
        if let Some(connector) = &self.tls_connector {
            builder = builder.tls_connector(connector.clone());
        }
        builder.build()
    }
}

fn response_from_ureq(response: ureq::Response) -> Result<IdmHttpResponse, IdmTransportError> {
    let status = response.status();
    let content_type = response.header("Content-Type").map(str::to_string);
    let body = response
        .into_string()
        .map_err(|err| IdmTransportError::Transport {
            kind: "body",
            detail: err.to_string(),
        })?;
    Ok(IdmHttpResponse {
        status,
        content_type,
        body,
    })
}

fn transport_error(transport: ureq::Transport) -> IdmTransportError {
    let detail = transport.to_string();
    let kind = classify_transport_error_kind(&format!("{:?} {}", transport.kind(), detail));
    IdmTransportError::Transport { kind, detail }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}

impl IdmTransport for UreqTransport {
    fn send(&self, request: &IdmHttpRequest) -> Result<IdmHttpResponse, IdmTransportError> {
        let agent = self.agent_for(&request.url);
        let mut outbound = agent.request(request.method.as_str(), &request.url);
        for (key, value) in &request.query {
            outbound = outbound.query(key, value);
        }
        if let Some(token) = request.authorization.as_deref() {
            outbound = outbound.set("Authorization", token);
        }
        let result = match &request.json_body {
            Some(body) => outbound.send_json(body),
            None => outbound.call(),
        };
        match result {
            Ok(response) => response_from_ureq(response),
            // Non-2xx is still a remote answer; it is relayed, not treated as transport failure.
            Err(ureq::Error::Status(_, response)) => response_from_ureq(response),
            Err(ureq::Error::Transport(transport)) => Err(transport_error(transport)),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedIdmTransport;

/// In-process transport for tests of this crate and of crates that enable `test-support`.
#[cfg(any(test, feature = "test-support"))]
mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::{IdmHttpRequest, IdmHttpResponse, IdmTransport, IdmTransportError};

    /// Transport that replays queued outcomes and records every request it sees.
    /// Once the queue is empty it keeps answering with `fallback`.
    #[derive(Debug)]
    pub struct ScriptedIdmTransport {
        script: Mutex<VecDeque<Result<IdmHttpResponse, IdmTransportError>>>,
        fallback: Result<IdmHttpResponse, IdmTransportError>,
        seen: Mutex<Vec<IdmHttpRequest>>,
    }

    impl ScriptedIdmTransport {
        pub fn always(outcome: Result<IdmHttpResponse, IdmTransportError>) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: outcome,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn status(status: u16, body: &str) -> Self {
            Self::always(Ok(IdmHttpResponse {
                status,
                content_type: Some("application/json".to_string()),
                body: body.to_string(),
            }))
        }

        pub fn connection_refused() -> Self {
            Self::always(Err(IdmTransportError::Transport {
                kind: "connection",
                detail: "Connection refused".to_string(),
            }))
        }

        pub fn push(&self, outcome: Result<IdmHttpResponse, IdmTransportError>) {
            if let Ok(mut script) = self.script.lock() {
                script.push_back(outcome);
            }
        }

        pub fn requests(&self) -> Vec<IdmHttpRequest> {
            self.seen
                .lock()
                .map(|seen| seen.clone())
                .unwrap_or_default()
        }
    }

    impl IdmTransport for ScriptedIdmTransport {
        fn send(&self, request: &IdmHttpRequest) -> Result<IdmHttpResponse, IdmTransportError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            let scripted = self
                .script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front());
            scripted.unwrap_or_else(|| self.fallback.clone())
        }
    }
}
