#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Status used for results synthesized locally (transport failure, missing configuration).
pub const SYNTHETIC_FAILURE_STATUS: u16 = 500;
pub const CONTENT_TYPE_TEXT_PLAIN: &str = "text/plain";

pub const QUERY_PARAM_UNILOGIN: &str = "unilogin";
pub const QUERY_PARAM_READER_NUMBER: &str = "UBReaderNumber";
pub const QUERY_PARAM_GIVENNAME: &str = "givenname";
pub const QUERY_PARAM_SURNAME: &str = "surname";
pub const QUERY_PARAM_DATE_OF_BIRTH: &str = "date_of_birth";

/// The three configurable remote endpoints. Each is named after the variable that configures it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdmEndpoint {
    Search,
    Contract,
    ReaderNumber,
}

impl IdmEndpoint {
    pub fn env_name(self) -> &'static str {
        match self {
            Self::Search => "IDM_URL",
            Self::Contract => "IDM_CONTRACT_URL",
            Self::ReaderNumber => "IDM_READER_NUMBER_URL",
        }
    }

    pub fn not_configured_message(self) -> String {
        format!("{} not configured.", self.env_name())
    }
}

/// The remote verbs this service can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdmOperation {
    Search,
    CreateContract,
    ReplaceContract,
    RegisterReaderNumber,
    RemoveReaderNumber,
}

impl IdmOperation {
    pub fn endpoint(self) -> IdmEndpoint {
        match self {
            Self::Search => IdmEndpoint::Search,
            Self::CreateContract | Self::ReplaceContract => IdmEndpoint::Contract,
            Self::RegisterReaderNumber | Self::RemoveReaderNumber => IdmEndpoint::ReaderNumber,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::CreateContract => "create_contract",
            Self::ReplaceContract => "replace_contract",
            Self::RegisterReaderNumber => "register_reader_number",
            Self::RemoveReaderNumber => "remove_reader_number",
        }
    }
}

/// Outcome of one remote call as relayed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResult {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl RemoteResult {
    pub fn new(status_code: u16, content_type: Option<String>, body: impl Into<String>) -> Self {
        Self {
            status_code,
            content_type,
            body: body.into(),
        }
    }

    pub fn synthetic_failure(message: impl Into<String>) -> Self {
        Self::new(
            SYNTHETIC_FAILURE_STATUS,
            Some(CONTENT_TYPE_TEXT_PLAIN.to_string()),
            message,
        )
    }

    pub fn not_configured(endpoint: IdmEndpoint) -> Self {
        Self::synthetic_failure(endpoint.not_configured_message())
    }

    /// A contract transmission counts as succeeded only on exactly 200.
    pub fn is_transmit_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn is_2xx(&self) -> bool {
        self.status_code / 100 == 2
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default, rename = "firstname")]
    pub first_name: Option<String>,
    #[serde(default, rename = "lastname")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderNumberQuery {
    #[serde(default)]
    pub unilogin: Option<String>,
    #[serde(default, rename = "UBReaderNumber")]
    pub reader_number: Option<String>,
}
