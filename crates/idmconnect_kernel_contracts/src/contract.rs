#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{ContractViolation, Validate};

pub const TABLE_NAME_CONTRACTS: &str = "contract";
pub const BASE_PATH_CONTRACTS: &str = "/idm-connect/contract";
pub const BASE_PATH_SEARCHIDM: &str = "/idm-connect/searchidm";
pub const BASE_PATH_READER_NUMBER: &str = "/idm-connect/ubreadernumber";
pub const PATH_BULK_DELETE: &str = "/bulk-delete";

/// Canonical (hyphenated, lowercase) UUID identifying one contract row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractId(String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        let parsed = Uuid::parse_str(id.trim()).map_err(|_| ContractViolation::InvalidValue {
            field: "contract.id",
            reason: "must be a UUID",
        })?;
        Ok(Self(parsed.hyphenated().to_string()))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContractId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContractId> for String {
    fn from(value: ContractId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Draft,
    Pending,
    PendingEdit,
    TransmissionError,
    TransmissionErrorEdit,
    Updated,
    Activated,
}

impl ContractStatus {
    pub const ALL: [ContractStatus; 7] = [
        ContractStatus::Draft,
        ContractStatus::Pending,
        ContractStatus::PendingEdit,
        ContractStatus::TransmissionError,
        ContractStatus::TransmissionErrorEdit,
        ContractStatus::Updated,
        ContractStatus::Activated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::PendingEdit => "PENDING_EDIT",
            Self::TransmissionError => "TRANSMISSION_ERROR",
            Self::TransmissionErrorEdit => "TRANSMISSION_ERROR_EDIT",
            Self::Updated => "UPDATED",
            Self::Activated => "ACTIVATED",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Validate for Personal {
    fn validate(&self) -> Result<(), ContractViolation> {
        for (field, value) in [
            ("contract.personal.firstName", &self.first_name),
            ("contract.personal.lastName", &self.last_name),
        ] {
            match value.as_deref().map(str::trim) {
                None => return Err(ContractViolation::MissingField { field }),
                Some("") => {
                    return Err(ContractViolation::InvalidValue {
                        field,
                        reason: "must not be empty",
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// A contract row. Everything the lifecycle does not look at rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContractId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContractStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal: Option<Personal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uni_login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_card: Option<String>,
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Contract {
    /// Stored status, with an unset status read as `DRAFT`.
    pub fn effective_status(&self) -> ContractStatus {
        self.status.unwrap_or(ContractStatus::Draft)
    }

    pub fn with_status(mut self, status: ContractStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_id(mut self, id: ContractId) -> Self {
        self.id = Some(id);
        self
    }
}

impl Validate for Contract {
    fn validate(&self) -> Result<(), ContractViolation> {
        let personal = self
            .personal
            .as_ref()
            .ok_or(ContractViolation::MissingField {
                field: "contract.personal",
            })?;
        personal.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteRequest {
    #[serde(default)]
    pub uuids: Option<Vec<String>>,
}

impl Validate for BulkDeleteRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        match &self.uuids {
            None => Err(ContractViolation::MissingField {
                field: "bulk_delete.uuids",
            }),
            Some(ids) if ids.is_empty() => Err(ContractViolation::InvalidValue {
                field: "bulk_delete.uuids",
                reason: "must contain at least one id",
            }),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResult {
    pub requested: usize,
    pub deleted: usize,
    pub failed: usize,
    pub failed_items: Vec<String>,
}

impl BulkDeleteResult {
    /// `failed_items` keeps the order in which failures were observed.
    pub fn from_failures(requested: usize, failed_items: Vec<String>) -> Self {
        let failed = failed_items.len();
        Self {
            requested,
            deleted: requested.saturating_sub(failed),
            failed,
            failed_items,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractList {
    pub contracts: Vec<Contract>,
    pub total_records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn personal(first: &str, last: &str) -> Personal {
        Personal {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            ..Personal::default()
        }
    }

    #[test]
    fn at_contract_01_id_is_canonicalized() {
        let id = ContractId::new("465CE0B3-10CD-4DA2-8848-DB85B63A0A32").unwrap();
        assert_eq!(id.as_str(), "465ce0b3-10cd-4da2-8848-db85b63a0a32");
        assert!(ContractId::new("not-a-uuid").is_err());
        assert!(ContractId::new("").is_err());
    }

    #[test]
    fn at_contract_02_json_shape_round_trips_unknown_fields() {
        let raw = r#"{
            "id": "465ce0b3-10cd-4da2-8848-db85b63a0a32",
            "status": "TRANSMISSION_ERROR_EDIT",
            "personal": {"firstName": "Max", "lastName": "Mustermann", "zip": "04109"},
            "uniLogin": "mhb76lxa",
            "libraryCard": "79254581",
            "_version": 3,
            "comment": "kept"
        }"#;
        let contract: Contract = serde_json::from_str(raw).unwrap();
        assert_eq!(contract.status, Some(ContractStatus::TransmissionErrorEdit));
        assert_eq!(contract.version, Some(3));
        assert_eq!(contract.uni_login.as_deref(), Some("mhb76lxa"));
        assert_eq!(contract.extra.get("comment"), Some(&Value::from("kept")));

        let back = serde_json::to_value(&contract).unwrap();
        assert_eq!(back["_version"], Value::from(3));
        assert_eq!(back["personal"]["zip"], Value::from("04109"));
        assert_eq!(back["status"], Value::from("TRANSMISSION_ERROR_EDIT"));
    }

    #[test]
    fn at_contract_03_malformed_id_in_body_is_rejected() {
        let raw = r#"{"id": "7890"}"#;
        assert!(serde_json::from_str::<Contract>(raw).is_err());
    }

    #[test]
    fn at_contract_04_unset_status_reads_as_draft() {
        let contract = Contract::default();
        assert_eq!(contract.effective_status(), ContractStatus::Draft);
    }

    #[test]
    fn at_contract_05_personal_names_are_required() {
        let mut contract = Contract {
            personal: Some(Personal::default()),
            ..Contract::default()
        };
        assert!(contract.validate().is_err());
        contract.personal = Some(personal("Max", "  "));
        assert!(contract.validate().is_err());
        contract.personal = Some(personal("Max", "Mustermann"));
        assert!(contract.validate().is_ok());
        contract.personal = None;
        assert_eq!(
            contract.validate(),
            Err(ContractViolation::MissingField {
                field: "contract.personal"
            })
        );
    }

    #[test]
    fn at_contract_06_bulk_delete_request_requires_ids() {
        assert!(BulkDeleteRequest::default().validate().is_err());
        assert!(BulkDeleteRequest {
            uuids: Some(Vec::new())
        }
        .validate()
        .is_err());
        assert!(BulkDeleteRequest {
            uuids: Some(vec!["x".to_string()])
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn at_contract_07_bulk_delete_result_counts() {
        let result = BulkDeleteResult::from_failures(4, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(result.requested, 4);
        assert_eq!(result.deleted, 2);
        assert_eq!(result.failed, 2);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["failedItems"][0], Value::from("c"));
    }

    #[test]
    fn at_contract_08_library_card_length_is_not_limited() {
        let contract = Contract {
            personal: Some(personal("Max", "Mustermann")),
            library_card: Some("7".repeat(256)),
            ..Contract::default()
        };
        assert!(contract.validate().is_ok());
    }
}
