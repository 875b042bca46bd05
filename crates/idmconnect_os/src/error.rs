#![forbid(unsafe_code)]

use idmconnect_engines::contract_lifecycle::LifecyclePolicyError;
use idmconnect_kernel_contracts::ContractViolation;
use idmconnect_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Contract not found: {id}")]
    NotFound { id: String },

    #[error("{0}")]
    PolicyViolation(#[from] LifecyclePolicyError),

    #[error("{0}")]
    Validation(#[from] ContractViolation),

    #[error("Version conflict for contract {id}: expected {expected}, stored {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    /// A write that passed every check did not land. Always a bug or a lost race.
    #[error("{0}")]
    StoreInconsistency(String),
}

impl WorkflowError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Logs at error severity; only unexpected failures come through here.
    pub(crate) fn store_inconsistency(id: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!(contract_id = id, detail = %detail, "contract store inconsistency");
        Self::StoreInconsistency(detail)
    }

    pub(crate) fn rows_affected(id: &str, rows: u64) -> Result<(), Self> {
        if rows == 1 {
            Ok(())
        } else {
            Err(Self::store_inconsistency(
                id,
                format!("expected 1 row affected for contract {id}, got {rows}"),
            ))
        }
    }
}

impl From<StorageError> for WorkflowError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VersionConflict {
                key,
                expected,
                actual,
                ..
            } => Self::VersionConflict {
                id: key,
                expected,
                actual,
            },
            StorageError::ContractViolation(violation) => Self::Validation(violation),
            other @ (StorageError::DuplicateKey { .. } | StorageError::LockPoisoned { .. }) => {
                Self::store_inconsistency("-", other.to_string())
            }
        }
    }
}
