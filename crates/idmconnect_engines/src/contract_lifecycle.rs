#![forbid(unsafe_code)]

use idmconnect_kernel_contracts::contract::{Contract, ContractStatus};
use idmconnect_kernel_contracts::idm::{IdmOperation, RemoteResult};
use thiserror::Error;

/// Whether a contract has ever reached the IDM system, read off its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// Never transmitted successfully: `DRAFT`, `TRANSMISSION_ERROR`.
    Fresh,
    Existing,
}

impl StatusClass {
    pub fn of(status: ContractStatus) -> Self {
        match status {
            ContractStatus::Draft | ContractStatus::TransmissionError => Self::Fresh,
            ContractStatus::Pending
            | ContractStatus::PendingEdit
            | ContractStatus::TransmissionErrorEdit
            | ContractStatus::Updated
            | ContractStatus::Activated => Self::Existing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Existing => "existing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransmitOutcome {
    Succeeded,
    Failed,
}

impl TransmitOutcome {
    pub fn from_remote(result: &RemoteResult) -> Self {
        if result.is_transmit_success() {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

pub fn transmit_operation(class: StatusClass) -> IdmOperation {
    match class {
        StatusClass::Fresh => IdmOperation::CreateContract,
        StatusClass::Existing => IdmOperation::ReplaceContract,
    }
}

const TRANSITIONS: [(StatusClass, TransmitOutcome, ContractStatus); 4] = [
    (
        StatusClass::Fresh,
        TransmitOutcome::Succeeded,
        ContractStatus::Pending,
    ),
    (
        StatusClass::Fresh,
        TransmitOutcome::Failed,
        ContractStatus::TransmissionError,
    ),
    (
        StatusClass::Existing,
        TransmitOutcome::Succeeded,
        ContractStatus::PendingEdit,
    ),
    (
        StatusClass::Existing,
        TransmitOutcome::Failed,
        ContractStatus::TransmissionErrorEdit,
    ),
];

pub fn next_status(class: StatusClass, outcome: TransmitOutcome) -> ContractStatus {
    TRANSITIONS
        .iter()
        .find(|(c, o, _)| *c == class && *o == outcome)
        .map(|(_, _, next)| *next)
        .unwrap_or(ContractStatus::TransmissionError)
}

/// Everything a transmit decides before the remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitPlan {
    pub status: ContractStatus,
    pub class: StatusClass,
    pub operation: IdmOperation,
}

impl TransmitPlan {
    pub fn next_status(&self, remote: &RemoteResult) -> ContractStatus {
        next_status(self.class, TransmitOutcome::from_remote(remote))
    }
}

pub fn plan_transmit(status: Option<ContractStatus>) -> TransmitPlan {
    let status = status.unwrap_or(ContractStatus::Draft);
    let class = StatusClass::of(status);
    TransmitPlan {
        status,
        class,
        operation: transmit_operation(class),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecyclePolicyError {
    #[error("Not allowed to delete contract with status != draft.")]
    DeleteNotAllowed { status: ContractStatus },

    #[error("Changing libraryCard is not allowed.")]
    LibraryCardImmutable,
}

pub fn ensure_deletable(contract: &Contract) -> Result<(), LifecyclePolicyError> {
    let status = contract.effective_status();
    if status == ContractStatus::Draft {
        Ok(())
    } else {
        Err(LifecyclePolicyError::DeleteNotAllowed { status })
    }
}

pub fn ensure_library_card_unchanged(
    stored: &Contract,
    incoming: &Contract,
) -> Result<(), LifecyclePolicyError> {
    if stored.library_card == incoming.library_card {
        Ok(())
    } else {
        Err(LifecyclePolicyError::LibraryCardImmutable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_lifecycle_01_every_status_has_exactly_one_class() {
        let fresh: Vec<_> = ContractStatus::ALL
            .into_iter()
            .filter(|s| StatusClass::of(*s) == StatusClass::Fresh)
            .collect();
        assert_eq!(
            fresh,
            vec![ContractStatus::Draft, ContractStatus::TransmissionError]
        );
    }

    #[test]
    fn at_lifecycle_02_transition_table_for_all_statuses() {
        for status in ContractStatus::ALL {
            let plan = plan_transmit(Some(status));
            let ok = RemoteResult::new(200, None, "");
            let (expected_ok, expected_fail, op) = match status {
                ContractStatus::Draft | ContractStatus::TransmissionError => (
                    ContractStatus::Pending,
                    ContractStatus::TransmissionError,
                    IdmOperation::CreateContract,
                ),
                _ => (
                    ContractStatus::PendingEdit,
                    ContractStatus::TransmissionErrorEdit,
                    IdmOperation::ReplaceContract,
                ),
            };
            assert_eq!(plan.operation, op, "{}", status.as_str());
            assert_eq!(plan.next_status(&ok), expected_ok, "{}", status.as_str());
            for code in [201, 204, 400, 404, 500, 503] {
                let failed = RemoteResult::new(code, None, "");
                assert_eq!(plan.next_status(&failed), expected_fail);
            }
        }
    }

    #[test]
    fn at_lifecycle_03_unset_status_plans_as_draft() {
        let plan = plan_transmit(None);
        assert_eq!(plan.status, ContractStatus::Draft);
        assert_eq!(plan.class, StatusClass::Fresh);
        assert_eq!(plan.operation, IdmOperation::CreateContract);
    }

    #[test]
    fn at_lifecycle_04_retry_after_error_stays_in_fresh_column() {
        let plan = plan_transmit(Some(ContractStatus::TransmissionError));
        assert_eq!(
            plan.next_status(&RemoteResult::new(200, None, "")),
            ContractStatus::Pending
        );
    }

    #[test]
    fn at_lifecycle_05_delete_only_in_draft() {
        assert!(ensure_deletable(&Contract::default()).is_ok());
        for status in ContractStatus::ALL
            .into_iter()
            .filter(|s| *s != ContractStatus::Draft)
        {
            let err = ensure_deletable(&Contract::default().with_status(status)).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Not allowed to delete contract with status != draft."
            );
        }
    }

    #[test]
    fn at_lifecycle_06_library_card_must_match_stored() {
        let stored = Contract {
            library_card: Some("7890".to_string()),
            ..Contract::default()
        };
        assert!(ensure_library_card_unchanged(&stored, &stored.clone()).is_ok());
        assert_eq!(
            ensure_library_card_unchanged(&stored, &Contract::default()),
            Err(LifecyclePolicyError::LibraryCardImmutable)
        );
    }
}
