#![forbid(unsafe_code)]

use idmconnect_kernel_contracts::contract::{Contract, ContractId};

use crate::contract_store::StorageError;

/// Typed row interface for the contract table.
///
/// Row methods do not take the per-row lock; callers that need read-modify-write isolation go
/// through `ContractStore::begin_for_update` instead.
pub trait ContractRepo {
    fn insert_contract_row(&self, contract: Contract) -> Result<Contract, StorageError>;

    fn get_contract_row(&self, id: &ContractId) -> Result<Option<Contract>, StorageError>;

    /// Rows in insertion order, plus the total row count before paging.
    fn list_contract_rows(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Contract>, usize), StorageError>;

    /// Full replacement. Returns the affected row count: 0 when the id does not exist.
    /// A present `expected_version` that does not match the stored one is a
    /// `StorageError::VersionConflict`.
    fn update_contract_row(
        &self,
        id: &ContractId,
        contract: Contract,
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError>;

    fn delete_contract_row(&self, id: &ContractId) -> Result<u64, StorageError>;

    fn contract_ids_by_uni_login(&self, uni_login: &str) -> Result<Vec<ContractId>, StorageError>;

    fn contract_row_count(&self) -> Result<usize, StorageError>;
}
