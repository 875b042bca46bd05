#![forbid(unsafe_code)]

use std::sync::Arc;

use idmconnect_engines::contract_lifecycle::{
    ensure_deletable, ensure_library_card_unchanged, plan_transmit,
};
use idmconnect_engines::idm_client::IdmClient;
use idmconnect_kernel_contracts::contract::{
    BulkDeleteRequest, BulkDeleteResult, Contract, ContractId, ContractList, ContractStatus,
};
use idmconnect_kernel_contracts::idm::{ReaderNumberQuery, RemoteResult, SearchQuery};
use idmconnect_kernel_contracts::Validate;
use idmconnect_storage::{ContractRepo, ContractStore, StorageError};
use tokio::task::JoinHandle;

use crate::bulk_delete::bulk_delete;
use crate::error::WorkflowError;
use crate::library_card_sync::{spawn_library_card_sync, LibraryCardPatch};

pub const DEFAULT_LIST_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 1000;

/// Contract use cases over one store and one IDM client.
#[derive(Debug, Clone)]
pub struct ContractWorkflow {
    store: Arc<ContractStore>,
    client: IdmClient,
}

/// Reader-number call result plus the handle of the library-card follow-up, when one was started.
#[derive(Debug)]
pub struct ReaderNumberOutcome {
    pub remote: RemoteResult,
    pub sync: Option<JoinHandle<()>>,
}

fn parse_id(raw_id: &str) -> Result<ContractId, WorkflowError> {
    ContractId::new(raw_id).map_err(|_| WorkflowError::not_found(raw_id))
}

impl ContractWorkflow {
    pub fn new(store: Arc<ContractStore>, client: IdmClient) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &Arc<ContractStore> {
        &self.store
    }

    pub fn client(&self) -> &IdmClient {
        &self.client
    }

    /// Stores a new contract. Any caller-supplied id, version or status is discarded.
    pub fn create(&self, mut contract: Contract) -> Result<Contract, WorkflowError> {
        contract.validate()?;
        contract.id = None;
        contract.version = None;
        contract.status = Some(ContractStatus::Draft);
        let stored = self.store.insert_contract_row(contract)?;
        tracing::info!(
            contract_id = stored.id.as_ref().map(ContractId::as_str).unwrap_or_default(),
            "contract created"
        );
        Ok(stored)
    }

    pub fn get(&self, raw_id: &str) -> Result<Contract, WorkflowError> {
        let id = parse_id(raw_id)?;
        self.store
            .get_contract_row(&id)?
            .ok_or_else(|| WorkflowError::not_found(raw_id))
    }

    pub fn list(
        &self,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<ContractList, WorkflowError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let (contracts, total_records) = self
            .store
            .list_contract_rows(offset.unwrap_or(0), limit)?;
        Ok(ContractList {
            contracts,
            total_records,
        })
    }

    /// Full replacement through the edit path.
    ///
    /// Checked in order: payload validity, existence, unchanged `libraryCard`, then `_version`
    /// when the payload carries one. A payload without a status keeps the stored status.
    pub async fn replace(&self, raw_id: &str, incoming: Contract) -> Result<(), WorkflowError> {
        incoming.validate()?;
        let id = parse_id(raw_id)?;
        let Some(mut txn) = self.store.begin_for_update(&id).await? else {
            return Err(WorkflowError::not_found(raw_id));
        };
        ensure_library_card_unchanged(txn.snapshot(), &incoming)?;
        let stored_version = txn.snapshot().version.unwrap_or(0);
        if let Some(expected) = incoming.version {
            if expected != stored_version {
                return Err(WorkflowError::VersionConflict {
                    id: id.to_string(),
                    expected,
                    actual: stored_version,
                });
            }
        }

        let status = incoming.status.unwrap_or(txn.snapshot().effective_status());
        let next = incoming.with_id(id.clone()).with_status(status);
        let rows = txn.replace(next)?;
        WorkflowError::rows_affected(id.as_str(), rows)
    }

    /// Single-item delete: only a `DRAFT` contract may go.
    pub async fn delete(&self, raw_id: &str) -> Result<(), WorkflowError> {
        let id = parse_id(raw_id)?;
        let Some(txn) = self.store.begin_for_update(&id).await? else {
            return Err(WorkflowError::not_found(raw_id));
        };
        ensure_deletable(txn.snapshot())?;
        let rows = txn
            .delete()
            .map_err(|err| WorkflowError::store_inconsistency(id.as_str(), err.to_string()))?;
        WorkflowError::rows_affected(id.as_str(), rows)?;
        tracing::info!(contract_id = id.as_str(), "contract deleted");
        Ok(())
    }

    pub async fn bulk_delete(
        &self,
        request: BulkDeleteRequest,
    ) -> Result<BulkDeleteResult, WorkflowError> {
        request.validate()?;
        let ids = request.uuids.unwrap_or_default();
        Ok(bulk_delete(self.store.clone(), ids).await)
    }

    /// Sends the contract to the IDM system and records the outcome in its status.
    ///
    /// The row lock is held from the read through the remote call to the status write, so two
    /// transmits of one contract never overlap. The remote outcome is returned only once the new
    /// status is stored. The whole unit runs as its own task: dropping the returned future (a
    /// client hanging up) does not abandon a remote call that already went out.
    pub async fn transmit(&self, raw_id: &str) -> Result<RemoteResult, WorkflowError> {
        let id = parse_id(raw_id)?;
        let unit = tokio::spawn(transmit_unit(
            self.store.clone(),
            self.client.clone(),
            id.clone(),
            raw_id.to_string(),
        ));
        unit.await.map_err(|err| {
            WorkflowError::store_inconsistency(id.as_str(), format!("transmit task failed: {err}"))
        })?
    }

    pub async fn search(&self, query: SearchQuery) -> RemoteResult {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.search(&query))
            .await
            .unwrap_or_else(|err| RemoteResult::synthetic_failure(err.to_string()))
    }

    /// Registers a reader number remotely; on 2xx the matching contracts get it as `libraryCard`.
    pub async fn register_reader_number(&self, query: ReaderNumberQuery) -> ReaderNumberOutcome {
        let client = self.client.clone();
        let sent = query.clone();
        let remote = tokio::task::spawn_blocking(move || client.post_reader_number(&sent))
            .await
            .unwrap_or_else(|err| RemoteResult::synthetic_failure(err.to_string()));
        let sync = match (remote.is_2xx(), query.unilogin) {
            (true, Some(uni_login)) => Some(spawn_library_card_sync(
                self.store.clone(),
                LibraryCardPatch::Register {
                    uni_login,
                    reader_number: query.reader_number,
                },
            )),
            _ => None,
        };
        ReaderNumberOutcome { remote, sync }
    }

    /// Removes a reader number remotely; on 2xx the matching contracts lose their `libraryCard`.
    pub async fn remove_reader_number(&self, uni_login: Option<String>) -> ReaderNumberOutcome {
        let client = self.client.clone();
        let sent = uni_login.clone();
        let remote =
            tokio::task::spawn_blocking(move || client.delete_reader_number(sent.as_deref()))
                .await
                .unwrap_or_else(|err| RemoteResult::synthetic_failure(err.to_string()));
        let sync = match (remote.is_2xx(), uni_login) {
            (true, Some(uni_login)) => Some(spawn_library_card_sync(
                self.store.clone(),
                LibraryCardPatch::Remove { uni_login },
            )),
            _ => None,
        };
        ReaderNumberOutcome { remote, sync }
    }
}

/// One transmit, start to finish, under the row lock.
async fn transmit_unit(
    store: Arc<ContractStore>,
    client: IdmClient,
    id: ContractId,
    raw_id: String,
) -> Result<RemoteResult, WorkflowError> {
    let Some(mut txn) = store.begin_for_update(&id).await? else {
        return Err(WorkflowError::not_found(raw_id));
    };

    let plan = plan_transmit(txn.snapshot().status);
    let outbound = txn.snapshot().clone().with_status(plan.status);
    let remote = tokio::task::spawn_blocking(move || client.transmit(plan.operation, &outbound))
        .await
        .unwrap_or_else(|err| RemoteResult::synthetic_failure(err.to_string()));

    let next_status = plan.next_status(&remote);
    tracing::info!(
        contract_id = id.as_str(),
        class = plan.class.as_str(),
        operation = plan.operation.as_str(),
        remote_status = remote.status_code,
        from = plan.status.as_str(),
        to = next_status.as_str(),
        "contract transmitted"
    );

    let next = txn.snapshot().clone().with_status(next_status);
    let rows = txn.replace(next).map_err(|err| match err {
        StorageError::VersionConflict { .. } => WorkflowError::store_inconsistency(
            id.as_str(),
            format!("transmit status write lost a race: {err}"),
        ),
        other => WorkflowError::store_inconsistency(id.as_str(), other.to_string()),
    })?;
    WorkflowError::rows_affected(id.as_str(), rows)?;
    Ok(remote)
}
