#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use idmconnect_kernel_contracts::contract::{Contract, ContractId, TABLE_NAME_CONTRACTS};
use idmconnect_kernel_contracts::ContractViolation;
use thiserror::Error;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use crate::repo::ContractRepo;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },

    #[error("version conflict in {table} for {key}: expected {expected}, stored {actual}")]
    VersionConflict {
        table: &'static str,
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("{table} lock poisoned")]
    LockPoisoned { table: &'static str },

    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
}

#[derive(Debug, Clone)]
struct ContractRow {
    seq: u64,
    contract: Contract,
}

#[derive(Debug, Default)]
struct ContractTable {
    rows: BTreeMap<ContractId, ContractRow>,
    next_seq: u64,
}

/// In-memory contract table with optimistic row versions and per-row async locks.
///
/// The table mutex is only ever held for a single row operation and never across an await.
/// Row locks are held across awaits and serialize read-modify-write sequences on one id.
#[derive(Debug, Default)]
pub struct ContractStore {
    table: Mutex<ContractTable>,
    row_locks: Mutex<BTreeMap<ContractId, Arc<RowMutex<()>>>>,
}

impl ContractStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, ContractTable>, StorageError> {
        self.table.lock().map_err(|_| StorageError::LockPoisoned {
            table: TABLE_NAME_CONTRACTS,
        })
    }

    fn row_lock(&self, id: &ContractId) -> Result<Arc<RowMutex<()>>, StorageError> {
        let mut locks = self.row_locks.lock().map_err(|_| StorageError::LockPoisoned {
            table: "contract.row_locks",
        })?;
        Ok(locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(RowMutex::new(())))
            .clone())
    }

    /// Drops the lock entry for `id` once nobody holds or waits on it and the row is gone.
    /// Entries for live rows stay, so the map is bounded by the row count.
    fn prune_row_lock(&self, id: &ContractId) {
        let Ok(mut locks) = self.row_locks.lock() else {
            return;
        };
        let idle = locks
            .get(id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        let row_absent = self
            .table()
            .map(|table| !table.rows.contains_key(id))
            .unwrap_or(false);
        if idle && row_absent {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn row_lock_count(&self) -> usize {
        self.row_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    /// Locks the row for `id` and reads it. `None` when the row does not exist; the lock is
    /// released immediately in that case.
    pub async fn begin_for_update(
        &self,
        id: &ContractId,
    ) -> Result<Option<ContractTxn<'_>>, StorageError> {
        let row_guard = self.row_lock(id)?.lock_owned().await;
        let Some(snapshot) = self.get_contract_row(id)? else {
            drop(row_guard);
            self.prune_row_lock(id);
            return Ok(None);
        };
        Ok(Some(ContractTxn {
            store: self,
            id: id.clone(),
            snapshot,
            _row_guard: row_guard,
        }))
    }

    /// Deletes by raw id. A malformed id affects no rows, exactly like an absent one.
    pub async fn delete_contract(&self, raw_id: &str) -> Result<u64, StorageError> {
        let Ok(id) = ContractId::new(raw_id) else {
            tracing::debug!(raw_id, "delete skipped for malformed contract id");
            return Ok(0);
        };
        let row_guard = self.row_lock(&id)?.lock_owned().await;
        let rows = self.delete_contract_row(&id);
        drop(row_guard);
        self.prune_row_lock(&id);
        rows
    }

    /// Sets (or clears) `libraryCard` on every row whose `uniLogin` matches. Each row is
    /// patched under its own row lock and gets a new version.
    pub async fn patch_library_card(
        &self,
        uni_login: &str,
        library_card: Option<String>,
    ) -> Result<u64, StorageError> {
        let mut patched = 0u64;
        for id in self.contract_ids_by_uni_login(uni_login)? {
            let Some(mut txn) = self.begin_for_update(&id).await? else {
                continue;
            };
            if txn.snapshot().uni_login.as_deref() != Some(uni_login) {
                continue;
            }
            let mut next = txn.snapshot().clone();
            next.library_card = library_card.clone();
            patched = patched.saturating_add(txn.replace(next)?);
        }
        Ok(patched)
    }
}

impl ContractRepo for ContractStore {
    fn insert_contract_row(&self, mut contract: Contract) -> Result<Contract, StorageError> {
        let mut table = self.table()?;
        let id = contract.id.clone().unwrap_or_else(ContractId::generate);
        if table.rows.contains_key(&id) {
            return Err(StorageError::DuplicateKey {
                table: TABLE_NAME_CONTRACTS,
                key: id.as_str().to_string(),
            });
        }
        contract.id = Some(id.clone());
        contract.status = Some(contract.effective_status());
        contract.version = Some(1);

        let seq = table.next_seq;
        table.next_seq = table.next_seq.saturating_add(1);
        table.rows.insert(
            id,
            ContractRow {
                seq,
                contract: contract.clone(),
            },
        );
        Ok(contract)
    }

    fn get_contract_row(&self, id: &ContractId) -> Result<Option<Contract>, StorageError> {
        Ok(self.table()?.rows.get(id).map(|row| row.contract.clone()))
    }

    fn list_contract_rows(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Contract>, usize), StorageError> {
        let table = self.table()?;
        let mut rows: Vec<&ContractRow> = table.rows.values().collect();
        rows.sort_by_key(|row| row.seq);
        let total = rows.len();
        let page = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| row.contract.clone())
            .collect();
        Ok((page, total))
    }

    fn update_contract_row(
        &self,
        id: &ContractId,
        mut contract: Contract,
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError> {
        let mut table = self.table()?;
        let Some(row) = table.rows.get_mut(id) else {
            return Ok(0);
        };
        let stored_version = row.contract.version.unwrap_or(0);
        if let Some(expected) = expected_version {
            if expected != stored_version {
                return Err(StorageError::VersionConflict {
                    table: TABLE_NAME_CONTRACTS,
                    key: id.as_str().to_string(),
                    expected,
                    actual: stored_version,
                });
            }
        }
        contract.id = Some(id.clone());
        contract.status = Some(contract.effective_status());
        contract.version = Some(stored_version.saturating_add(1));
        row.contract = contract;
        Ok(1)
    }

    fn delete_contract_row(&self, id: &ContractId) -> Result<u64, StorageError> {
        let removed = self.table()?.rows.remove(id);
        Ok(u64::from(removed.is_some()))
    }

    fn contract_ids_by_uni_login(&self, uni_login: &str) -> Result<Vec<ContractId>, StorageError> {
        Ok(self
            .table()?
            .rows
            .iter()
            .filter(|(_, row)| row.contract.uni_login.as_deref() == Some(uni_login))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn contract_row_count(&self) -> Result<usize, StorageError> {
        Ok(self.table()?.rows.len())
    }
}

/// Read-modify-write scope over one locked contract row. Dropping it releases the lock.
#[derive(Debug)]
pub struct ContractTxn<'s> {
    store: &'s ContractStore,
    id: ContractId,
    snapshot: Contract,
    _row_guard: OwnedMutexGuard<()>,
}

impl ContractTxn<'_> {
    pub fn id(&self) -> &ContractId {
        &self.id
    }

    /// The row as read when the lock was taken (or as last written through this scope).
    pub fn snapshot(&self) -> &Contract {
        &self.snapshot
    }

    /// Full replacement checked against the version read under the lock.
    pub fn replace(&mut self, contract: Contract) -> Result<u64, StorageError> {
        let rows = self
            .store
            .update_contract_row(&self.id, contract, self.snapshot.version)?;
        if rows == 1 {
            if let Some(current) = self.store.get_contract_row(&self.id)? {
                self.snapshot = current;
            }
        }
        Ok(rows)
    }

    pub fn delete(self) -> Result<u64, StorageError> {
        let rows = self.store.delete_contract_row(&self.id)?;
        let store = self.store;
        let id = self.id.clone();
        drop(self);
        store.prune_row_lock(&id);
        Ok(rows)
    }
}
