#![forbid(unsafe_code)]

use std::sync::Arc;

use idmconnect_kernel_contracts::contract::BulkDeleteResult;
use idmconnect_storage::ContractStore;
use tokio::task::JoinSet;

/// Deletes every id concurrently and reports the ids that did not go away.
///
/// Status is not checked here: unlike the single delete, any row may be removed.
/// An id counts as failed when the store errors or reports zero rows, so missing and
/// malformed ids land in the same bucket. `failed_items` is in completion order.
pub async fn bulk_delete(store: Arc<ContractStore>, ids: Vec<String>) -> BulkDeleteResult {
    let requested = ids.len();
    let mut tasks = JoinSet::new();
    for raw_id in ids {
        let store = store.clone();
        tasks.spawn(async move {
            let outcome = store.delete_contract(&raw_id).await;
            (raw_id, outcome)
        });
    }

    let mut failed_items = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(1))) => {}
            Ok((raw_id, Ok(rows))) => {
                tracing::debug!(contract_id = %raw_id, rows, "bulk delete item not deleted");
                failed_items.push(raw_id);
            }
            Ok((raw_id, Err(err))) => {
                tracing::error!(contract_id = %raw_id, error = %err, "bulk delete item failed");
                failed_items.push(raw_id);
            }
            Err(err) => {
                // A panicked task loses its id; the count stays right through `requested`.
                tracing::error!(error = %err, "bulk delete task aborted");
                failed_items.push(String::new());
            }
        }
    }

    let result = BulkDeleteResult::from_failures(requested, failed_items);
    tracing::info!(
        requested = result.requested,
        deleted = result.deleted,
        failed = result.failed,
        "bulk delete finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use idmconnect_kernel_contracts::contract::{Contract, ContractId, ContractStatus};
    use idmconnect_storage::ContractRepo;

    use super::*;

    fn seeded(store: &ContractStore, status: ContractStatus) -> String {
        store
            .insert_contract_row(Contract::default().with_status(status))
            .unwrap()
            .id
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn at_bulk_delete_01_mixed_batch_ignores_status() {
        let store = Arc::new(ContractStore::new_in_memory());
        let a = seeded(&store, ContractStatus::Draft);
        let b = seeded(&store, ContractStatus::Pending);
        let c = ContractId::generate().to_string();
        let d = "7890".to_string();

        let result = bulk_delete(store.clone(), vec![a, b, c.clone(), d.clone()]).await;
        assert_eq!(result.requested, 4);
        assert_eq!(result.deleted, 2);
        assert_eq!(result.failed, 2);

        let mut failed = result.failed_items.clone();
        failed.sort();
        let mut expected = vec![c, d];
        expected.sort();
        assert_eq!(failed, expected);
        assert_eq!(store.contract_row_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn at_bulk_delete_02_duplicate_ids_delete_once() {
        let store = Arc::new(ContractStore::new_in_memory());
        let a = seeded(&store, ContractStatus::Activated);

        let result = bulk_delete(store, vec![a.clone(), a.clone()]).await;
        assert_eq!(result.requested, 2);
        assert_eq!(result.deleted, 1);
        assert_eq!(result.failed_items, vec![a]);
    }

    #[tokio::test]
    async fn at_bulk_delete_03_empty_batch_reports_zeroes() {
        let store = Arc::new(ContractStore::new_in_memory());
        let result = bulk_delete(store, Vec::new()).await;
        assert_eq!(result, BulkDeleteResult::default());
    }
}
