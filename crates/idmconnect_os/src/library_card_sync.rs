#![forbid(unsafe_code)]

use std::sync::Arc;

use idmconnect_storage::ContractStore;
use tokio::task::JoinHandle;

/// Local follow-up for a reader-number call the IDM system accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryCardPatch {
    Register {
        uni_login: String,
        reader_number: Option<String>,
    },
    Remove {
        uni_login: String,
    },
}

impl LibraryCardPatch {
    pub fn uni_login(&self) -> &str {
        match self {
            Self::Register { uni_login, .. } | Self::Remove { uni_login } => uni_login,
        }
    }

    fn library_card(&self) -> Option<String> {
        match self {
            Self::Register { reader_number, .. } => reader_number.clone(),
            Self::Remove { .. } => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Remove { .. } => "remove",
        }
    }
}

/// Runs the patch as its own task. The caller may await the handle or drop it; either way a
/// failure ends up in the log and nowhere else.
pub fn spawn_library_card_sync(
    store: Arc<ContractStore>,
    patch: LibraryCardPatch,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match store
            .patch_library_card(patch.uni_login(), patch.library_card())
            .await
        {
            Ok(patched) => tracing::info!(
                uni_login = patch.uni_login(),
                action = patch.as_str(),
                patched,
                "library card synced"
            ),
            Err(err) => tracing::warn!(
                uni_login = patch.uni_login(),
                action = patch.as_str(),
                error = %err,
                "library card sync failed"
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use idmconnect_kernel_contracts::contract::Contract;
    use idmconnect_storage::ContractRepo;

    use super::*;

    #[tokio::test]
    async fn at_library_card_sync_01_register_then_remove() {
        let store = Arc::new(ContractStore::new_in_memory());
        let stored = store
            .insert_contract_row(Contract {
                uni_login: Some("mhb76lxa".to_string()),
                ..Contract::default()
            })
            .unwrap();
        let id = stored.id.unwrap();

        spawn_library_card_sync(
            store.clone(),
            LibraryCardPatch::Register {
                uni_login: "mhb76lxa".to_string(),
                reader_number: Some("7890".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            store.get_contract_row(&id).unwrap().unwrap().library_card,
            Some("7890".to_string())
        );

        spawn_library_card_sync(
            store.clone(),
            LibraryCardPatch::Remove {
                uni_login: "mhb76lxa".to_string(),
            },
        )
        .await
        .unwrap();
        let row = store.get_contract_row(&id).unwrap().unwrap();
        assert_eq!(row.library_card, None);
        assert_eq!(row.version, Some(3));
    }

    #[tokio::test]
    async fn at_library_card_sync_02_no_match_is_a_quiet_noop() {
        let store = Arc::new(ContractStore::new_in_memory());
        spawn_library_card_sync(
            store.clone(),
            LibraryCardPatch::Remove {
                uni_login: "nobody".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(store.contract_row_count().unwrap(), 0);
    }
}
