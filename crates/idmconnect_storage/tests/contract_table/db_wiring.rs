#![forbid(unsafe_code)]

use idmconnect_kernel_contracts::contract::{Contract, ContractId, ContractStatus, Personal};
use idmconnect_storage::{ContractRepo, ContractStore, StorageError};

fn contract(first: &str, last: &str) -> Contract {
    Contract {
        personal: Some(Personal {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            ..Personal::default()
        }),
        ..Contract::default()
    }
}

fn id(raw: &str) -> ContractId {
    ContractId::new(raw).unwrap()
}

#[test]
fn at_contract_db_01_insert_assigns_id_version_and_draft() {
    let s = ContractStore::new_in_memory();

    let stored = s.insert_contract_row(contract("Max", "Mustermann")).unwrap();
    assert!(stored.id.is_some());
    assert_eq!(stored.version, Some(1));
    assert_eq!(stored.status, Some(ContractStatus::Draft));

    let read = s.get_contract_row(stored.id.as_ref().unwrap()).unwrap();
    assert_eq!(read, Some(stored));
}

#[test]
fn at_contract_db_02_insert_keeps_supplied_status_and_id() {
    let s = ContractStore::new_in_memory();
    let wanted = id("066e5034-8403-4e51-99db-8378d3239a14");

    let stored = s
        .insert_contract_row(
            contract("Erika", "Musterfrau")
                .with_id(wanted.clone())
                .with_status(ContractStatus::Pending),
        )
        .unwrap();
    assert_eq!(stored.id, Some(wanted.clone()));
    assert_eq!(stored.status, Some(ContractStatus::Pending));

    let dup = s.insert_contract_row(contract("Erika", "Musterfrau").with_id(wanted));
    assert!(matches!(dup, Err(StorageError::DuplicateKey { .. })));
}

#[test]
fn at_contract_db_03_update_bumps_version_and_rejects_stale_writes() {
    let s = ContractStore::new_in_memory();
    let stored = s.insert_contract_row(contract("Max", "Mustermann")).unwrap();
    let row_id = stored.id.clone().unwrap();

    let rows = s
        .update_contract_row(
            &row_id,
            stored.clone().with_status(ContractStatus::Updated),
            Some(1),
        )
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(
        s.get_contract_row(&row_id).unwrap().unwrap().version,
        Some(2)
    );

    let stale = s.update_contract_row(&row_id, stored, Some(1));
    assert_eq!(
        stale,
        Err(StorageError::VersionConflict {
            table: "contract",
            key: row_id.as_str().to_string(),
            expected: 1,
            actual: 2,
        })
    );
}

#[test]
fn at_contract_db_04_update_of_missing_row_affects_nothing() {
    let s = ContractStore::new_in_memory();
    let rows = s
        .update_contract_row(&ContractId::generate(), contract("Max", "Mustermann"), None)
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(s.contract_row_count().unwrap(), 0);
}

#[test]
fn at_contract_db_05_update_without_version_is_unconditional() {
    let s = ContractStore::new_in_memory();
    let stored = s.insert_contract_row(contract("Max", "Mustermann")).unwrap();
    let row_id = stored.id.clone().unwrap();

    for expected_version in 2..=4 {
        assert_eq!(
            s.update_contract_row(&row_id, contract("Max", "Mustermann"), None)
                .unwrap(),
            1
        );
        assert_eq!(
            s.get_contract_row(&row_id).unwrap().unwrap().version,
            Some(expected_version)
        );
    }
}

#[test]
fn at_contract_db_06_list_is_insertion_ordered_and_paged() {
    let s = ContractStore::new_in_memory();
    let last_names = ["Zeta", "Alpha", "Mu", "Beta"];
    for last in last_names {
        s.insert_contract_row(contract("Max", last)).unwrap();
    }

    let (page, total) = s.list_contract_rows(1, 2).unwrap();
    assert_eq!(total, 4);
    let names: Vec<_> = page
        .iter()
        .map(|c| c.personal.as_ref().unwrap().last_name.clone().unwrap())
        .collect();
    assert_eq!(names, vec!["Alpha".to_string(), "Mu".to_string()]);

    let (empty, total) = s.list_contract_rows(10, 2).unwrap();
    assert!(empty.is_empty());
    assert_eq!(total, 4);
}

#[test]
fn at_contract_db_07_delete_row_reports_rows_affected() {
    let s = ContractStore::new_in_memory();
    let stored = s.insert_contract_row(contract("Max", "Mustermann")).unwrap();
    let row_id = stored.id.unwrap();

    assert_eq!(s.delete_contract_row(&row_id).unwrap(), 1);
    assert_eq!(s.delete_contract_row(&row_id).unwrap(), 0);
    assert_eq!(s.get_contract_row(&row_id).unwrap(), None);
}

#[test]
fn at_contract_db_08_uni_login_lookup_matches_exactly() {
    let s = ContractStore::new_in_memory();
    for uni_login in [Some("mhb76lxa"), Some("MHB76LXA"), None] {
        s.insert_contract_row(Contract {
            uni_login: uni_login.map(str::to_string),
            ..contract("Max", "Mustermann")
        })
        .unwrap();
    }
    assert_eq!(s.contract_ids_by_uni_login("mhb76lxa").unwrap().len(), 1);
    assert!(s.contract_ids_by_uni_login("7890").unwrap().is_empty());
}
