#![forbid(unsafe_code)]

pub mod contract_store;
pub mod repo;

pub use contract_store::{ContractStore, ContractTxn, StorageError};
pub use repo::ContractRepo;
