#![forbid(unsafe_code)]

pub mod bulk_delete;
pub mod contract_workflow;
pub mod error;
pub mod library_card_sync;

pub use contract_workflow::ContractWorkflow;
pub use error::WorkflowError;
