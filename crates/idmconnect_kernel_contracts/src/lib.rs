#![forbid(unsafe_code)]

pub mod common;
pub mod contract;
pub mod idm;

pub use common::{ContractViolation, Validate};
