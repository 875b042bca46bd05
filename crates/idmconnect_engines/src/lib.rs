#![forbid(unsafe_code)]

pub mod contract_lifecycle;
pub mod idm_client;
pub mod idm_transport;
