pub mod account_controller;
pub mod accounts_storage;
pub mod batch;
pub mod connection_controller;
pub mod contract_subscription;
pub mod engine;
pub mod errors;
pub mod generic_contract;
pub mod models;
pub mod multisig;
pub mod storage_schema;
pub mod token_wallet;
pub mod ton_wallet;

#[cfg(test)]
pub(crate) mod test_utils;
