//! Synchronous economy engine: document persistence, ledger navigation,
//! daily price simulation, and balance transactions.

pub mod bank;
pub mod ledger;
pub mod market;
pub mod store;
