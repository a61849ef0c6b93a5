pub mod admin;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod session;
pub mod wal;
