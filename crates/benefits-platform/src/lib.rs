pub mod config;
pub mod contracts;
pub mod db;
mod ledger_store;
pub mod redis_bus;
mod workflow_store;

pub use config::ServiceConfig;
pub use contracts::{
    CancelRequest, DecideRequest, RecordPaymentRequest, RecordPaymentResponse, RefreshRequest,
    RefreshResponse,
};
pub use db::{PgBenefitsStore, PgTx, connect_database};
pub use redis_bus::RedisBus;
