pub mod audit_log;
pub mod gate;
pub mod issuer;
pub mod sweeper;
pub mod token_store;
