//! Persisted models owned by the orchestration core

pub mod operation;
pub mod records;
pub mod server;
pub mod status;
