//! Audit trail of build and deploy operations

pub mod recorder;

pub use recorder::{AuditRecorder, AuditWorker};
