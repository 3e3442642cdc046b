//! Build and deploy jobs

pub mod commands;
pub mod controller;
pub mod fsm;
pub mod validate;

pub use controller::{JobController, JobError, JobOutcome};
