//! Deckhand Library
//!
//! Core modules for the deckhand remote orchestration engine.

pub mod app;
pub mod audit;
pub mod authn;
pub mod channel;
pub mod credentials;
pub mod errors;
pub mod filesys;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod remote;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
