//! Remote execution: SSH sessions, streaming output and multi-host fan-out

pub mod executor;
pub mod fanout;
pub mod session;
pub mod sink;
pub mod ssh;
