//! Remote host records

use serde::{Deserialize, Serialize};

fn default_ssh_port() -> u16 {
    22
}

/// A host jobs can be dispatched to. `secret` holds the encrypted password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    pub public_ip: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    pub secret: String,
}
