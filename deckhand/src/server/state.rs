//! Server state

use std::sync::Arc;

use crate::authn::user_token::TokenKeys;
use crate::channel::LiveChannel;
use crate::store::Store;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub channel: Arc<LiveChannel>,
    pub token_keys: Arc<TokenKeys>,
}

impl ServerState {
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<LiveChannel>,
        token_keys: Arc<TokenKeys>,
    ) -> Self {
        Self {
            store,
            channel,
            token_keys,
        }
    }
}
