// Shared application state for the axum router.

use crate::params::HashParams;
use crate::server::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<Store>,
    pub params: HashParams,
}

impl ServerState {
    pub fn new(store: Store, params: HashParams) -> Self {
        Self {
            store: Arc::new(store),
            params,
        }
    }
}
