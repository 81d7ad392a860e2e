// Collision server (spec §4.2): axum HTTP surface over a sled-backed store.

pub mod app;
pub mod state;
pub mod store;

use crate::params::HashParams;
use state::ServerState;
use std::path::Path;

/// Bind and serve the collision endpoint, mirroring the teacher's
/// `Node::listen` shape: open storage, build the router, run until the
/// process is killed.
pub async fn serve<P: AsRef<Path>>(host: &str, port: u16, db_path: P, params: HashParams) -> Result<(), String> {
    let store = store::Store::open(db_path)?;
    let state = ServerState::new(store, params);
    let router = app::build_router(state);

    let addr = format!("{}:{}", host, port);
    log::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| format!("Server error: {}", e))
}
