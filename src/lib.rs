// PRDP collider: distributed search for partial collisions of truncated
// SHA-256 via parallel Pollard-rho with distinguished points.

pub mod cli;
pub mod error;
pub mod finalizer;
pub mod params;
pub mod server;
pub mod walker;

pub use cli::{Cli, CliHandler};
pub use error::CoreError;
pub use params::HashParams;
