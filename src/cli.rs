// CLI commands (spec §6 CLI surface): create-user, server, mine, finalize.

use crate::error::CoreError;
use crate::params::HashParams;
use crate::server::store::Store;
use crate::walker::{DispatchConfig, Submitter};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "prdp-collider")]
#[command(about = "Distributed search for partial collisions of truncated SHA-256", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Hash-function parameters shared by every subcommand that touches a
/// chain: server, mine, and finalize must all agree on these, the way a
/// worker and a finalizer must agree on a single `HashParams` (spec §3).
#[derive(Args, Debug, Clone, Copy)]
pub struct HashParamsArgs {
    /// Bytes kept from the front of the SHA-256 digest
    #[arg(long, default_value = "8")]
    pub prefix_bytes: u8,
    /// Bytes kept from the back of the SHA-256 digest
    #[arg(long, default_value = "0")]
    pub suffix_bytes: u8,
    /// Leading zero bits required for a state to be a distinguished point
    #[arg(long, default_value = "16")]
    pub dp_bits: u32,
}

impl HashParamsArgs {
    pub fn build(self) -> Result<HashParams, String> {
        HashParams::new(self.prefix_bytes, self.suffix_bytes, self.dp_bits)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a new worker user, printing its bearer token once
    CreateUser {
        /// Username to register
        name: String,
        /// Present for CLI-surface compatibility; credentials are bearer
        /// tokens, not passwords, so this is accepted but unused.
        #[arg(long)]
        password: Option<String>,
        /// Path to the server's sled database
        #[arg(long, default_value = "./prdp.db")]
        db: String,
    },

    /// Start the collision-ingest HTTP server
    Server {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "8080")]
        port: u16,
        #[arg(long, default_value = "./prdp.db")]
        db: String,
        #[command(flatten)]
        hash_params: HashParamsArgs,
    },

    /// Run a mining worker, walking chains and submitting DPs to a server
    Mine {
        /// Registered username
        user: String,
        /// Bearer token for that username
        token: String,
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        #[command(flatten)]
        hash_params: HashParamsArgs,
        /// Stop after this many GPU dispatches (or CPU-fallback cycles);
        /// omit to mine indefinitely
        #[arg(long)]
        dispatch_limit: Option<u64>,
    },

    /// Recover the collision witness from two starts sharing a DP
    Finalize {
        /// Hex-encoded `start_a`
        start_a: String,
        /// Hex-encoded `start_b`
        start_b: String,
        #[command(flatten)]
        hash_params: HashParamsArgs,
    },
}

pub struct CliHandler;

impl CliHandler {
    pub async fn handle(cli: Cli) -> Result<(), String> {
        match cli.command {
            Commands::CreateUser { name, password: _, db } => Self::create_user(&name, &db),
            Commands::Server { host, port, db, hash_params } => {
                let params = hash_params.build()?;
                println!("Starting PRDP collision server on {}:{} (db={})", host, port, db);
                println!(
                    "  prefix_bytes={} suffix_bytes={} dp_bits={}",
                    params.prefix_bytes, params.suffix_bytes, params.dp_bits
                );
                crate::server::serve(&host, port, &db, params).await
            }
            Commands::Mine { user, token, server, hash_params, dispatch_limit } => {
                Self::mine(user, token, server, hash_params, dispatch_limit).await
            }
            Commands::Finalize { start_a, start_b, hash_params } => {
                Self::finalize(&start_a, &start_b, hash_params)
            }
        }
    }

    fn create_user(name: &str, db: &str) -> Result<(), String> {
        let store = Store::open(db)?;
        let token = store.create_user(name)?;
        println!("Created user '{}'", name);
        println!("Token: {}", token);
        println!("(store this token; it is not recoverable from the server)");
        Ok(())
    }

    async fn mine(
        user: String,
        token: String,
        server: String,
        hash_params: HashParamsArgs,
        dispatch_limit: Option<u64>,
    ) -> Result<(), String> {
        let params = hash_params.build()?;
        println!(
            "Mining as '{}' against {} (prefix_bytes={} suffix_bytes={} dp_bits={})",
            user, server, params.prefix_bytes, params.suffix_bytes, params.dp_bits
        );

        let submitter = Submitter::spawn(server, user, token);
        let config = DispatchConfig::default();
        crate::walker::submit::run_session(params, config, submitter, dispatch_limit).await
    }

    fn finalize(start_a_hex: &str, start_b_hex: &str, hash_params: HashParamsArgs) -> Result<(), String> {
        let params = hash_params.build()?;
        let start_a = hex::decode(start_a_hex).map_err(|e| format!("bad start_a hex: {}", e))?;
        let start_b = hex::decode(start_b_hex).map_err(|e| format!("bad start_b hex: {}", e))?;

        let total_bytes = params.total_bytes();
        if start_a.len() != total_bytes || start_b.len() != total_bytes {
            return Err(format!(
                "start values must be {} bytes for this HashParams",
                total_bytes
            ));
        }

        match crate::finalizer::finalize(&start_a, &start_b, &params) {
            Ok((p_a, p_b)) => {
                println!("Collision witness found:");
                println!("  p_a: {}", hex::encode(&p_a));
                println!("  p_b: {}", hex::encode(&p_b));
                println!(
                    "  F(p_a) == F(p_b): {}",
                    hex::encode(crate::walker::kernel::step(&p_a, &params))
                );
                Ok(())
            }
            Err(CoreError::NoCollision) => {
                println!("NoCollision: the two starts share a chain (robin-hood case or identical starts)");
                Err("no collision witness exists for these starts".to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
