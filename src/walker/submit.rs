// Host-side dispatch loop: prepare_buffers -> dispatch -> readback ->
// post_to_server (spec §5), with fire-and-forget, bounded in-flight
// submissions so a slow server throttles mining instead of blocking it.

use crate::params::HashParams;
use crate::walker::gpu::{DispatchConfig, DpPair, GpuWalker};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

/// Depth of the in-flight submission queue. When full, a dispatch's
/// results are dropped (the worker "skips a submission cycle but
/// continues mining", spec §5) rather than blocking on a slow server.
const IN_FLIGHT_CAPACITY: usize = 8;

const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Serialize)]
struct HexResult {
    start: String,
    dp: String,
}

#[derive(Serialize)]
struct SubmitBody {
    username: String,
    usertoken: String,
    results: Vec<HexResult>,
}

/// Handle to the background submitter task. Dropping it stops submissions
/// once the channel drains.
pub struct Submitter {
    tx: mpsc::Sender<Vec<DpPair>>,
}

impl Submitter {
    /// Spawn the background task that posts batches to `server_url` as
    /// they arrive, retrying `Transient`-looking failures with exponential
    /// backoff and giving up (logging and dropping the batch) on anything
    /// that looks like an auth or client error.
    pub fn spawn(server_url: String, username: String, token: String) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<DpPair>>(IN_FLIGHT_CAPACITY);

        tokio::spawn(async move {
            let client = reqwest::Client::new();
            while let Some(batch) = rx.recv().await {
                if let Err(e) = post_with_retry(&client, &server_url, &username, &token, &batch).await {
                    log::error!("giving up on a batch of {} results: {}", batch.len(), e);
                }
            }
        });

        Self { tx }
    }

    /// Enqueue a batch for submission. Returns `false` (without blocking)
    /// if the in-flight queue is full, in which case the caller should
    /// skip this cycle's submission and keep mining.
    pub fn try_submit(&self, batch: Vec<DpPair>) -> bool {
        if batch.is_empty() {
            return true;
        }
        match self.tx.try_send(batch) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("submission queue full, skipping this dispatch's batch");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

async fn post_with_retry(
    client: &reqwest::Client,
    server_url: &str,
    username: &str,
    token: &str,
    batch: &[DpPair],
) -> Result<(), String> {
    let body = SubmitBody {
        username: username.to_string(),
        usertoken: token.to_string(),
        results: batch
            .iter()
            .map(|p| HexResult {
                start: hex::encode(&p.start),
                dp: hex::encode(&p.dp),
            })
            .collect(),
    };

    let mut backoff = INITIAL_BACKOFF;
    for attempt in 0..=MAX_RETRIES {
        let resp = client
            .post(format!("{}/submit_work", server_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                log::debug!("submitted {} results", batch.len());
                return Ok(());
            }
            Ok(r) if r.status() == reqwest::StatusCode::UNAUTHORIZED => {
                return Err(format!("auth failure, giving up: {}", r.status()));
            }
            Ok(r) if r.status().is_client_error() => {
                return Err(format!("bad request, giving up: {}", r.status()));
            }
            Ok(r) => {
                log::warn!(
                    "transient submission failure ({}), attempt {}/{}",
                    r.status(),
                    attempt + 1,
                    MAX_RETRIES + 1
                );
            }
            Err(e) => {
                log::warn!(
                    "transient submission error ({}), attempt {}/{}",
                    e,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
            }
        }

        if attempt < MAX_RETRIES {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
    Err("exhausted retries".to_string())
}

/// Run a sustained mining session: repeatedly dispatch GPU batches (falling
/// back to the single-chain CPU walker if no GPU is available) and forward
/// emitted `(start, dp)` pairs to the submitter.
pub async fn run_session(
    params: HashParams,
    config: DispatchConfig,
    submitter: Submitter,
    dispatch_limit: Option<u64>,
) -> Result<(), String> {
    match GpuWalker::new(params, config) {
        Ok(mut gpu) => {
            let mut dispatches = 0u64;
            loop {
                let pairs = gpu.dispatch().map_err(|e| e.to_string())?;
                if !pairs.is_empty() {
                    log::info!("dispatch emitted {} distinguished points", pairs.len());
                    submitter.try_submit(pairs);
                }
                dispatches += 1;
                if let Some(limit) = dispatch_limit {
                    if dispatches >= limit {
                        return Ok(());
                    }
                }
            }
        }
        Err(e) => {
            log::warn!("GPU walker unavailable ({}), falling back to CPU", e);
            let mut dispatches = 0u64;
            loop {
                let pair = crate::walker::gpu::walk_one_cpu_fallback(&params);
                submitter.try_submit(vec![pair]);
                dispatches += 1;
                if let Some(limit) = dispatch_limit {
                    if dispatches >= limit {
                        return Ok(());
                    }
                }
            }
        }
    }
}
