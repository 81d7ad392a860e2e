// HTTP surface (spec §6): POST /submit_work, GET / (dashboard).

use crate::error::CoreError;
use crate::server::state::ServerState;
use crate::server::store::InsertOutcome;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/submit_work", post(submit_work))
        .route("/", get(dashboard))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub username: String,
    pub usertoken: String,
    #[serde(default)]
    pub results: Vec<ResultItem>,
}

#[derive(Debug, Deserialize)]
pub struct ResultItem {
    pub start: String,
    pub dp: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: String,
}

fn status(msg: impl Into<String>) -> Json<StatusBody> {
    Json(StatusBody { status: msg.into() })
}

/// Map a `CoreError` to the HTTP status/body table in spec §7, so the
/// handler below does no string matching of its own — it only ever
/// constructs `CoreError`s and converts them once, at the boundary.
fn to_response(err: CoreError) -> (StatusCode, Json<StatusBody>) {
    match err {
        CoreError::BadRequest => (StatusCode::BAD_REQUEST, status("bad request")),
        CoreError::InvalidResultFormat => (
            StatusCode::BAD_REQUEST,
            status("invalid result data format"),
        ),
        CoreError::BadHashLength => (StatusCode::BAD_REQUEST, status("bad hash length")),
        CoreError::AuthFailure => (
            StatusCode::UNAUTHORIZED,
            status("bad username and/or usertoken"),
        ),
        CoreError::Transient(_) | CoreError::DpOverflow => {
            (StatusCode::INTERNAL_SERVER_ERROR, status("bad request"))
        }
        // ConfigMismatch and NoCollision never reach this boundary: the
        // former is dropped silently inside the handler, the latter is
        // finalizer-only.
        CoreError::ConfigMismatch | CoreError::NoCollision => {
            (StatusCode::INTERNAL_SERVER_ERROR, status("bad request"))
        }
    }
}

/// Decode and length-check every `{start, dp}` pair before any write
/// happens. A single malformed record fails the whole batch (spec §4.2 /
/// §5: "a request is accepted or rejected whole").
fn decode_batch(
    results: &[ResultItem],
    total_bytes: usize,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError> {
    if results.is_empty() {
        return Err(CoreError::BadRequest);
    }

    let mut decoded = Vec::with_capacity(results.len());
    for item in results {
        // A start/dp that isn't valid hex decodes to zero bytes of the
        // required length, so it's a length violation (spec §7:
        // BadHashLength is "a start/dp that doesn't decode to
        // total_bytes"), not a structural format error — spec §8
        // scenario S5 pins this to "bad hash length".
        let start_bytes = hex::decode(&item.start).map_err(|_| CoreError::BadHashLength)?;
        let dp_bytes = hex::decode(&item.dp).map_err(|_| CoreError::BadHashLength)?;
        if start_bytes.len() != total_bytes || dp_bytes.len() != total_bytes {
            return Err(CoreError::BadHashLength);
        }
        decoded.push((start_bytes, dp_bytes));
    }
    Ok(decoded)
}

async fn submit_work(
    State(state): State<ServerState>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let start_time = Instant::now();

    match handle_submission(&state, &req, start_time) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => to_response(e),
    }
}

fn handle_submission(
    state: &ServerState,
    req: &SubmitRequest,
    start_time: Instant,
) -> Result<Json<StatusBody>, CoreError> {
    // Authenticate first — spec §4.2.
    let authed = state.store.authenticate(&req.username, &req.usertoken).map_err(|e| {
        log::error!("auth lookup failed: {}", e);
        e
    })?;
    if !authed {
        return Err(CoreError::AuthFailure);
    }

    let decoded = decode_batch(&req.results, state.params.total_bytes())?;

    let masks = state.params.dp_masks();
    let now = unix_now();
    let mut inserted = 0u32;

    for (start, dp) in decoded {
        if !crate::params::is_distinguished(&dp, masks) {
            // ConfigMismatch: drop silently, log the offending username
            // for operator review (spec §7 / §9 Open Question (a)).
            log::warn!(
                "dropping dp from '{}' that doesn't satisfy dp_bits={}: {}",
                req.username,
                state.params.dp_bits,
                hex::encode(&dp)
            );
            continue;
        }

        match state.store.submit_dp(&start, &dp, &req.username, now) {
            Ok(InsertOutcome::Inserted) => inserted += 1,
            Ok(InsertOutcome::DuplicateNoop) => {}
            Ok(InsertOutcome::Collision { start_a, start_b }) => {
                // A collision is still a new (non-duplicate) record from
                // this submitter's point of view — it counts toward N
                // (spec §8 scenario S4: "submit {start: s', dp: d} with
                // s' != s -> 200 accepted 1").
                inserted += 1;
                log::info!(
                    "collision detected on dp={}: start_a={} start_b={}",
                    hex::encode(&dp),
                    hex::encode(&start_a),
                    hex::encode(&start_b)
                );
            }
            Err(e) => {
                log::error!("db write failed: {}", e);
                return Err(e);
            }
        }
    }

    let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
    Ok(status(format!(
        "accepted {} results in {:.2}ms",
        inserted, elapsed_ms
    )))
}

async fn dashboard(State(state): State<ServerState>) -> impl IntoResponse {
    let total_dps = state.store.total_dp_count();
    let total_collisions = state.store.total_collision_count();
    let per_user = state.store.per_user_counts().unwrap_or_default();

    let mut rows = String::new();
    for (username, count) in &per_user {
        rows.push_str(&format!("<tr><td>{}</td><td>{}</td></tr>", username, count));
    }

    let body = format!(
        "<html><head><title>PRDP collision server</title></head><body>\
         <h1>Distinguished-point collision search</h1>\
         <p>Total DPs: {total_dps}</p>\
         <p>Total collisions: {total_collisions}</p>\
         <table><tr><th>User</th><th>Submissions</th></tr>{rows}</table>\
         </body></html>"
    );
    Html(body)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::Store;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> (ServerState, String) {
        let store = Store::memory().unwrap();
        let token = store.create_user("alice").unwrap();
        let params = crate::params::HashParams::new(8, 0, 16).unwrap();
        (ServerState::new(store, params), token)
    }

    #[tokio::test]
    async fn rejects_unknown_user() {
        let (state, _token) = test_state();
        let router = build_router(state);

        let body = serde_json::json!({
            "username": "mallory",
            "usertoken": "whatever",
            "results": [{"start": "00", "dp": "00"}],
        });
        let req = Request::builder()
            .method("POST")
            .uri("/submit_work")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_bad_hash_length() {
        // Spec §8 scenario S5: `{start: "zz", ...}` -> 400 "bad hash
        // length". Undecodable hex (or hex of the wrong length) is a
        // BadHashLength violation, not a structural format error.
        let (state, token) = test_state();
        let router = build_router(state);

        let body = serde_json::json!({
            "username": "alice",
            "usertoken": token,
            "results": [{"start": "zzzz", "dp": "00"}],
        });
        let req = Request::builder()
            .method("POST")
            .uri("/submit_work")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body_bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body_json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body_json["status"], "bad hash length");
    }

    #[tokio::test]
    async fn accepts_then_dedupes_then_collides() {
        let (state, token) = test_state();
        let router = build_router(state.clone());

        let dp_bytes = vec![0u8; 8];
        let start_a = hex::encode(vec![1u8; 8]);
        let start_b = hex::encode(vec![2u8; 8]);
        let dp = hex::encode(&dp_bytes);

        let submit = |router: Router, start: String, dp: String, token: String| async move {
            let body = serde_json::json!({
                "username": "alice",
                "usertoken": token,
                "results": [{"start": start, "dp": dp}],
            });
            let req = Request::builder()
                .method("POST")
                .uri("/submit_work")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            router.oneshot(req).await.unwrap()
        };

        let resp = submit(router.clone(), start_a.clone(), dp.clone(), token.clone()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = submit(router.clone(), start_a.clone(), dp.clone(), token.clone()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        // second submission of the identical pair is a no-op, not a new
        // insert; we only assert on status here since reading the body
        // requires draining it, exercised in the dedicated idempotence
        // test in server::store.

        let resp = submit(router.clone(), start_b.clone(), dp.clone(), token.clone()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        // Spec §8 scenario S4: a distinct start on an already-seen dp is a
        // new (non-duplicate) record and must count toward "accepted N",
        // even though it also produces a Collision row.
        let body_bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body_json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert!(body_json["status"].as_str().unwrap().starts_with("accepted 1 "));
        assert_eq!(state.store.total_collision_count(), 1);
    }
}
