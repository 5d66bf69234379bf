// the inbound HTTP adapter: translates requests into calls on the shared
// replica and nothing else. the lock is held only for the call itself;
// responses are serialized after it is released. the outbound direction
// lives in `net`, so this module together with `net::HttpNet` is the whole
// transport and both can be swapped out for in-memory equivalents in tests
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    causal_kv::{DeliveryStatus, Message, Replica, ReplicaNet, Value},
    clock::VectorClock,
};

pub type NodeState<N> = Arc<Mutex<Replica<N>>>;

pub fn app<N: ReplicaNet + Send + 'static>(replica: NodeState<N>) -> Router {
    Router::new()
        .route("/put", post(put::<N>))
        .route("/replicate", post(replicate::<N>))
        .route("/get/:key", get(get_key::<N>))
        .route("/status", get(status::<N>))
        .with_state(replica)
}

fn lock<N>(replica: &NodeState<N>) -> MutexGuard<'_, Replica<N>> {
    match replica.lock() {
        Ok(replica) => replica,
        Err(_) => {
            error!("node state poisoned");
            std::process::abort()
        }
    }
}

// a failed replica call means the causal history is corrupt; in-memory state
// cannot be repaired, so take the node down
fn fatal(err: anyhow::Error) -> Response {
    error!("{err:?}");
    std::process::abort()
}

#[derive(Debug, Deserialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct PutResponse {
    status: &'static str,
    vector_clock: VectorClock,
}

async fn put<N: ReplicaNet + Send + 'static>(
    State(replica): State<NodeState<N>>,
    payload: Result<Json<PutRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let result = lock(&replica).put(request.key, request.value);
    match result {
        Ok(vector_clock) => Json(PutResponse {
            status: "success",
            vector_clock,
        })
        .into_response(),
        Err(err) => fatal(err),
    }
}

#[derive(Debug, Serialize)]
struct ReplicateResponse {
    status: &'static str,
}

async fn replicate<N: ReplicaNet + Send + 'static>(
    State(replica): State<NodeState<N>>,
    payload: Result<Json<Message>, JsonRejection>,
) -> Response {
    let Ok(Json(Message::ReplicatePut(message))) = payload else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let result = lock(&replica).on_replicate(message);
    match result {
        Ok(status) => {
            let status = match status {
                DeliveryStatus::Applied => "applied",
                DeliveryStatus::Buffered => "buffered",
                DeliveryStatus::Discarded => "discarded",
            };
            Json(ReplicateResponse { status }).into_response()
        }
        Err(err) => fatal(err),
    }
}

#[derive(Debug, Serialize)]
struct GetResponse {
    value: Value,
    vector_clock: VectorClock,
}

async fn get_key<N: ReplicaNet + Send + 'static>(
    State(replica): State<NodeState<N>>,
    Path(key): Path<String>,
) -> Response {
    let (value, vector_clock) = lock(&replica).get(&key);
    match value {
        Some(value) => Json(GetResponse {
            value,
            vector_clock,
        })
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn status<N: ReplicaNet + Send + 'static>(State(replica): State<NodeState<N>>) -> Response {
    let status = lock(&replica).status();
    Json(status).into_response()
}
