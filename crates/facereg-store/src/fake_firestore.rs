//! In-process stand-in for the Firestore REST routes the store calls.
//!
//! Serves list (with server-side page capping), `runQuery`, create, patch and
//! delete over a `Vec` of documents, and records every request it sees.

use crate::FirestoreConfig;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROJECT: &str = "demo";
const STAMP: &str = "2024-01-01T00:00:00Z";

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    /// `(full document name, fields)` in insertion order.
    pub documents: Vec<(String, Value)>,
    pub requests: Vec<SeenRequest>,
    /// Upper bound on list page size, regardless of what the client asks for.
    pub max_page_size: Option<usize>,
    /// Require `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
    /// Answer every request with this status.
    pub fail_with: Option<StatusCode>,
    pub next_id: usize,
}

impl FakeState {
    pub fn insert(&mut self, fields: Value) -> String {
        self.next_id += 1;
        let name = format!(
            "projects/{PROJECT}/databases/(default)/documents/faces/doc{}",
            self.next_id
        );
        self.documents.push((name.clone(), fields));
        name
    }

    pub fn count(&self, method: &Method, path_suffix: &str) -> usize {
        self.requests
            .iter()
            .filter(|r| r.method == *method && r.path.ends_with(path_suffix))
            .count()
    }
}

pub type SharedState = Arc<Mutex<FakeState>>;

pub fn face_fields(name: &str, orientation: &str, features: &[f64]) -> Value {
    let values: Vec<Value> = features.iter().map(|f| json!({ "doubleValue": f })).collect();
    json!({
        "name": { "stringValue": name },
        "orientation": { "stringValue": orientation },
        "features": { "arrayValue": { "values": values } },
    })
}

/// Serve `state` on an ephemeral local port and return a config pointing at it.
pub async fn spawn(state: FakeState) -> (FirestoreConfig, SharedState) {
    let shared = Arc::new(Mutex::new(state));
    let app = Router::new().fallback(handle).with_state(Arc::clone(&shared));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = FirestoreConfig {
        base_url: format!("http://{addr}/v1"),
        timeout: Duration::from_secs(5),
        ..FirestoreConfig::new(PROJECT)
    };
    (config, shared)
}

fn document(name: &str, fields: &Value) -> Value {
    json!({ "name": name, "fields": fields, "createTime": STAMP, "updateTime": STAMP })
}

async fn handle(
    State(shared): State<SharedState>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = shared.lock().unwrap();
    let path = uri.path().to_string();
    state.requests.push(SeenRequest {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
    });

    if let Some(status) = state.fail_with {
        return (status, Json(json!({ "error": { "code": status.as_u16(), "message": "unavailable" } })))
            .into_response();
    }
    if let Some(token) = &state.required_token {
        let expected = format!("Bearer {token}");
        if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": { "code": 401, "status": "UNAUTHENTICATED" } })),
            )
                .into_response();
        }
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let root = format!("/v1/projects/{PROJECT}/databases/(default)/documents");
    let collection = format!("{root}/faces");

    if method == Method::POST && path == format!("{root}:runQuery") {
        return Json(run_query(&state, &body)).into_response();
    }
    if path == collection {
        if method == Method::GET {
            return Json(list(&state, &query)).into_response();
        }
        if method == Method::POST {
            let name = state.insert(body["fields"].clone());
            return Json(document(&name, &body["fields"])).into_response();
        }
    }
    if path.starts_with(&format!("{collection}/")) {
        let name = path.trim_start_matches("/v1/");
        let Some(pos) = state.documents.iter().position(|(n, _)| n == name) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if method == Method::PATCH {
            if let Some(mask) = query.get("updateMask.fieldPaths") {
                state.documents[pos].1[mask.as_str()] = body["fields"][mask.as_str()].clone();
            }
            let (name, fields) = &state.documents[pos];
            return Json(document(name, fields)).into_response();
        }
        if method == Method::DELETE {
            state.documents.remove(pos);
            return Json(json!({})).into_response();
        }
    }

    StatusCode::NOT_FOUND.into_response()
}

fn list(state: &FakeState, query: &HashMap<String, String>) -> Value {
    let requested: usize = query.get("pageSize").and_then(|s| s.parse().ok()).unwrap_or(300);
    let page = state.max_page_size.map_or(requested, |max| max.min(requested));
    let offset: usize = query.get("pageToken").and_then(|s| s.parse().ok()).unwrap_or(0);

    let docs: Vec<Value> = state
        .documents
        .iter()
        .skip(offset)
        .take(page)
        .map(|(name, fields)| document(name, fields))
        .collect();

    let mut out = json!({});
    if !docs.is_empty() {
        out["documents"] = json!(docs);
    }
    if offset + page < state.documents.len() {
        out["nextPageToken"] = json!((offset + page).to_string());
    }
    out
}

/// Equality filters on string fields, ANDed, with an optional limit.
fn run_query(state: &FakeState, body: &Value) -> Value {
    let query = &body["structuredQuery"];
    let filter = &query["where"];
    let filters: Vec<&Value> = match filter["compositeFilter"]["filters"].as_array() {
        Some(filters) => filters.iter().collect(),
        None => vec![filter],
    };
    let wanted: Vec<(&str, &str)> = filters
        .iter()
        .map(|f| {
            (
                f["fieldFilter"]["field"]["fieldPath"].as_str().unwrap_or_default(),
                f["fieldFilter"]["value"]["stringValue"].as_str().unwrap_or_default(),
            )
        })
        .collect();
    let limit = query["limit"].as_u64().map_or(usize::MAX, |l| l as usize);

    let hits: Vec<Value> = state
        .documents
        .iter()
        .filter(|(_, fields)| {
            wanted
                .iter()
                .all(|(field, value)| fields[*field]["stringValue"].as_str() == Some(*value))
        })
        .take(limit)
        .map(|(name, fields)| json!({ "document": document(name, fields), "readTime": STAMP }))
        .collect();

    if hits.is_empty() {
        json!([{ "readTime": STAMP }])
    } else {
        json!(hits)
    }
}
