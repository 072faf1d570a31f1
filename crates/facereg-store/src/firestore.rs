//! Firestore document backend over the REST v1 API.
//!
//! Each record is a document `{name, orientation, features}` in one
//! collection. Upserts look the key up with a structured query limited to one
//! result and then patch or create; atomicity is whatever Firestore gives a
//! single document write.

use crate::{Backend, RecordStore, StoreError, UpsertOutcome};
use async_trait::async_trait;
use facereg_core::FaceRecord;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE: &str = "(default)";
pub const DEFAULT_COLLECTION: &str = "faces";

const LIST_PAGE_SIZE: u32 = 300;

const FIELD_NAME: &str = "name";
const FIELD_ORIENTATION: &str = "orientation";
const FIELD_FEATURES: &str = "features";

/// Connection settings for the Firestore backend.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub database: String,
    pub collection: String,
    /// API root, e.g. `https://firestore.googleapis.com/v1` or an emulator's
    /// `http://localhost:8080/v1`.
    pub base_url: String,
    /// OAuth2 access token sent as `Authorization: Bearer`.
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            bearer_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Firestore typed value. Only the kinds this store reads or writes are
/// modelled; other kinds deserialize to an empty value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    double_value: Option<f64>,
    /// int64 values travel as decimal strings.
    #[serde(skip_serializing_if = "Option::is_none")]
    integer_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_value: Option<ArrayValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    values: Vec<Value>,
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self {
            string_value: Some(s.into()),
            ..Default::default()
        }
    }

    pub fn double(v: f64) -> Self {
        Self {
            double_value: Some(v),
            ..Default::default()
        }
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self {
            array_value: Some(ArrayValue { values }),
            ..Default::default()
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.string_value.as_deref()
    }

    /// Numeric value, accepting both `doubleValue` and `integerValue`.
    pub fn as_f64(&self) -> Option<f64> {
        self.double_value
            .or_else(|| self.integer_value.as_deref().and_then(|s| s.parse().ok()))
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        self.array_value.as_ref().map(|a| a.values.as_slice())
    }
}

fn features_value(features: &[f32]) -> Value {
    Value::array(features.iter().map(|&f| Value::double(f64::from(f))).collect())
}

/// A Firestore document. `name` is the full resource path.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    fn to_record(&self) -> Result<FaceRecord, StoreError> {
        let malformed = |reason: &str| StoreError::Malformed {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        let name = self
            .fields
            .get(FIELD_NAME)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing string field `name`"))?;
        let orientation = self
            .fields
            .get(FIELD_ORIENTATION)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing string field `orientation`"))?;
        let features = self
            .fields
            .get(FIELD_FEATURES)
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("missing array field `features`"))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| malformed("non-numeric entry in `features`"))?;

        Ok(FaceRecord {
            name: name.to_string(),
            orientation: orientation.to_string(),
            features,
            backend_id: Some(self.name.clone()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

/// One element of a `runQuery` response stream; entries without a document
/// only carry progress metadata.
#[derive(Debug, Deserialize)]
struct QueryResponseItem {
    document: Option<Document>,
}

fn field_equals(field: &str, value: &str) -> serde_json::Value {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": field },
            "op": "EQUAL",
            "value": Value::string(value),
        }
    })
}

fn structured_query(collection: &str, filters: Vec<serde_json::Value>, limit: Option<u32>) -> serde_json::Value {
    let filter = if filters.len() == 1 {
        filters.into_iter().next().unwrap_or_default()
    } else {
        json!({ "compositeFilter": { "op": "AND", "filters": filters } })
    };

    let mut query = json!({
        "from": [{ "collectionId": collection }],
        "where": filter,
    });
    if let Some(limit) = limit {
        query["limit"] = json!(limit);
    }
    json!({ "structuredQuery": query })
}

fn query_documents(items: Vec<QueryResponseItem>) -> Vec<Document> {
    items.into_iter().filter_map(|item| item.document).collect()
}

pub struct FirestoreStore {
    client: reqwest::Client,
    config: FirestoreConfig,
}

impl FirestoreStore {
    /// Build a client without contacting the server.
    pub fn new(config: FirestoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Build a client and verify the collection is reachable with the
    /// configured credentials.
    pub async fn connect(config: FirestoreConfig) -> Result<Self, StoreError> {
        let store = Self::new(config)?;
        store.list_page(Some(1), None).await?;
        Ok(store)
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id,
            self.config.database
        )
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.documents_root(), self.config.collection)
    }

    fn document_url(&self, document_name: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), document_name)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.config.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, operation: &'static str, req: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(operation, status = status.as_u16(), "Firestore request failed");
            return Err(StoreError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, operation: &'static str, req: RequestBuilder) -> Result<T, StoreError> {
        Ok(self.send(operation, req).await?.json::<T>().await?)
    }

    async fn list_page(&self, page_size: Option<u32>, page_token: Option<&str>) -> Result<ListResponse, StoreError> {
        let mut query: Vec<(&str, String)> = vec![("pageSize", page_size.unwrap_or(LIST_PAGE_SIZE).to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let req = self.request(Method::GET, self.collection_url()).query(&query);
        self.send_json("list", req).await
    }

    async fn run_query(&self, filters: Vec<serde_json::Value>, limit: Option<u32>) -> Result<Vec<Document>, StoreError> {
        let body = structured_query(&self.config.collection, filters, limit);
        let req = self
            .request(Method::POST, format!("{}:runQuery", self.documents_root()))
            .json(&body);
        let items: Vec<QueryResponseItem> = self.send_json("runQuery", req).await?;
        Ok(query_documents(items))
    }
}

#[async_trait]
impl RecordStore for FirestoreStore {
    fn backend(&self) -> Backend {
        Backend::Firestore
    }

    async fn read_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(None, page_token.as_deref()).await?;
            for doc in &page.documents {
                match doc.to_record() {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(error = %e, "skipping malformed face document"),
                }
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(records)
    }

    async fn upsert(
        &self,
        name: &str,
        orientation: &str,
        features: &[f32],
    ) -> Result<UpsertOutcome, StoreError> {
        let existing = self
            .run_query(
                vec![field_equals(FIELD_NAME, name), field_equals(FIELD_ORIENTATION, orientation)],
                Some(1),
            )
            .await?;

        match existing.first() {
            Some(doc) => {
                let body = json!({ "fields": { FIELD_FEATURES: features_value(features) } });
                let req = self
                    .request(Method::PATCH, self.document_url(&doc.name))
                    .query(&[("updateMask.fieldPaths", FIELD_FEATURES)])
                    .json(&body);
                self.send("update", req).await?;
                tracing::info!(name, orientation, document = %doc.name, "updated Firestore document");
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let body = json!({
                    "fields": {
                        FIELD_NAME: Value::string(name),
                        FIELD_ORIENTATION: Value::string(orientation),
                        FIELD_FEATURES: features_value(features),
                    }
                });
                let req = self.request(Method::POST, self.collection_url()).json(&body);
                let created: Document = self.send_json("create", req).await?;
                tracing::info!(name, orientation, document = %created.name, "created Firestore document");
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn delete_by_name(&self, name: &str) -> Result<usize, StoreError> {
        let docs = self.run_query(vec![field_equals(FIELD_NAME, name)], None).await?;

        for doc in &docs {
            let req = self.request(Method::DELETE, self.document_url(&doc.name));
            self.send("delete", req).await?;
        }

        tracing::info!(name, deleted = docs.len(), "deleted Firestore documents");
        Ok(docs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: serde_json::Value) -> Document {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_document_to_record() {
        let d = doc(json!({
            "name": "projects/p/databases/(default)/documents/faces/abc",
            "fields": {
                "name": { "stringValue": "alice" },
                "orientation": { "stringValue": "front" },
                "features": { "arrayValue": { "values": [
                    { "doubleValue": 0.5 },
                    { "integerValue": "2" },
                    { "doubleValue": -1.25 }
                ]}}
            },
            "createTime": "2024-01-01T00:00:00Z"
        }));

        let record = d.to_record().unwrap();
        assert_eq!(record.name, "alice");
        assert_eq!(record.orientation, "front");
        assert_eq!(record.features, vec![0.5, 2.0, -1.25]);
        assert_eq!(
            record.backend_id.as_deref(),
            Some("projects/p/databases/(default)/documents/faces/abc")
        );
    }

    #[test]
    fn test_document_missing_features_is_malformed() {
        let d = doc(json!({
            "name": "projects/p/databases/(default)/documents/faces/x",
            "fields": {
                "name": { "stringValue": "bob" },
                "orientation": { "stringValue": "left" }
            }
        }));
        assert!(matches!(d.to_record(), Err(StoreError::Malformed { .. })));
    }

    #[test]
    fn test_document_non_numeric_feature_is_malformed() {
        let d = doc(json!({
            "name": "projects/p/databases/(default)/documents/faces/x",
            "fields": {
                "name": { "stringValue": "bob" },
                "orientation": { "stringValue": "left" },
                "features": { "arrayValue": { "values": [{ "stringValue": "oops" }] } }
            }
        }));
        assert!(matches!(d.to_record(), Err(StoreError::Malformed { .. })));
    }

    #[test]
    fn test_features_value_encoding() {
        let v = serde_json::to_value(features_value(&[0.5, -2.0])).unwrap();
        assert_eq!(
            v,
            json!({ "arrayValue": { "values": [{ "doubleValue": 0.5 }, { "doubleValue": -2.0 }] } })
        );
    }

    #[test]
    fn test_key_query_uses_composite_filter_and_limit() {
        let body = structured_query(
            "faces",
            vec![field_equals("name", "alice"), field_equals("orientation", "front")],
            Some(1),
        );
        let q = &body["structuredQuery"];
        assert_eq!(q["from"][0]["collectionId"], "faces");
        assert_eq!(q["limit"], 1);
        assert_eq!(q["where"]["compositeFilter"]["op"], "AND");
        let filters = q["where"]["compositeFilter"]["filters"].as_array().unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1]["fieldFilter"]["field"]["fieldPath"], "orientation");
        assert_eq!(filters[1]["fieldFilter"]["value"]["stringValue"], "front");
    }

    #[test]
    fn test_name_query_uses_single_filter_without_limit() {
        let body = structured_query("faces", vec![field_equals("name", "alice")], None);
        let q = &body["structuredQuery"];
        assert!(q.get("limit").is_none());
        assert_eq!(q["where"]["fieldFilter"]["op"], "EQUAL");
    }

    #[test]
    fn test_query_response_skips_progress_entries() {
        let items: Vec<QueryResponseItem> = serde_json::from_value(json!([
            { "readTime": "2024-01-01T00:00:00Z" }
        ]))
        .unwrap();
        assert!(query_documents(items).is_empty());

        let items: Vec<QueryResponseItem> = serde_json::from_value(json!([
            { "document": { "name": "projects/p/databases/(default)/documents/faces/a", "fields": {} }, "readTime": "t" },
            { "document": { "name": "projects/p/databases/(default)/documents/faces/b" }, "readTime": "t" }
        ]))
        .unwrap();
        let docs = query_documents(items);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].name, "projects/p/databases/(default)/documents/faces/b");
    }

    #[test]
    fn test_list_response_without_documents() {
        let page: ListResponse = serde_json::from_value(json!({})).unwrap();
        assert!(page.documents.is_empty());
        assert!(page.next_page_token.is_none());
    }

    mod backend {
        use super::*;
        use crate::fake_firestore::{self, face_fields, FakeState};
        use reqwest::StatusCode;

        #[tokio::test]
        async fn test_read_all_follows_page_tokens() {
            let mut state = FakeState {
                max_page_size: Some(2),
                ..Default::default()
            };
            for i in 0..4 {
                state.insert(face_fields(&format!("person-{i}"), "front", &[i as f64]));
            }
            state.insert(json!({ "name": { "stringValue": "broken" } }));
            let (config, shared) = fake_firestore::spawn(state).await;

            let store = FirestoreStore::new(config).unwrap();
            let records = store.read_all().await.unwrap();

            let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["person-0", "person-1", "person-2", "person-3"]);
            assert_eq!(records[3].features, vec![3.0]);
            assert!(records.iter().all(|r| r.backend_id.is_some()));
            assert_eq!(shared.lock().unwrap().count(&Method::GET, "/faces"), 3);
        }

        #[tokio::test]
        async fn test_upsert_patches_existing_and_creates_new() {
            let (config, shared) = fake_firestore::spawn(FakeState::default()).await;
            let store = FirestoreStore::connect(config).await.unwrap();

            assert_eq!(store.upsert("alice", "front", &[1.0, 2.0]).await.unwrap(), UpsertOutcome::Created);
            assert_eq!(store.upsert("alice", "front", &[3.0, 4.0]).await.unwrap(), UpsertOutcome::Updated);
            assert_eq!(store.upsert("alice", "side", &[5.0]).await.unwrap(), UpsertOutcome::Created);

            let records = store.read_all().await.unwrap();
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].orientation, "front");
            assert_eq!(records[0].features, vec![3.0, 4.0]);
            assert_eq!(records[1].orientation, "side");

            let state = shared.lock().unwrap();
            let patches: Vec<_> = state.requests.iter().filter(|r| r.method == Method::PATCH).collect();
            assert_eq!(patches.len(), 1);
            assert_eq!(
                patches[0].query.get("updateMask.fieldPaths").map(String::as_str),
                Some("features")
            );
            assert_eq!(state.count(&Method::POST, "/faces"), 2);
            assert_eq!(state.count(&Method::POST, ":runQuery"), 3);
            // The patch only touched `features`.
            assert_eq!(state.documents[0].1["name"]["stringValue"], "alice");
        }

        #[tokio::test]
        async fn test_delete_by_name_returns_count() {
            let mut state = FakeState::default();
            state.insert(face_fields("alice", "front", &[1.0]));
            state.insert(face_fields("bob", "front", &[2.0]));
            state.insert(face_fields("alice", "side", &[3.0]));
            let (config, shared) = fake_firestore::spawn(state).await;
            let store = FirestoreStore::new(config).unwrap();

            assert_eq!(store.delete_by_name("alice").await.unwrap(), 2);
            assert_eq!(store.delete_by_name("alice").await.unwrap(), 0);

            let records = store.read_all().await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].name, "bob");
            assert_eq!(shared.lock().unwrap().count(&Method::DELETE, ""), 2);
        }

        #[tokio::test]
        async fn test_server_errors_become_status_errors() {
            let (config, _) = fake_firestore::spawn(FakeState {
                fail_with: Some(StatusCode::SERVICE_UNAVAILABLE),
                ..Default::default()
            })
            .await;
            let store = FirestoreStore::new(config).unwrap();

            match store.read_all().await {
                Err(StoreError::Status { operation, status, .. }) => {
                    assert_eq!(operation, "list");
                    assert_eq!(status, 503);
                }
                other => panic!("unexpected: {other:?}"),
            }
            assert!(matches!(
                store.upsert("alice", "front", &[1.0]).await,
                Err(StoreError::Status { operation: "runQuery", status: 503, .. })
            ));
        }

        #[tokio::test]
        async fn test_bearer_token_is_sent() {
            let state = FakeState {
                required_token: Some("secret".into()),
                ..Default::default()
            };
            let (config, _) = fake_firestore::spawn(state).await;

            let anonymous = FirestoreStore::connect(config.clone()).await;
            assert!(matches!(anonymous, Err(StoreError::Status { status: 401, .. })));

            let store = FirestoreStore::connect(FirestoreConfig {
                bearer_token: Some("secret".into()),
                ..config
            })
            .await
            .unwrap();
            assert_eq!(store.upsert("alice", "front", &[1.0]).await.unwrap(), UpsertOutcome::Created);
        }
    }

    #[test]
    fn test_urls() {
        let store = FirestoreStore::new(FirestoreConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..FirestoreConfig::new("demo")
        })
        .unwrap();
        assert_eq!(
            store.collection_url(),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents/faces"
        );
        assert_eq!(
            store.document_url("projects/demo/databases/(default)/documents/faces/abc"),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents/faces/abc"
        );
    }
}
