//! Document Store Client Layer
//!
//! The call shapes of a CouchDB-compatible document store, independent of transport.
//! `http` talks to a CouchDB server, `local` keeps documents in process (optionally
//! persisted to a JSON file). Both are exposed as plugins through `plugins`.

pub mod http;
pub mod local;
pub mod plugins;
pub mod selector;

pub use http::HttpClient;
pub use local::LocalClient;
pub use plugins::{open_client, register_plugin, ClientPlugin, ClientTarget, HttpPlugin, LocalPlugin};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::error::ClientError;

/// A raw JSON document as stored
pub type Doc = Map<String, Value>;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Reserved document keys
pub mod keys {
    pub const ID: &str = "_id";
    pub const REV: &str = "_rev";
    pub const DELETED: &str = "_deleted";
    pub const TABLE: &str = "??table";
    pub const SEPARATOR: &str = "__";
    pub const DESIGN_PREFIX: &str = "_design/";
}

/// Core client contract implemented by every document-store backend
pub trait DocumentClient: Send + Sync {
    /// Database name as the client sees it (URL for remote stores, path for local ones)
    fn name(&self) -> &str;

    /// Insert or update a single document
    fn put(&self, doc: &Doc) -> ClientResult<PutResponse>;

    /// Fetch a document by its full id
    fn get(&self, id: &str) -> ClientResult<Doc>;

    /// Delete a document at the given revision
    fn remove(&self, id: &str, rev: &str) -> ClientResult<PutResponse>;

    /// Write several documents in one request; results are per item
    fn bulk_docs(&self, docs: &[Doc]) -> ClientResult<Vec<BulkDocsItem>>;

    /// Fetch several documents in one request; results are per item
    fn bulk_get(&self, ids: &[String]) -> ClientResult<BulkGetResponse>;

    /// Run a Mango query
    fn find(&self, query: &MangoQuery) -> ClientResult<FindResponse>;

    /// Create a Mango index
    fn create_index(&self, index: &CreateIndexRequest) -> ClientResult<CreateIndexResponse>;
}

impl std::fmt::Debug for dyn DocumentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentClient").field("name", &self.name()).finish()
    }
}

/// Response to `put` / `remove`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    #[serde(default)]
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

/// One entry of a `bulk_docs` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDocsItem {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkDocsItem {
    pub fn success(id: &str, rev: &str) -> Self {
        Self {
            ok: true,
            id: Some(id.to_string()),
            rev: Some(rev.to_string()),
            ..Default::default()
        }
    }

    pub fn failure(id: Option<&str>, err: &ClientError) -> Self {
        Self {
            ok: false,
            id: id.map(str::to_string),
            error: Some(err.error.clone().unwrap_or_else(|| "error".to_string())),
            reason: Some(err.describe()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkGetResponse {
    pub results: Vec<BulkGetResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkGetResult {
    pub id: String,
    pub docs: Vec<BulkGetDoc>,
}

/// Either the document (`ok`) or the error reported for it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkGetDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<Doc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClientError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A sort or index field: either a bare name or `{ "name": "asc" | "desc" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortField {
    Name(String),
    Directed(BTreeMap<String, SortDirection>),
}

impl SortField {
    pub fn field(&self) -> &str {
        match self {
            SortField::Name(name) => name,
            SortField::Directed(map) => map.keys().next().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn direction(&self) -> SortDirection {
        match self {
            SortField::Name(_) => SortDirection::Asc,
            SortField::Directed(map) => map.values().next().copied().unwrap_or(SortDirection::Asc),
        }
    }
}

impl From<&str> for SortField {
    fn from(name: &str) -> Self {
        SortField::Name(name.to_string())
    }
}

/// Mango query as accepted by `_find`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MangoQuery {
    pub selector: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortField>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
}

impl MangoQuery {
    pub fn new(selector: Value) -> Self {
        Self {
            selector,
            ..Default::default()
        }
    }

    pub fn sort(mut self, field: &str, direction: SortDirection) -> Self {
        let mut entry = BTreeMap::new();
        entry.insert(field.to_string(), direction);
        self.sort.get_or_insert_with(Vec::new).push(SortField::Directed(entry));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindResponse {
    pub docs: Vec<Doc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFields {
    pub fields: Vec<SortField>,
}

/// Body of a `_index` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    pub index: IndexFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddoc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl CreateIndexRequest {
    pub fn field_names(&self) -> Vec<&str> {
        self.index.fields.iter().map(SortField::field).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndexResponse {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_field_shapes() {
        let fields: Vec<SortField> = serde_json::from_value(json!(["name", {"age": "desc"}])).unwrap();
        assert_eq!(fields[0].field(), "name");
        assert_eq!(fields[0].direction(), SortDirection::Asc);
        assert_eq!(fields[1].field(), "age");
        assert_eq!(fields[1].direction(), SortDirection::Desc);
    }

    #[test]
    fn test_bulk_get_doc_parsing() {
        let response: BulkGetResponse = serde_json::from_value(json!({
            "results": [
                {"id": "a", "docs": [{"ok": {"_id": "a", "_rev": "1-x"}}]},
                {"id": "b", "docs": [{"error": {"id": "b", "error": "not_found", "reason": "missing"}}]}
            ]
        }))
        .unwrap();

        assert!(response.results[0].docs[0].ok.is_some());
        let err = response.results[1].docs[0].error.as_ref().unwrap();
        assert_eq!(err.error.as_deref(), Some("not_found"));
        assert_eq!(err.describe(), "missing");
    }
}
