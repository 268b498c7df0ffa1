//! Local Document Client
//!
//! An in-process document store with CouchDB write semantics (revisions,
//! conflicts, tombstones) and a Mango selector subset. Used for embedded
//! databases and tests; the file flavour persists a JSON snapshot after each write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::selector;
use super::{
    keys, BulkDocsItem, BulkGetDoc, BulkGetResponse, BulkGetResult, ClientResult,
    CreateIndexRequest, CreateIndexResponse, Doc, DocumentClient, FindResponse, MangoQuery,
    PutResponse,
};
use crate::engine::error::ClientError;

/// Current snapshot format version
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Minimum snapshot format version we can read
pub const MIN_FORMAT_VERSION: u32 = 1;

const ENGINE_NAME: &str = "airpouch-local";

pub const NO_INDEX_FOR_SORT: &str = "No index exists for this sort, try indexing by the sort fields.";
pub const NO_MATCHING_INDEX: &str = "No matching index found, create an index to optimize query time.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    rev: String,
    #[serde(default)]
    deleted: bool,
    body: Doc,
}

/// Snapshot persisted by the file flavour
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    engine: String,
    format_version: u32,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    #[serde(default)]
    docs: BTreeMap<String, StoredDoc>,
    #[serde(default)]
    indexes: Vec<CreateIndexRequest>,
}

impl Snapshot {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            engine: ENGINE_NAME.to_string(),
            format_version: CURRENT_FORMAT_VERSION,
            created_at: now,
            modified_at: now,
            docs: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }

    fn load(path: &Path) -> ClientResult<Self> {
        let content = fs::read_to_string(path).map_err(io_error)?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| ClientError::with_status(500, "bad_format", &e.to_string()))?;

        if snapshot.format_version < MIN_FORMAT_VERSION
            || snapshot.format_version > CURRENT_FORMAT_VERSION
        {
            return Err(ClientError::with_status(
                500,
                "bad_format",
                &format!(
                    "Format version {} not supported (min: {}, max: {})",
                    snapshot.format_version, MIN_FORMAT_VERSION, CURRENT_FORMAT_VERSION
                ),
            ));
        }

        Ok(snapshot)
    }

    fn save(&mut self, path: &Path) -> ClientResult<()> {
        self.modified_at = Utc::now();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ClientError::with_status(500, "bad_format", &e.to_string()))?;
        fs::write(path, content).map_err(io_error)?;
        Ok(())
    }
}

pub struct LocalClient {
    name: String,
    path: Option<PathBuf>,
    state: Mutex<Snapshot>,
}

impl LocalClient {
    /// Create a store that lives only as long as this client
    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            state: Mutex::new(Snapshot::new()),
        }
    }

    /// Open (or create) a store persisted at `path`
    pub fn open(path: &Path) -> ClientResult<Self> {
        let snapshot = if path.exists() {
            Snapshot::load(path)?
        } else {
            Snapshot::new()
        };
        debug!(path = %path.display(), docs = snapshot.docs.len(), "opened local store");

        Ok(Self {
            name: path.display().to_string(),
            path: Some(path.to_path_buf()),
            state: Mutex::new(snapshot),
        })
    }

    /// Number of live documents
    pub fn doc_count(&self) -> ClientResult<usize> {
        Ok(self.state()?.docs.values().filter(|d| !d.deleted).count())
    }

    fn state(&self) -> ClientResult<MutexGuard<'_, Snapshot>> {
        self.state
            .lock()
            .map_err(|_| ClientError::with_status(500, "internal", "local store lock poisoned"))
    }

    /// Apply a change; with a backing file the live state only moves once the
    /// changed snapshot is saved
    fn write<T>(&self, apply: impl FnOnce(&mut Snapshot) -> ClientResult<T>) -> ClientResult<T> {
        let mut state = self.state()?;
        let Some(path) = &self.path else {
            return apply(&mut state);
        };

        let mut next = state.clone();
        let out = apply(&mut next)?;
        next.save(path)?;
        *state = next;
        Ok(out)
    }
}

impl DocumentClient for LocalClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, doc: &Doc) -> ClientResult<PutResponse> {
        let (id, rev) = self.write(|state| write_doc(state, doc))?;
        Ok(PutResponse { ok: true, id, rev })
    }

    fn get(&self, id: &str) -> ClientResult<Doc> {
        let state = self.state()?;
        read_doc(&state, id)
    }

    fn remove(&self, id: &str, rev: &str) -> ClientResult<PutResponse> {
        let mut tombstone = Doc::new();
        tombstone.insert(keys::ID.to_string(), Value::String(id.to_string()));
        tombstone.insert(keys::REV.to_string(), Value::String(rev.to_string()));
        tombstone.insert(keys::DELETED.to_string(), Value::Bool(true));

        let (id, rev) = self.write(|state| {
            // existence and tombstone checks come first so a missing doc is 404, not 409
            read_doc(state, id)?;
            write_doc(state, &tombstone)
        })?;
        Ok(PutResponse { ok: true, id, rev })
    }

    fn bulk_docs(&self, docs: &[Doc]) -> ClientResult<Vec<BulkDocsItem>> {
        let results = self.write(|state| {
            Ok(docs
                .iter()
                .map(|doc| match write_doc(state, doc) {
                    Ok((id, rev)) => BulkDocsItem::success(&id, &rev),
                    Err(err) => BulkDocsItem::failure(doc.get(keys::ID).and_then(Value::as_str), &err),
                })
                .collect::<Vec<_>>())
        })?;
        Ok(results)
    }

    fn bulk_get(&self, ids: &[String]) -> ClientResult<BulkGetResponse> {
        let state = self.state()?;
        let results = ids
            .iter()
            .map(|id| {
                let doc = match read_doc(&state, id) {
                    Ok(doc) => BulkGetDoc { ok: Some(doc), error: None },
                    Err(err) => BulkGetDoc { ok: None, error: Some(err) },
                };
                BulkGetResult {
                    id: id.clone(),
                    docs: vec![doc],
                }
            })
            .collect();
        Ok(BulkGetResponse { results })
    }

    fn find(&self, query: &MangoQuery) -> ClientResult<FindResponse> {
        let state = self.state()?;

        if let Some(sort) = query.sort.as_ref().filter(|s| !s.is_empty()) {
            let sorted: Vec<&str> = sort.iter().map(|f| f.field()).collect();
            let covered = state.indexes.iter().any(|index| {
                let fields = index.field_names();
                sorted.iter().all(|f| fields.contains(f))
            });
            if !covered {
                return Err(ClientError::with_status(400, "no_usable_index", NO_INDEX_FOR_SORT));
            }
        }

        let mut docs = Vec::new();
        for (id, stored) in &state.docs {
            if stored.deleted || id.starts_with(keys::DESIGN_PREFIX) {
                continue;
            }
            if selector::matches(&query.selector, &stored.body)? {
                docs.push(with_rev(stored));
            }
        }

        let queried = selector::selector_fields(&query.selector);
        let indexed = state.indexes.iter().any(|index| {
            index
                .field_names()
                .first()
                .map(|first| queried.iter().any(|q| q == first))
                .unwrap_or(false)
        });
        let warning = if indexed {
            None
        } else {
            Some(NO_MATCHING_INDEX.to_string())
        };

        Ok(FindResponse {
            docs: selector::shape(query, docs),
            warning,
            bookmark: None,
        })
    }

    fn create_index(&self, index: &CreateIndexRequest) -> ClientResult<CreateIndexResponse> {
        let name = index.name.clone().unwrap_or_else(|| {
            let fields = index.field_names().join(",");
            format!("idx-{}", &hex::encode(Sha256::digest(fields.as_bytes()))[..16])
        });
        let ddoc = index.ddoc.clone().unwrap_or_else(|| name.clone());
        let id = format!("{}{}", keys::DESIGN_PREFIX, ddoc);

        let exists = self
            .state()?
            .indexes
            .iter()
            .any(|existing| existing.name.as_deref() == Some(name.as_str()));
        if exists {
            warn!(index = %name, "index already present");
            return Ok(CreateIndexResponse {
                result: "exists".to_string(),
                id: Some(id),
                name: Some(name),
            });
        }

        let mut stored = index.clone();
        stored.name = Some(name.clone());
        stored.ddoc = Some(ddoc);
        let created = self.write(|state| {
            // a concurrent caller may have registered it since the check above
            if state.indexes.iter().any(|existing| existing.name == stored.name) {
                return Ok(false);
            }
            state.indexes.push(stored);
            Ok(true)
        })?;

        Ok(CreateIndexResponse {
            result: if created { "created" } else { "exists" }.to_string(),
            id: Some(id),
            name: Some(name),
        })
    }
}

fn write_doc(state: &mut Snapshot, doc: &Doc) -> ClientResult<(String, String)> {
    let id = doc
        .get(keys::ID)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ClientError::with_status(412, "missing_id", "_id is required for puts"))?
        .to_string();
    let given_rev = doc.get(keys::REV).and_then(Value::as_str);
    let deleted = doc.get(keys::DELETED).and_then(Value::as_bool).unwrap_or(false);

    let previous = state.docs.get(&id).map(|p| (p.rev.clone(), p.deleted));
    let conflict = match (&previous, given_rev) {
        (Some((stored, _)), Some(given)) => stored != given,
        (Some((_, was_deleted)), None) => !was_deleted,
        (None, Some(_)) => true,
        (None, None) => false,
    };
    if conflict {
        return Err(ClientError::with_status(409, "conflict", "Document update conflict"));
    }

    let mut body = doc.clone();
    body.remove(keys::REV);
    body.remove(keys::DELETED);

    let rev = next_rev(previous.as_ref().map(|(rev, _)| rev.as_str()), &body, deleted);
    state.docs.insert(
        id.clone(),
        StoredDoc {
            rev: rev.clone(),
            deleted,
            body,
        },
    );
    Ok((id, rev))
}

fn read_doc(state: &Snapshot, id: &str) -> ClientResult<Doc> {
    match state.docs.get(id) {
        None => Err(ClientError::with_status(404, "not_found", "missing")),
        Some(stored) if stored.deleted => Err(ClientError::with_status(404, "not_found", "deleted")),
        Some(stored) => Ok(with_rev(stored)),
    }
}

fn with_rev(stored: &StoredDoc) -> Doc {
    let mut doc = stored.body.clone();
    doc.insert(keys::REV.to_string(), Value::String(stored.rev.clone()));
    doc
}

/// Revision `N-hash`: N counts writes, hash digests the previous revision and new body
fn next_rev(previous: Option<&str>, body: &Doc, deleted: bool) -> String {
    let generation = previous
        .and_then(|rev| rev.split('-').next())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;

    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or("").as_bytes());
    hasher.update(Value::Object(body.clone()).to_string().as_bytes());
    hasher.update([deleted as u8]);
    let digest = hex::encode(hasher.finalize());

    format!("{}-{}", generation, &digest[..32])
}

fn io_error(err: std::io::Error) -> ClientError {
    ClientError::transport("EIO", err.to_string())
}
