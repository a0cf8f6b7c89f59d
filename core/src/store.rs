//! Vector store: a persistent collection of `(id, vector, payload)` points
//! backed by a Qdrant instance.
//!
//! The `MAG_CHROMA_PERSIST_DIR` / `MAG_CHROMA_COLLECTION_NAME` env var names
//! are a historical carry-over from this project's ChromaDB-era predecessor;
//! the engine underneath is Qdrant, reached over gRPC at `MAG_QDRANT_URL`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use qdrant_client::qdrant::{
    vectors_config::Config as VectorsConfigKind, Condition, CollectionInfo, CreateCollectionBuilder,
    DeletePointsBuilder, Distance, Filter, GetPointsBuilder, PointStruct, PointsIdsList,
    ScrollPointsBuilder, SearchPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::types::{chunk_id as compute_chunk_id, point_uuid, StoreHit, StoredPayload};

/// Equality filter used by `search`, `scroll`, and `delete_by_file`.
#[derive(Debug, Clone, Default)]
pub struct WhereFilter(pub BTreeMap<String, String>);

impl WhereFilter {
    pub fn new() -> Self {
        WhereFilter(BTreeMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    fn to_qdrant(&self) -> Option<Filter> {
        if self.0.is_empty() {
            return None;
        }
        let conditions: Vec<Condition> = self
            .0
            .iter()
            .map(|(k, v)| Condition::matches(k.clone(), v.clone()))
            .collect();
        Some(Filter::must(conditions))
    }
}

/// Sampled aggregate statistics over the store.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub unique_files_sampled: usize,
    pub code_types: Vec<String>,
    pub vector_db_size_mb: f64,
}

/// Qdrant-backed vector store. All mutating operations serialize on a
/// single process-wide reentrant mutex; reads are lock-free.
pub struct VectorStore {
    client: Qdrant,
    collection: String,
    vector_size: Arc<Mutex<Option<u64>>>,
    write_lock: Mutex<()>,
    /// Retained only to report `vector_db_size_mb` in stats; the `qdrant-client`
    /// crate talks to a running Qdrant instance over gRPC, it has no embedded
    /// storage mode, so `persist_dir` is no longer where data actually lives
    /// (unlike the ChromaDB-era Python predecessor). See DESIGN.md.
    persist_dir: Option<std::path::PathBuf>,
}

impl VectorStore {
    /// Connect to a Qdrant instance at `url`, using `collection` as the
    /// working collection name. `persist_dir`, if given, is only consulted to
    /// report on-disk size in `stats()`.
    pub async fn open(url: &str, persist_dir: Option<&Path>, collection: impl Into<String>) -> Result<Self> {
        if let Some(dir) = persist_dir {
            std::fs::create_dir_all(dir).map_err(|e| CoreError::Store(format!("failed to create store dir: {e}")))?;
        }
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| CoreError::Store(format!("failed to connect to vector store: {e}")))?;

        let store = VectorStore {
            client,
            collection: collection.into(),
            vector_size: Arc::new(Mutex::new(None)),
            write_lock: Mutex::new(()),
            persist_dir: persist_dir.map(|p| p.to_path_buf()),
        };
        Ok(store)
    }

    async fn ensure_collection(&self, dim: u64) -> Result<()> {
        let mut known = self.vector_size.lock().await;
        if *known == Some(dim) {
            return Ok(());
        }

        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| CoreError::Store(format!("collection_exists failed: {e}")))?;

        if exists {
            let actual_dim = if known.is_none() {
                // Collection pre-exists from a prior process: ask Qdrant what
                // it was actually created with rather than trusting `dim`.
                let info = self
                    .client
                    .collection_info(&self.collection)
                    .await
                    .map_err(|e| CoreError::Store(format!("collection_info failed: {e}")))?;
                info.result.as_ref().and_then(collection_vector_size)
            } else {
                *known
            };

            if actual_dim == Some(dim) {
                *known = Some(dim);
                return Ok(());
            }
            // Dimension mismatch against what's actually stored: recreate.
            self.client
                .delete_collection(&self.collection)
                .await
                .map_err(|e| CoreError::Store(format!("delete_collection failed: {e}")))?;
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
            )
            .await
            .map_err(|e| CoreError::Store(format!("create_collection failed: {e}")))?;
        *known = Some(dim);
        Ok(())
    }

    /// Point lookup by chunk id, or `None` if the collection or the point
    /// doesn't exist.
    pub async fn retrieve(&self, id: &str) -> Result<Option<StoreHit>> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .unwrap_or(false);
        if !exists {
            return Ok(None);
        }

        let point_id: qdrant_client::qdrant::PointId = point_uuid(id).to_string().into();
        let result = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, vec![point_id]).with_payload(true))
            .await
            .map_err(|e| CoreError::Store(format!("retrieve failed: {e}")))?;

        let Some(point) = result.result.into_iter().next() else {
            return Ok(None);
        };
        let metadata = payload_to_map(point.payload);
        let document = metadata.get("document").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let original_id = metadata
            .get("_original_id")
            .and_then(|v| v.as_str())
            .unwrap_or(id)
            .to_string();
        Ok(Some(StoreHit { id: original_id, document, metadata, score: 1.0 }))
    }

    /// Merge `metadata` into the stored payload for `id`. Qdrant's
    /// `set_payload` merges the given keys into the existing payload rather
    /// than replacing it wholesale, so `document`/`_original_id` survive
    /// untouched. No-op if the point doesn't exist.
    pub async fn update_metadata(&self, id: &str, metadata: BTreeMap<String, serde_json::Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let point_id: qdrant_client::qdrant::PointId = point_uuid(id).to_string().into();

        let json = serde_json::to_value(&metadata)
            .map_err(|e| CoreError::Store(format!("failed to serialize metadata: {e}")))?;
        let payload = Payload::try_from(json)
            .map_err(|e| CoreError::Store(format!("failed to build qdrant payload: {e}")))?;

        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(&self.collection, payload)
                    .points(PointsIdsList { ids: vec![point_id] }),
            )
            .await
            .map_err(|e| CoreError::Store(format!("update_metadata failed: {e}")))?;
        Ok(())
    }

    /// Insert or replace points for a single file in one batch.
    pub async fn upsert(&self, payloads: &[(String, Vec<f32>, StoredPayload)]) -> Result<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        let dim = payloads[0].1.len() as u64;
        self.ensure_collection(dim).await?;

        let _guard = self.write_lock.lock().await;
        let points: Result<Vec<PointStruct>> = payloads
            .iter()
            .map(|(chunk_id, vector, payload)| to_point_struct(chunk_id, vector, payload))
            .collect();
        let points = points?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await
            .map_err(|e| CoreError::Store(format!("upsert failed: {e}")))?;
        Ok(())
    }

    /// Cosine-similarity search, optionally filtered by metadata equality.
    pub async fn search(&self, query_vec: Vec<f32>, k: u64, filter: &WhereFilter) -> Result<Vec<StoreHit>> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .unwrap_or(false);
        if !exists {
            return Ok(Vec::new());
        }

        let mut builder = SearchPointsBuilder::new(&self.collection, query_vec, k).with_payload(true);
        if let Some(f) = filter.to_qdrant() {
            builder = builder.filter(f);
        }

        let result = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| CoreError::Store(format!("search failed: {e}")))?;

        Ok(result
            .result
            .into_iter()
            .map(|scored| {
                let metadata = payload_to_map(scored.payload.clone());
                let document = metadata
                    .get("document")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let id = metadata
                    .get("_original_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                StoreHit {
                    id,
                    document,
                    metadata,
                    score: scored.score,
                }
            })
            .collect())
    }

    /// Retrieve all points whose `file` payload field equals `file`.
    pub async fn scroll_by_file(&self, file: &str, limit: u32) -> Result<Vec<StoreHit>> {
        let filter = WhereFilter::new().with("file", file).to_qdrant();
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .unwrap_or(false);
        if !exists {
            return Ok(Vec::new());
        }

        let mut builder = ScrollPointsBuilder::new(&self.collection).with_payload(true).limit(limit);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }

        let result = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| CoreError::Store(format!("scroll failed: {e}")))?;

        Ok(result
            .result
            .into_iter()
            .map(|point| {
                let metadata = payload_to_map(point.payload.clone());
                let document = metadata
                    .get("document")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let id = metadata
                    .get("_original_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                StoreHit { id, document, metadata, score: 1.0 }
            })
            .collect())
    }

    /// Scroll up to `limit` unique files across the whole collection.
    pub async fn list_files(&self, limit: u32) -> Result<Vec<String>> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .unwrap_or(false);
        if !exists {
            return Ok(Vec::new());
        }

        let result = self
            .client
            .scroll(ScrollPointsBuilder::new(&self.collection).with_payload(true).limit(limit.saturating_mul(10).max(limit)))
            .await
            .map_err(|e| CoreError::Store(format!("scroll failed: {e}")))?;

        let mut files = std::collections::BTreeSet::new();
        for point in result.result {
            let metadata = payload_to_map(point.payload);
            if let Some(f) = metadata.get("file").and_then(|v| v.as_str()) {
                files.insert(f.to_string());
            }
            if files.len() >= limit as usize {
                break;
            }
        }
        Ok(files.into_iter().collect())
    }

    /// Delete all points for `file`, returning the count deleted.
    pub async fn delete_by_file(&self, file: &str) -> Result<usize> {
        let hits = self.scroll_by_file(file, 10_000).await?;
        if hits.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let ids: Vec<qdrant_client::qdrant::PointId> = hits
            .iter()
            .map(|h| point_uuid(&h.id).to_string().into())
            .collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(qdrant_client::qdrant::PointsIdsList { ids }),
            )
            .await
            .map_err(|e| CoreError::Store(format!("delete_by_file failed: {e}")))?;
        Ok(hits.len())
    }

    /// Delete every point in the collection.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .unwrap_or(false);
        if exists {
            self.client
                .delete_collection(&self.collection)
                .await
                .map_err(|e| CoreError::Store(format!("clear (delete_collection) failed: {e}")))?;
        }
        let mut known = self.vector_size.lock().await;
        *known = None;
        Ok(())
    }

    /// Total point count in the collection.
    pub async fn count(&self) -> Result<u64> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .unwrap_or(false);
        if !exists {
            return Ok(0);
        }
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| CoreError::Store(format!("collection_info failed: {e}")))?;
        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0))
    }

    /// Sampled statistics: unique files and code types across up to 1000 points.
    pub async fn stats(&self) -> Result<StoreStats> {
        let total = self.count().await?;
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .unwrap_or(false);
        if !exists {
            return Ok(StoreStats::default());
        }

        let result = self
            .client
            .scroll(ScrollPointsBuilder::new(&self.collection).with_payload(true).limit(1000))
            .await
            .map_err(|e| CoreError::Store(format!("scroll failed: {e}")))?;

        let mut files = std::collections::BTreeSet::new();
        let mut types = std::collections::BTreeSet::new();
        for point in result.result {
            let metadata = payload_to_map(point.payload);
            if let Some(f) = metadata.get("file").and_then(|v| v.as_str()) {
                files.insert(f.to_string());
            }
            if let Some(t) = metadata.get("type").and_then(|v| v.as_str()) {
                types.insert(t.to_string());
            }
        }

        Ok(StoreStats {
            total,
            unique_files_sampled: files.len(),
            code_types: types.into_iter().collect(),
            vector_db_size_mb: self.persist_dir_size_mb(),
        })
    }

    fn persist_dir_size_mb(&self) -> f64 {
        let Some(dir) = &self.persist_dir else { return 0.0 };
        let mut bytes = 0u64;
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                if let Ok(meta) = entry.metadata() {
                    bytes += meta.len();
                }
            }
        }
        bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Extract the configured vector size from a collection's live info, or
/// `None` for a named-vectors collection (this store only ever creates the
/// single-vector kind).
fn collection_vector_size(info: &CollectionInfo) -> Option<u64> {
    let vectors_config = info.config.as_ref()?.params.as_ref()?.vectors_config.as_ref()?.config.as_ref()?;
    match vectors_config {
        VectorsConfigKind::Params(params) => Some(params.size),
        VectorsConfigKind::ParamsMap(_) => None,
    }
}

fn to_point_struct(chunk_id: &str, vector: &[f32], payload: &StoredPayload) -> Result<PointStruct> {
    let id = point_uuid(chunk_id).to_string();
    let json = serde_json::to_value(payload)
        .map_err(|e| CoreError::Store(format!("failed to serialize payload: {e}")))?;
    let payload = Payload::try_from(json)
        .map_err(|e| CoreError::Store(format!("failed to build qdrant payload: {e}")))?;
    Ok(PointStruct::new(id, vector.to_vec(), payload))
}

fn payload_to_map(payload: std::collections::HashMap<String, QdrantValue>) -> BTreeMap<String, serde_json::Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_value_to_json(v)))
        .collect()
}

fn qdrant_value_to_json(value: QdrantValue) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::json!(d),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}

/// Build the store payload for a chunk during indexing.
pub fn build_payload(
    file: &str,
    content: &str,
    node_type: &str,
    name: &str,
    hierarchy: &str,
    lines: [usize; 2],
    parent: Option<String>,
    namespace: Option<String>,
    file_mtime: f64,
) -> (String, StoredPayload) {
    let id = compute_chunk_id(file, content);
    let payload = StoredPayload {
        file: file.to_string(),
        lines,
        node_type: node_type.to_string(),
        name: name.to_string(),
        hierarchy: hierarchy.to_string(),
        parent,
        namespace,
        document: content.to_string(),
        original_id: id.clone(),
        file_mtime,
    };
    (id, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_payload_carries_original_id_and_document() {
        let (id, payload) = build_payload(
            "Foo.cs",
            "class Foo {}",
            "class",
            "Foo",
            "Ns.Foo",
            [1, 1],
            None,
            Some("Ns".into()),
            1234.0,
        );
        assert_eq!(payload.original_id, id);
        assert_eq!(payload.document, "class Foo {}");
        assert_eq!(payload.file_mtime, 1234.0);
    }

    #[test]
    fn where_filter_empty_has_no_qdrant_filter() {
        assert!(WhereFilter::new().to_qdrant().is_none());
    }

    #[test]
    fn where_filter_with_entries_builds_a_filter() {
        let filter = WhereFilter::new().with("file", "Foo.cs");
        assert!(filter.to_qdrant().is_some());
    }

    #[tokio::test]
    #[ignore = "requires a reachable Qdrant instance"]
    async fn upsert_then_retrieve_round_trips() {
        let collection = format!("test_{}", uuid::Uuid::new_v4().simple());
        let url = std::env::var("MAG_QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string());
        let store = VectorStore::open(&url, None, collection).await.unwrap();

        let (id, payload) = build_payload(
            "Foo.cs",
            "class Foo {}",
            "class",
            "Foo",
            "Ns.Foo",
            [1, 1],
            None,
            Some("Ns".into()),
            1234.0,
        );
        store.upsert(&[(id.clone(), vec![0.1, 0.2, 0.3], payload)]).await.unwrap();

        let hit = store.retrieve(&id).await.unwrap().expect("point should exist after upsert");
        assert_eq!(hit.id, id);
        assert_eq!(hit.document, "class Foo {}");

        store.clear().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a reachable Qdrant instance"]
    async fn update_metadata_merges_without_losing_document() {
        let collection = format!("test_{}", uuid::Uuid::new_v4().simple());
        let url = std::env::var("MAG_QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string());
        let store = VectorStore::open(&url, None, collection).await.unwrap();

        let (id, payload) = build_payload(
            "Foo.cs",
            "class Foo {}",
            "class",
            "Foo",
            "Ns.Foo",
            [1, 1],
            None,
            Some("Ns".into()),
            1234.0,
        );
        store.upsert(&[(id.clone(), vec![0.1, 0.2, 0.3], payload)]).await.unwrap();

        let mut updates = BTreeMap::new();
        updates.insert("reviewed".to_string(), serde_json::Value::Bool(true));
        store.update_metadata(&id, updates).await.unwrap();

        let hit = store.retrieve(&id).await.unwrap().expect("point should still exist");
        assert_eq!(hit.metadata.get("reviewed"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(hit.document, "class Foo {}");

        store.clear().await.unwrap();
    }
}
