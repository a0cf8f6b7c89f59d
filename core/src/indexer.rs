//! Orchestrates discovery → parse → chunk → embed → store, with an
//! incremental mtime-based skip and a bounded async worker pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::chunker::{Chunker, ChunkerConfig};
use crate::config::Config;
use crate::discovery::{discover_files, DiscoveryConfig};
use crate::embedding::EmbeddingBackend;
use crate::error::Result;
use crate::parser::CSharpParser;
use crate::store::{build_payload, VectorStore};
use crate::tokenizer::Tokenizer;
use crate::types::IndexStats;

/// A progress notification emitted after each file completes.
pub struct ProgressEvent {
    pub current: usize,
    pub total: usize,
    pub message: String,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub struct Indexer {
    config: Config,
    store: Arc<VectorStore>,
    backend: Arc<dyn EmbeddingBackend>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Indexer {
    pub fn new(config: Config, store: Arc<VectorStore>, backend: Arc<dyn EmbeddingBackend>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Indexer { config, store, backend, tokenizer }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            root: self.config.codebase_root.clone(),
            extensions: self.config.file_extensions.clone(),
            exclude_patterns: self.config.exclude_patterns.clone(),
        }
    }

    /// Index the whole codebase. When `incremental` is true, files whose
    /// stored `file_mtime` is not older than their current mtime are skipped.
    pub async fn index(&self, progress: Option<ProgressCallback>, incremental: bool) -> Result<IndexStats> {
        let files = discover_files(&self.discovery_config())?;
        if files.is_empty() {
            return Ok(IndexStats::default());
        }

        let mut stats = IndexStats::default();
        let total = files.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks: JoinSet<(PathBuf, Result<usize>)> = JoinSet::new();
        let mut completed = 0usize;

        // Decide skip/index before spawning, so a concurrent write to the
        // file mid-run doesn't race the decision.
        let mut to_process = Vec::new();
        for file in files {
            let should_index = if incremental {
                self.needs_indexing(&file).await
            } else {
                true
            };
            if should_index {
                to_process.push(file);
            } else {
                stats.files_skipped += 1;
            }
        }

        for file in to_process {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let store = self.store.clone();
            let backend = self.backend.clone();
            let tokenizer = self.tokenizer.clone();
            let cfg = self.config.clone();
            let file_clone = file.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = index_one_file(&cfg, &store, backend.as_ref(), tokenizer, &file_clone).await;
                (file_clone, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            match joined {
                Ok((file, Ok(chunks))) => {
                    stats.files_processed += 1;
                    stats.chunks_created += chunks;
                    if let Some(cb) = &progress {
                        cb(ProgressEvent {
                            current: completed,
                            total,
                            message: format!("indexed {}", file.display()),
                        });
                    }
                }
                Ok((file, Err(e))) => {
                    stats.errors += 1;
                    warn!(file = %file.display(), error = %e, "failed to index file");
                    if let Some(cb) = &progress {
                        cb(ProgressEvent {
                            current: completed,
                            total,
                            message: format!("error indexing {}: {e}", file.display()),
                        });
                    }
                }
                Err(join_err) => {
                    stats.errors += 1;
                    warn!(error = %join_err, "indexing task panicked");
                }
            }
        }

        Ok(stats)
    }

    async fn needs_indexing(&self, file: &Path) -> bool {
        let Ok(rel) = file.strip_prefix(canonical_root(&self.config)) else {
            return true;
        };
        let file_str = rel.to_string_lossy().replace('\\', "/");
        let Ok(current_mtime) = mtime_seconds(file) else {
            return true;
        };

        match self.store.scroll_by_file(&file_str, 1).await {
            Ok(hits) if !hits.is_empty() => {
                let stored = hits[0]
                    .metadata
                    .get("file_mtime")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                current_mtime > stored
            }
            _ => true,
        }
    }

    /// Delete and re-create a single file's chunks. Not atomic: readers may
    /// briefly observe zero chunks for `file` between the delete and upsert.
    pub async fn reindex_file(&self, file: &Path) -> Result<usize> {
        let rel = file.strip_prefix(canonical_root(&self.config)).unwrap_or(file);
        let file_str = rel.to_string_lossy().replace('\\', "/");
        self.store.delete_by_file(&file_str).await?;
        index_one_file(&self.config, &self.store, self.backend.as_ref(), self.tokenizer.clone(), file).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub async fn stats(&self) -> Result<crate::store::StoreStats> {
        self.store.stats().await
    }
}

/// `config.codebase_root` canonicalized, falling back to the as-given path.
/// `discover_files` always canonicalizes the root it walks, so stripping
/// against anything else can leave an absolute path in `file`/payloads for
/// configs built directly (e.g. in tests) instead of via `Config::from_env`.
fn canonical_root(config: &Config) -> PathBuf {
    config.codebase_root.canonicalize().unwrap_or_else(|_| config.codebase_root.clone())
}

fn mtime_seconds(path: &Path) -> std::io::Result<f64> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta.modified()?;
    let secs = mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    Ok(secs)
}

async fn index_one_file(
    config: &Config,
    store: &VectorStore,
    backend: &dyn EmbeddingBackend,
    tokenizer: Arc<dyn Tokenizer>,
    file: &Path,
) -> Result<usize> {
    let rel = file.strip_prefix(canonical_root(config)).unwrap_or(file);
    let file_str = rel.to_string_lossy().replace('\\', "/");

    let content = tokio::fs::read_to_string(file).await.map_err(|e| crate::error::CoreError::Parse {
        file: file_str.clone(),
        reason: e.to_string(),
    })?;

    let mut parser = CSharpParser::new()?;
    let nodes = parser.parse_file(&file_str, &content)?;
    if nodes.is_empty() {
        return Ok(0);
    }

    let chunker = Chunker::new(
        ChunkerConfig {
            chunk_size_tokens: config.chunk_size_tokens,
            chunk_overlap_tokens: config.chunk_overlap_tokens,
        },
        tokenizer,
    );
    let chunks = chunker.chunk_nodes(&nodes);
    if chunks.is_empty() {
        return Ok(0);
    }

    let file_mtime = mtime_seconds(file).unwrap_or_else(|_| {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    });

    let mut batch = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let vector = backend.embed(&chunk.content).await?;
        let (id, payload) = build_payload(
            &chunk.metadata.file,
            &chunk.content,
            &chunk.metadata.node_type,
            &chunk.metadata.name,
            &chunk.metadata.hierarchy,
            chunk.metadata.lines,
            chunk.metadata.parent.clone(),
            chunk.metadata.namespace.clone(),
            file_mtime,
        );
        batch.push((id, vector, payload));
    }

    debug!(file = %file_str, chunks = batch.len(), "upserting file chunks");
    store.upsert(&batch).await?;
    Ok(batch.len())
}
