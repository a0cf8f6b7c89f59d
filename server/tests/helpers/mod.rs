//! Shared test harness: copies a fixture codebase into a temp directory and
//! wires up an `Indexer`/`Retrieval` pair against a fake embedding backend.
//!
//! These tests exercise real `VectorStore` calls and therefore require a
//! Qdrant instance reachable at `MAG_QDRANT_URL` (default
//! `http://localhost:6334`); they are marked `#[ignore]` so a plain
//! `cargo test` run doesn't fail in environments without one.

use std::path::Path;
use std::sync::Arc;

use magsharp_core::config::Config;
use magsharp_core::embedding::FakeEmbeddingBackend;
use magsharp_core::indexer::Indexer;
use magsharp_core::retrieval::Retrieval;
use magsharp_core::store::VectorStore;
use magsharp_core::tokenizer::create_tokenizer;
use tempfile::TempDir;

pub struct TestHarness {
    pub indexer: Indexer,
    pub retrieval: Retrieval,
    _temp_dir: TempDir,
}

fn copy_dir_recursive(src: &Path, dst: &Path) {
    std::fs::create_dir_all(dst).unwrap();
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir_recursive(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

impl TestHarness {
    /// Copy `tests/fixtures/<name>` into a fresh temp directory and build a
    /// harness rooted there, with a random collection name so parallel test
    /// runs don't collide.
    pub async fn from_fixture(name: &str) -> Self {
        let fixture_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
        let temp_dir = tempfile::tempdir().unwrap();
        copy_dir_recursive(&fixture_dir, temp_dir.path());

        let collection = format!("test_{}", uuid::Uuid::new_v4().simple());
        let qdrant_url = std::env::var("MAG_QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string());

        let config = Config {
            codebase_root: temp_dir.path().to_path_buf(),
            qdrant_url,
            chroma_collection_name: collection,
            ..Config::default()
        };

        let store = Arc::new(
            VectorStore::open(&config.qdrant_url, None, config.chroma_collection_name.clone())
                .await
                .unwrap(),
        );
        let backend = Arc::new(FakeEmbeddingBackend { dimension: 32 });
        let tokenizer = create_tokenizer("cl100k_base");

        let indexer = Indexer::new(config.clone(), store.clone(), backend.clone(), tokenizer);
        let retrieval = Retrieval::new(config, store, backend);

        TestHarness { indexer, retrieval, _temp_dir: temp_dir }
    }
}
