//! Shared data model: parsed nodes, chunks, and store payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of declaration a [`CodeNode`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Class,
    Interface,
    Struct,
    Method,
    Property,
    Field,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Struct => "struct",
            NodeKind::Method => "method",
            NodeKind::Property => "property",
            NodeKind::Field => "field",
        }
    }
}

/// A single declaration extracted from a source file by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeNode {
    pub kind: NodeKind,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub code: String,
    pub docstring: Option<String>,
    pub parent: Option<String>,
    pub namespace: Option<String>,
    pub file: String,
}

/// Metadata attached to an embedding-ready chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file: String,
    pub lines: [usize; 2],
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub hierarchy: String,
    pub parent: Option<String>,
    pub namespace: Option<String>,
}

/// A text unit ready for embedding: a context header plus code body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub token_count: usize,
}

/// The payload stored alongside a vector in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPayload {
    pub file: String,
    pub lines: [usize; 2],
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub hierarchy: String,
    pub parent: Option<String>,
    pub namespace: Option<String>,
    pub document: String,
    #[serde(rename = "_original_id")]
    pub original_id: String,
    pub file_mtime: f64,
}

/// A single search or scroll hit returned by the vector store.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub score: f32,
}

/// Aggregate result of a single `index()` run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_processed: usize,
    pub chunks_created: usize,
    pub errors: usize,
    pub files_skipped: usize,
}

/// Compute the deterministic chunk id for `(file_path, content)`.
///
/// `"chunk_" + hex(sha256(file_path + ":" + content))[:16]`
pub fn chunk_id(file_path: &str, content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("chunk_{}", &hex[..16])
}

/// The fixed namespace UUID used to derive a store-safe UUID from a
/// human-readable chunk id (`uuid5(NAMESPACE, chunk_id)`).
pub const NAMESPACE_UUID: uuid::Uuid = uuid::Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// Derive the store-safe UUID key for a chunk id.
pub fn point_uuid(chunk_id: &str) -> uuid::Uuid {
    uuid::Uuid::new_v5(&NAMESPACE_UUID, chunk_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic() {
        let a = chunk_id("Foo.cs", "hello");
        let b = chunk_id("Foo.cs", "hello");
        assert_eq!(a, b);
        assert!(a.starts_with("chunk_"));
        assert_eq!(a.len(), "chunk_".len() + 16);
    }

    #[test]
    fn chunk_id_differs_on_content() {
        let a = chunk_id("Foo.cs", "hello");
        let b = chunk_id("Foo.cs", "world");
        assert_ne!(a, b);
    }

    #[test]
    fn point_uuid_is_stable() {
        let id = chunk_id("Foo.cs", "hello");
        assert_eq!(point_uuid(&id), point_uuid(&id));
    }
}
