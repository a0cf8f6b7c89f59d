//! Core library for semantic indexing and retrieval over a C# codebase:
//! discovery, parsing, chunking, embedding, vector storage, and search.

pub mod chunker;
pub mod config;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod parser;
pub mod retrieval;
pub mod store;
pub mod tokenizer;
pub mod types;

pub use config::Config;
pub use error::{CoreError, Result};
pub use indexer::Indexer;
pub use retrieval::Retrieval;
pub use store::VectorStore;
