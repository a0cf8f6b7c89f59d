//! Process-wide configuration, loaded once from the environment.
//!
//! Mirrors the `MAG_`-prefixed environment contract: every field has a
//! sensible default and out-of-range values fail validation at construction
//! rather than silently clamping.

use once_cell::sync::OnceCell;
use std::path::PathBuf;

use crate::error::{CoreError, Result};

static SETTINGS: OnceCell<std::sync::RwLock<Option<Config>>> = OnceCell::new();

/// Pipeline-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_host: String,
    pub embedding_model: String,
    pub llm_model: String,
    pub codebase_root: PathBuf,
    pub chroma_persist_dir: PathBuf,
    pub chroma_collection_name: String,
    pub qdrant_url: String,
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub max_workers: usize,
    pub default_search_results: usize,
    pub similarity_threshold: f32,
    pub file_extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ollama_host: "http://localhost:11434".into(),
            embedding_model: "nomic-embed-text".into(),
            llm_model: "codestral".into(),
            codebase_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            chroma_persist_dir: PathBuf::from("./data/chroma"),
            chroma_collection_name: "csharp_codebase".into(),
            qdrant_url: "http://localhost:6334".into(),
            chunk_size_tokens: 512,
            chunk_overlap_tokens: 50,
            max_workers: 4,
            default_search_results: 5,
            similarity_threshold: 0.7,
            file_extensions: vec![".cs".into()],
            exclude_patterns: vec![
                "**/obj/**".into(),
                "**/bin/**".into(),
                "**/packages/**".into(),
                "**/.vs/**".into(),
            ],
            log_level: "INFO".into(),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    /// Load configuration from `MAG_`-prefixed environment variables,
    /// validating every bounded field.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let chunk_size_tokens: usize = env_string("MAG_CHUNK_SIZE_TOKENS", "512")
            .parse()
            .map_err(|_| CoreError::config("MAG_CHUNK_SIZE_TOKENS must be an integer"))?;
        if chunk_size_tokens == 0 || chunk_size_tokens > 2048 {
            return Err(CoreError::config(
                "MAG_CHUNK_SIZE_TOKENS must be in 1..=2048",
            ));
        }

        let chunk_overlap_tokens: usize = env_string("MAG_CHUNK_OVERLAP_TOKENS", "50")
            .parse()
            .map_err(|_| CoreError::config("MAG_CHUNK_OVERLAP_TOKENS must be an integer"))?;

        let max_workers: usize = env_string("MAG_MAX_WORKERS", "4")
            .parse()
            .map_err(|_| CoreError::config("MAG_MAX_WORKERS must be an integer"))?;
        if max_workers == 0 || max_workers > 32 {
            return Err(CoreError::config("MAG_MAX_WORKERS must be in 1..=32"));
        }

        let default_search_results: usize = env_string("MAG_DEFAULT_SEARCH_RESULTS", "5")
            .parse()
            .map_err(|_| CoreError::config("MAG_DEFAULT_SEARCH_RESULTS must be an integer"))?;
        if default_search_results == 0 || default_search_results > 50 {
            return Err(CoreError::config(
                "MAG_DEFAULT_SEARCH_RESULTS must be in 1..=50",
            ));
        }

        let similarity_threshold: f32 = env_string("MAG_SIMILARITY_THRESHOLD", "0.7")
            .parse()
            .map_err(|_| CoreError::config("MAG_SIMILARITY_THRESHOLD must be a float"))?;
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(CoreError::config(
                "MAG_SIMILARITY_THRESHOLD must be in 0.0..=1.0",
            ));
        }

        let codebase_root = match std::env::var("MAG_CODEBASE_ROOT") {
            Ok(p) => PathBuf::from(p),
            Err(_) => defaults.codebase_root.clone(),
        };
        // Canonicalize so relative `--codebase`/`MAG_CODEBASE_ROOT` values agree
        // with the absolute paths `discover_files` walks and returns. Falls
        // back to the as-given path if the root doesn't exist yet; discovery
        // raises its own ConfigError for that case at index time.
        let codebase_root = codebase_root.canonicalize().unwrap_or(codebase_root);
        let chroma_persist_dir = match std::env::var("MAG_CHROMA_PERSIST_DIR") {
            Ok(p) => PathBuf::from(p),
            Err(_) => defaults.chroma_persist_dir.clone(),
        };

        let cfg = Config {
            ollama_host: env_string("MAG_OLLAMA_HOST", &defaults.ollama_host),
            embedding_model: env_string("MAG_EMBEDDING_MODEL", &defaults.embedding_model),
            llm_model: env_string("MAG_LLM_MODEL", &defaults.llm_model),
            codebase_root,
            chroma_persist_dir,
            chroma_collection_name: env_string(
                "MAG_CHROMA_COLLECTION_NAME",
                &defaults.chroma_collection_name,
            ),
            qdrant_url: env_string("MAG_QDRANT_URL", &defaults.qdrant_url),
            chunk_size_tokens,
            chunk_overlap_tokens,
            max_workers,
            default_search_results,
            similarity_threshold,
            file_extensions: env_list(
                "MAG_FILE_EXTENSIONS",
                &defaults
                    .file_extensions
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>(),
            ),
            exclude_patterns: env_list(
                "MAG_EXCLUDE_PATTERNS",
                &defaults
                    .exclude_patterns
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>(),
            ),
            log_level: env_string("MAG_LOG_LEVEL", &defaults.log_level),
        };

        if !cfg.chroma_persist_dir.exists() {
            std::fs::create_dir_all(&cfg.chroma_persist_dir).map_err(|e| {
                CoreError::config(format!(
                    "failed to create chroma_persist_dir {}: {e}",
                    cfg.chroma_persist_dir.display()
                ))
            })?;
        }

        Ok(cfg)
    }
}

/// Lazily load and memoize the process-wide configuration.
pub fn get_settings() -> Result<Config> {
    let cell = SETTINGS.get_or_init(|| std::sync::RwLock::new(None));
    {
        let guard = cell.read().expect("settings lock poisoned");
        if let Some(cfg) = guard.as_ref() {
            return Ok(cfg.clone());
        }
    }
    let cfg = Config::from_env()?;
    let mut guard = cell.write().expect("settings lock poisoned");
    *guard = Some(cfg.clone());
    Ok(cfg)
}

/// Clear the memoized configuration so the next `get_settings()` call
/// re-reads the environment. Used by tests.
pub fn reset_settings() {
    if let Some(cell) = SETTINGS.get() {
        let mut guard = cell.write().expect("settings lock poisoned");
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_within_bounds() {
        let cfg = Config::default();
        assert_eq!(cfg.chunk_size_tokens, 512);
        assert_eq!(cfg.max_workers, 4);
        assert!((0.0..=1.0).contains(&cfg.similarity_threshold));
    }

    #[test]
    fn rejects_out_of_range_max_workers() {
        std::env::set_var("MAG_MAX_WORKERS", "64");
        let result = Config::from_env();
        std::env::remove_var("MAG_MAX_WORKERS");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
