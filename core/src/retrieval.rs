//! search_code / get_file / list_files / explain_symbol: the read-side API
//! consumed by the JSON-RPC tool surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::embedding::EmbeddingBackend;
use crate::error::{CoreError, Result};
use crate::parser::CSharpParser;
use crate::store::{VectorStore, WhereFilter};

pub struct Retrieval {
    config: Config,
    store: Arc<VectorStore>,
    backend: Arc<dyn EmbeddingBackend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    pub file: String,
    pub lines: [usize; 2],
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub hierarchy: String,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AstNodeSummary {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub parent: Option<String>,
    pub namespace: Option<String>,
    pub has_docstring: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContents {
    pub path: String,
    pub content: String,
    pub language: String,
    pub line_count: usize,
    pub ast: Option<Vec<AstNodeSummary>>,
    pub ast_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub symbols: Vec<String>,
    pub types: Vec<String>,
    pub line_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefinitionLocation {
    pub file: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainResult {
    pub symbol: String,
    pub explanation: String,
    pub definition_location: Option<DefinitionLocation>,
    pub usage_examples: Vec<SearchResult>,
}

impl Retrieval {
    pub fn new(config: Config, store: Arc<VectorStore>, backend: Arc<dyn EmbeddingBackend>) -> Self {
        Retrieval { config, store, backend }
    }

    fn validate_path(&self, rel_path: &str) -> Result<PathBuf> {
        validate_path(&self.config.codebase_root, rel_path)
    }

    pub async fn search_code(&self, query: &str, max_results: Option<usize>, filter_type: Option<&str>) -> Result<Vec<SearchResult>> {
        let vector = self.backend.embed(query).await?;
        let k = max_results.unwrap_or(self.config.default_search_results) as u64;

        let mut filter = WhereFilter::new();
        if let Some(t) = filter_type {
            if t != "all" {
                filter = filter.with("type", t);
            }
        }

        let hits = self.store.search(vector, k, &filter).await?;
        let threshold = self.config.similarity_threshold;

        let mut results = Vec::new();
        for hit in hits {
            let relevance = hit.score.clamp(0.0, 1.0);
            if relevance < threshold {
                continue;
            }
            let lines = extract_lines(&hit.metadata);
            results.push(SearchResult {
                content: hit.document,
                file: str_field(&hit.metadata, "file"),
                lines,
                node_type: str_field(&hit.metadata, "type"),
                name: str_field(&hit.metadata, "name"),
                hierarchy: str_field(&hit.metadata, "hierarchy"),
                relevance_score: (relevance * 100.0).round() / 100.0,
            });
        }
        results.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap());
        Ok(results)
    }

    pub async fn get_file(&self, rel_path: &str, include_ast: bool) -> Result<FileContents> {
        let path = self.validate_path(rel_path)?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| CoreError::Store(format!("failed to read {rel_path}: {e}")))?;
        let line_count = content.lines().count();

        let (ast, ast_error) = if include_ast {
            match CSharpParser::new().and_then(|mut p| p.parse_file(rel_path, &content)) {
                Ok(nodes) => (
                    Some(
                        nodes
                            .into_iter()
                            .map(|n| AstNodeSummary {
                                node_type: n.kind.as_str().to_string(),
                                name: n.name,
                                start_line: n.start_line,
                                end_line: n.end_line,
                                parent: n.parent,
                                namespace: n.namespace,
                                has_docstring: n.docstring.is_some(),
                            })
                            .collect(),
                    ),
                    None,
                ),
                Err(e) => (None, Some(e.to_string())),
            }
        } else {
            (None, None)
        };

        Ok(FileContents {
            path: rel_path.to_string(),
            content,
            language: "csharp".to_string(),
            line_count,
            ast,
            ast_error,
        })
    }

    pub async fn list_files(&self, pattern: Option<&str>, type_filter: Option<&str>) -> Result<Vec<FileSummary>> {
        let files = self.store.list_files(1000).await?;
        let glob = pattern
            .map(|p| globset::Glob::new(p).map(|g| g.compile_matcher()))
            .transpose()
            .map_err(|e| CoreError::config(format!("invalid file pattern: {e}")))?;

        let mut summaries = Vec::new();
        for file in files {
            if let Some(matcher) = &glob {
                if !matcher.is_match(&file) {
                    continue;
                }
            }

            let hits = self.store.scroll_by_file(&file, 100).await?;
            let mut symbols = std::collections::BTreeSet::new();
            let mut types = std::collections::BTreeSet::new();
            for hit in &hits {
                symbols.insert(str_field(&hit.metadata, "name"));
                types.insert(str_field(&hit.metadata, "type"));
            }

            if let Some(t) = type_filter {
                if t != "all" && !types.contains(t) {
                    continue;
                }
            }

            let line_count = self
                .config
                .codebase_root
                .join(&file)
                .canonicalize()
                .ok()
                .and_then(|p| std::fs::read_to_string(p).ok())
                .map(|c| c.lines().count())
                .unwrap_or(0);

            summaries.push(FileSummary {
                path: file,
                symbols: symbols.into_iter().collect(),
                types: types.into_iter().collect(),
                line_count,
                chunk_count: hits.len(),
            });
        }
        summaries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(summaries)
    }

    pub async fn explain_symbol(&self, symbol: &str, include_usage: bool) -> Result<ExplainResult> {
        let parts: Vec<&str> = symbol.split('.').collect();
        let name = *parts.last().unwrap_or(&symbol);
        let parent = if parts.len() > 1 { Some(parts[parts.len() - 2]) } else { None };

        let def_vector = self.backend.embed(&format!("{symbol} definition")).await?;
        let mut def_filter = WhereFilter::new();
        if let Some(p) = parent {
            def_filter = def_filter.with("name", name).with("parent", p);
        }
        let def_hits = self.store.search(def_vector, 5, &def_filter).await?;

        let Some(definition) = def_hits.first() else {
            return Ok(ExplainResult {
                symbol: symbol.to_string(),
                explanation: format!("Symbol '{symbol}' not found in the indexed codebase."),
                definition_location: None,
                usage_examples: Vec::new(),
            });
        };

        let def_lines = extract_lines(&definition.metadata);
        let definition_location = DefinitionLocation {
            file: str_field(&definition.metadata, "file"),
            line: def_lines[0],
        };

        let mut usage_examples = Vec::new();
        if include_usage {
            let usage_vector = self.backend.embed(&format!("{name} usage example")).await?;
            let usage_hits = self.store.search(usage_vector, 5, &WhereFilter::new()).await?;
            for hit in usage_hits {
                if hit.id == definition.id {
                    continue;
                }
                if !hit.document.contains(name) {
                    continue;
                }
                let lines = extract_lines(&hit.metadata);
                usage_examples.push(SearchResult {
                    content: hit.document,
                    file: str_field(&hit.metadata, "file"),
                    lines,
                    node_type: str_field(&hit.metadata, "type"),
                    name: str_field(&hit.metadata, "name"),
                    hierarchy: str_field(&hit.metadata, "hierarchy"),
                    relevance_score: hit.score.clamp(0.0, 1.0),
                });
                if usage_examples.len() >= 3 {
                    break;
                }
            }
        }

        let context = usage_examples
            .iter()
            .map(|u| u.content.clone())
            .collect::<Vec<_>>()
            .join("\n---\n");

        let explanation = self
            .backend
            .chat(
                Some(
                    "You are an expert C# developer explaining code to another engineer. \
                    Be precise, reference the provided context, and call out non-obvious behavior.",
                ),
                &format!(
                    "## Related Codebase Context\n{context}\n\n## Code to Explain\n```csharp\n{}\n```\n\n## Specific Question\nExplain the symbol '{symbol}' in detail.",
                    definition.document
                ),
                0.2,
                2000,
            )
            .await?;

        Ok(ExplainResult {
            symbol: symbol.to_string(),
            explanation,
            definition_location: Some(definition_location),
            usage_examples,
        })
    }
}

/// Reject any relative path that could escape `root`, syntactically
/// (leading `..`/absolute components) before canonicalizing, then by
/// canonical-prefix check (to also catch symlink-based escapes).
pub fn validate_path(root: &Path, rel_path: &str) -> Result<PathBuf> {
    if rel_path.is_empty() {
        return Err(CoreError::security("empty path"));
    }
    let candidate = Path::new(rel_path);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(CoreError::security(format!("path escapes codebase root: {rel_path}")));
    }

    let root_canonical = root
        .canonicalize()
        .map_err(|e| CoreError::Store(format!("failed to canonicalize codebase root: {e}")))?;
    let full = root.join(candidate);

    let canonical = full
        .canonicalize()
        .map_err(|_| CoreError::NotFound(format!("file not found: {rel_path}")))?;

    if !canonical.starts_with(&root_canonical) {
        return Err(CoreError::security(format!("path escapes codebase root: {rel_path}")));
    }
    Ok(canonical)
}

fn str_field(metadata: &std::collections::BTreeMap<String, serde_json::Value>, key: &str) -> String {
    metadata.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn extract_lines(metadata: &std::collections::BTreeMap<String, serde_json::Value>) -> [usize; 2] {
    metadata
        .get("lines")
        .and_then(|v| v.as_array())
        .map(|arr| {
            let start = arr.first().and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let end = arr.get(1).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            [start, end]
        })
        .unwrap_or([0, 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_path_rejects_parent_dir_traversal() {
        let root = std::env::temp_dir();
        let result = validate_path(&root, "../../etc/passwd");
        assert!(matches!(result, Err(CoreError::Security(_))));
    }

    #[test]
    fn validate_path_rejects_absolute_path() {
        let root = std::env::temp_dir();
        let result = validate_path(&root, "/etc/passwd");
        assert!(matches!(result, Err(CoreError::Security(_))));
    }

    #[test]
    fn validate_path_accepts_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Main.cs"), "class Main {}").unwrap();
        let result = validate_path(dir.path(), "Main.cs");
        assert!(result.is_ok());
    }
}
