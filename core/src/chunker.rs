//! Turns parsed [`CodeNode`]s into embedding-ready [`Chunk`]s, enforcing a
//! hard token budget via signature extraction and sliding-window splitting.
//!
//! The signature-extraction heuristic below is line-oriented brace counting;
//! it does not understand string or character literals, so a brace inside a
//! string literal can throw off the count on pathological input. Acceptable
//! for indexing, not for code transformation.

use std::sync::Arc;

use crate::tokenizer::Tokenizer;
use crate::types::{Chunk, ChunkMetadata, CodeNode, NodeKind};

/// Chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

pub struct Chunker {
    config: ChunkerConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Chunker { config, tokenizer }
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    pub fn chunk_nodes(&self, nodes: &[CodeNode]) -> Vec<Chunk> {
        nodes.iter().flat_map(|n| self.chunk_node(n)).collect()
    }

    fn hierarchy(node: &CodeNode) -> String {
        let mut parts = Vec::new();
        if let Some(ns) = &node.namespace {
            parts.push(ns.clone());
        }
        if let Some(parent) = &node.parent {
            parts.push(parent.clone());
        }
        parts.push(node.name.clone());
        parts.join(".")
    }

    fn build_context_header(node: &CodeNode) -> String {
        let mut lines = vec![format!("// File: {}", node.file), format!("// Hierarchy: {}", Self::hierarchy(node))];
        if let Some(doc) = &node.docstring {
            lines.push(doc.clone());
        }
        lines.join("\n")
    }

    fn metadata(node: &CodeNode) -> ChunkMetadata {
        ChunkMetadata {
            file: node.file.clone(),
            lines: [node.start_line, node.end_line],
            node_type: node.kind.as_str().to_string(),
            name: node.name.clone(),
            hierarchy: Self::hierarchy(node),
            parent: node.parent.clone(),
            namespace: node.namespace.clone(),
        }
    }

    fn create_chunk(&self, node: &CodeNode, content: String) -> Chunk {
        let token_count = self.count_tokens(&content);
        Chunk {
            content,
            metadata: Self::metadata(node),
            token_count,
        }
    }

    fn chunk_node(&self, node: &CodeNode) -> Vec<Chunk> {
        let header = Self::build_context_header(node);
        let combined = format!("{header}\n\n{}", node.code);
        if self.count_tokens(&combined) <= self.config.chunk_size_tokens {
            return vec![self.create_chunk(node, combined)];
        }
        self.split_large_node(node, &header)
    }

    fn split_large_node(&self, node: &CodeNode, header: &str) -> Vec<Chunk> {
        match node.kind {
            NodeKind::Class | NodeKind::Interface | NodeKind::Struct => {
                let signature = extract_signature(&node.code);
                let combined = format!("{header}\n\n{signature}");
                if self.count_tokens(&combined) <= self.config.chunk_size_tokens {
                    return vec![self.create_chunk(node, combined)];
                }
                self.sliding_window_chunk(node, header)
            }
            NodeKind::Method | NodeKind::Property => self.sliding_window_chunk(node, header),
            NodeKind::Field => {
                // Fields are never large enough to need splitting in practice;
                // fall back to emitting the full content as a single chunk.
                vec![self.create_chunk(node, format!("{header}\n\n{}", node.code))]
            }
        }
    }

    fn sliding_window_chunk(&self, node: &CodeNode, header: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = node.code.lines().collect();
        if lines.is_empty() {
            return vec![self.create_chunk(node, header.to_string())];
        }

        let est_lines_per_chunk = (self.config.chunk_size_tokens / 6).max(5);
        let overlap_lines = (self.config.chunk_overlap_tokens / 6).max(1);

        let mut chunks = Vec::new();
        let mut start_idx = 0usize;
        while start_idx < lines.len() {
            let mut chunk_lines = est_lines_per_chunk.min(lines.len() - start_idx);
            loop {
                let end_idx = start_idx + chunk_lines;
                let body = lines[start_idx..end_idx].join("\n");
                let combined = format!("{header}\n\n{body}");
                if self.count_tokens(&combined) <= self.config.chunk_size_tokens || chunk_lines <= 1 {
                    chunks.push(Chunk {
                        content: combined,
                        metadata: Self::metadata(node),
                        token_count: self.count_tokens(&format!("{header}\n\n{body}")),
                    });
                    break;
                }
                chunk_lines -= 1;
            }

            let end_idx = start_idx + chunk_lines;
            if end_idx >= lines.len() {
                break;
            }
            let next_start = end_idx.saturating_sub(overlap_lines);
            if next_start <= start_idx {
                start_idx = end_idx;
            } else {
                start_idx = next_start;
            }
        }

        if chunks.is_empty() {
            chunks.push(self.create_chunk(node, format!("{header}\n\n{}", node.code)));
        }
        chunks
    }
}

const METHOD_SIGNATURE_KEYWORDS: &[&str] = &[
    "void ", "int ", "string ", "bool ", "double ", "float ", "public ", "private ", "protected ",
];

/// Replace method bodies inside a container's code with a placeholder
/// comment, keeping declaration/field/signature lines intact.
fn extract_signature(code: &str) -> String {
    let mut out = Vec::new();
    let mut in_method_body = false;
    let mut brace_count: i32 = 0;
    let mut emitted_omission = false;

    for line in code.lines() {
        if in_method_body {
            brace_count += line.matches('{').count() as i32;
            brace_count -= line.matches('}').count() as i32;
            if !emitted_omission {
                out.push("    // ... method body omitted ...".to_string());
                emitted_omission = true;
            }
            if brace_count <= 0 {
                in_method_body = false;
                emitted_omission = false;
                out.push(line.to_string());
            }
            continue;
        }

        let looks_like_signature = line.contains('(')
            && line.contains(')')
            && !line.trim_end().ends_with('{')
            && !line.trim_end().ends_with(';')
            && METHOD_SIGNATURE_KEYWORDS.iter().any(|kw| line.contains(kw));

        out.push(line.to_string());

        if looks_like_signature {
            in_method_body = true;
            brace_count = 0;
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::BytesEstimateTokenizer;

    fn node(kind: NodeKind, code: &str) -> CodeNode {
        CodeNode {
            kind,
            name: "Thing".into(),
            start_line: 1,
            end_line: code.lines().count(),
            code: code.to_string(),
            docstring: None,
            parent: None,
            namespace: Some("Ns".into()),
            file: "Thing.cs".into(),
        }
    }

    fn chunker(chunk_size_tokens: usize) -> Chunker {
        Chunker::new(
            ChunkerConfig {
                chunk_size_tokens,
                chunk_overlap_tokens: 10,
            },
            Arc::new(BytesEstimateTokenizer),
        )
    }

    #[test]
    fn small_node_becomes_single_chunk() {
        let c = chunker(512);
        let n = node(NodeKind::Method, "public void Foo() { return; }");
        let chunks = c.chunk_nodes(&[n]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].token_count <= 512);
    }

    #[test]
    fn all_chunks_respect_budget() {
        let c = chunker(40);
        let big_method = "public void Foo()\n{\n".to_string()
            + &"    DoSomething();\n".repeat(80)
            + "}\n";
        let n = node(NodeKind::Method, &big_method);
        let chunks = c.chunk_nodes(&[n]);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 40, "chunk exceeded budget: {}", chunk.token_count);
        }
    }

    #[test]
    fn hierarchy_omits_absent_components() {
        let mut n = node(NodeKind::Method, "void Foo() {}");
        n.namespace = None;
        n.parent = None;
        assert_eq!(Chunker::hierarchy(&n), "Thing");
        n.parent = Some("Container".into());
        assert_eq!(Chunker::hierarchy(&n), "Container.Thing");
    }

    #[test]
    fn signature_extraction_omits_method_bodies() {
        let code = "public class Foo\n{\n    public void Bar()\n    {\n        DoWork();\n    }\n}\n";
        let sig = extract_signature(code);
        assert!(sig.contains("// ... method body omitted ..."));
        assert!(!sig.contains("DoWork"));
    }
}
