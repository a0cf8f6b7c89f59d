//! Pluggable token counting for chunk-budget enforcement.

use std::sync::Arc;

/// Counts tokens for a string of text.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
    fn name(&self) -> &str;
}

/// Fallback tokenizer used when no tiktoken encoder is available.
/// Estimates one token per four bytes, rounding up.
pub struct BytesEstimateTokenizer;

impl Tokenizer for BytesEstimateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }

    fn name(&self) -> &str {
        "bytes-estimate"
    }
}

#[cfg(feature = "tiktoken")]
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenTokenizer {
    pub fn new() -> Option<Self> {
        tiktoken_rs::cl100k_base().ok().map(|bpe| TiktokenTokenizer { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn name(&self) -> &str {
        "cl100k_base"
    }
}

/// Build the tokenizer named by configuration, falling back to the
/// bytes-estimate tokenizer if `name` is unrecognized or unavailable.
pub fn create_tokenizer(name: &str) -> Arc<dyn Tokenizer> {
    #[cfg(feature = "tiktoken")]
    {
        if name == "cl100k_base" || name == "tiktoken" {
            if let Some(t) = TiktokenTokenizer::new() {
                return Arc::new(t);
            }
            tracing::warn!("tiktoken encoder unavailable, falling back to bytes-estimate");
        }
    }
    let _ = name;
    Arc::new(BytesEstimateTokenizer)
}

/// The tokenizer this crate uses by default when no explicit configuration
/// is supplied: cl100k when the `tiktoken` feature is enabled, otherwise the
/// bytes-estimate fallback.
pub fn default_tokenizer() -> Arc<dyn Tokenizer> {
    create_tokenizer("cl100k_base")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_estimate_rounds_up() {
        let t = BytesEstimateTokenizer;
        assert_eq!(t.count_tokens(""), 0);
        assert_eq!(t.count_tokens("ab"), 1);
        assert_eq!(t.count_tokens("abcd"), 1);
        assert_eq!(t.count_tokens("abcde"), 2);
    }
}
