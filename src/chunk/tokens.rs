use crate::error::Result;

/// Counts tokens in a piece of text.
///
/// Implementations must be deterministic. An implementation that cannot
/// count (tokenizer missing, remote service down) returns
/// `Error::TokenCounter`, which aborts chunking outright.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> Result<usize>;
}

/// One token per Unicode scalar value. Exactly additive over concatenation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenCounter;

impl TokenCounter for CharTokenCounter {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(text.chars().count())
    }
}

/// Approximation used by the CLI: one token per four bytes of UTF-8, rounded up.
///
/// Close to what BPE tokenizers report for English prose and conservative for
/// CJK text. Never undercounts a concatenation relative to its parts.
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenCounter {
    bytes_per_token: usize,
}

impl ApproxTokenCounter {
    pub fn new(bytes_per_token: usize) -> Self {
        Self {
            bytes_per_token: bytes_per_token.max(1),
        }
    }
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(text.len().div_ceil(self.bytes_per_token))
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for std::sync::Arc<T> {
    fn count(&self, text: &str) -> Result<usize> {
        (**self).count(text)
    }
}
