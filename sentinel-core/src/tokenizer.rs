//! Token counting against a fixed encoding.
//!
//! The primary counter wraps the `cl100k_base` byte-pair encoder. If the
//! encoder cannot initialize, counting degrades to a byte-length estimate
//! that deliberately over-counts; budgets are enforced against whichever
//! counter is in force, so a degraded session is tighter, never looser.

use crate::TokenizerConfig;
use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Process-wide encoder, initialized once and shared read-only.
static ENCODER: OnceCell<Option<CoreBPE>> = OnceCell::new();

/// Trait for counting tokens in text.
///
/// Implementations must be deterministic and side-effect-free so that
/// identical inputs always produce identical packs.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in the given text.
    fn count(&self, text: &str) -> u32;

    /// Length of the encoded token sequence. Identical semantics to
    /// `count`; provided for callers that speak in encoder terms.
    fn encode_len(&self, text: &str) -> u32 {
        self.count(text)
    }
}

/// BPE-backed token counter with a conservative degraded mode.
#[derive(Debug, Clone)]
pub struct BpeTokenCounter {
    /// Bytes per token used when the encoder is unavailable
    fallback_divisor: u32,
    degraded: bool,
}

impl BpeTokenCounter {
    /// Construct the counter, initializing the shared encoder on first
    /// use. Logs a single warning when entering degraded mode.
    pub fn new(config: TokenizerConfig) -> Self {
        let encoder = ENCODER.get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(err) => {
                warn!(
                    error = %err,
                    "cl100k_base encoder failed to initialize; token counts degrade to byte estimates"
                );
                None
            }
        });

        Self {
            fallback_divisor: config.fallback_divisor.max(1),
            degraded: encoder.is_none(),
        }
    }

    /// Whether counting runs on the byte-length estimate.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    fn fallback_count(&self, text: &str) -> u32 {
        (text.len() as u64).div_ceil(self.fallback_divisor as u64) as u32
    }
}

impl Default for BpeTokenCounter {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        match ENCODER.get().and_then(|e| e.as_ref()) {
            Some(bpe) => bpe.encode_ordinary(text).len() as u32,
            None => self.fallback_count(text),
        }
    }
}

// ============================================================================
// BUDGET TRUNCATION
// ============================================================================

/// Truncate text from its tail so the remaining prefix fits the budget.
///
/// Returns `(text, tokens, trimmed_tokens)`. The prefix is the longest
/// char-boundary cut whose count fits; identical inputs always produce
/// the identical cut.
pub fn truncate_to_budget(
    text: &str,
    budget: u32,
    counter: &dyn TokenCounter,
) -> (String, u32, u32) {
    let full = counter.count(text);
    if full <= budget {
        return (text.to_string(), full, 0);
    }
    if budget == 0 {
        return (String::new(), 0, full);
    }

    // Binary search over char boundaries for the longest fitting prefix.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut lo = 0usize;
    let mut hi = boundaries.len() - 1;
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if counter.count(&text[..boundaries[mid]]) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let cut = &text[..boundaries[lo]];
    let kept = counter.count(cut);
    (cut.to_string(), kept, full - kept)
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
