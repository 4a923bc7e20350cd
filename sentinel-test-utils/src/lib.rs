//! SENTINEL Test Utilities
//!
//! Centralized test infrastructure for the SENTINEL workspace:
//! - Deterministic token counter for countable-by-eye budgets
//! - Mock capabilities (LLM caller, section source)
//! - Proptest generators for blocks and transcripts
//! - Fixture helpers for common block shapes

// Re-export core types for convenience
pub use sentinel_core::{
    Block, BlockId, BlockType, CallError, ChatMessage, ChatRole, DropReason, RetrievalPreset,
    SectionKind, SentinelConfig, StrainTier, Tag, TokenCounter,
};
pub use sentinel_storage::{MemoryDigestStore, MemoryTranscriptArchive};

use async_trait::async_trait;
use sentinel_context::SectionSource;
use sentinel_core::StoreError;
use sentinel_llm::{CallOptions, LlmCaller};
use sentinel_storage::SummaryWriter;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};

// ============================================================================
// DETERMINISTIC TOKEN COUNTER
// ============================================================================

/// Counts one token per whitespace-separated word. Tests that reason
/// about budgets in exact numbers use this instead of the BPE counter.
#[derive(Debug, Clone, Default)]
pub struct WordTokenCounter;

impl TokenCounter for WordTokenCounter {
    fn count(&self, text: &str) -> u32 {
        text.split_whitespace().count() as u32
    }
}

// ============================================================================
// MOCK LLM CALLERS
// ============================================================================

/// Replays a scripted sequence of responses, then fails.
pub struct ScriptedLlmCaller {
    responses: Mutex<VecDeque<Result<String, CallError>>>,
}

impl ScriptedLlmCaller {
    pub fn new(responses: Vec<Result<String, CallError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    /// A caller that always returns the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(text.into())])
    }

    /// A caller that fails every call.
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl LlmCaller for ScriptedLlmCaller {
    async fn call(
        &self,
        _messages: &[ChatMessage],
        _options: &CallOptions,
    ) -> Result<String, CallError> {
        let mut responses = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match responses.len() {
            0 => Err(CallError::Failed {
                reason: "scripted caller exhausted".to_string(),
            }),
            // The last scripted response repeats
            1 => responses
                .front()
                .cloned()
                .unwrap_or(Err(CallError::EmptyResponse)),
            _ => responses.pop_front().unwrap_or(Err(CallError::EmptyResponse)),
        }
    }
}

// ============================================================================
// IN-MEMORY SUMMARY WRITER
// ============================================================================

/// Summary writer that collects exports in memory; tests inspect what a
/// checkpoint wrote.
#[derive(Debug, Default)]
pub struct MemorySummaryWriter {
    inner: RwLock<Vec<String>>,
}

impl MemorySummaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every summary written so far.
    pub fn written(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SummaryWriter for MemorySummaryWriter {
    fn write_summary(&self, summary: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(summary.to_string());
        Ok(())
    }
}

// ============================================================================
// STATIC SECTION SOURCE
// ============================================================================

/// Section source with fixed text per section, tier layering applied the
/// way the engine expects: core rules always, narrative guidance cut at
/// StrainII+.
#[derive(Debug, Clone)]
pub struct StaticSectionSource {
    pub system: String,
    pub rules_core: String,
    pub narrative_guidance: String,
    pub snapshot: String,
    pub retrieval_minimal: String,
    pub retrieval_standard: String,
    pub retrieval_deep: String,
    pub recap: String,
}

impl Default for StaticSectionSource {
    fn default() -> Self {
        Self {
            system: "You are the game master for a frontier salvage campaign.".to_string(),
            rules_core: "Resolve checks with opposed pools. Harm is persistent.".to_string(),
            narrative_guidance: "Prefer consequence over exposition.".to_string(),
            snapshot: "The crew holds the relay spire. Fuel is low.".to_string(),
            retrieval_minimal: "Lore: the spire predates the colony.".to_string(),
            retrieval_standard:
                "Lore: the spire predates the colony. Campaign: the Architects claim it."
                    .to_string(),
            retrieval_deep:
                "Lore: the spire predates the colony and hums at night. Campaign: the Architects claim it; the wardens dispute that."
                    .to_string(),
            recap: "Earlier, the crew fought through the lower decks and lost the cargo."
                .to_string(),
        }
    }
}

impl StaticSectionSource {
    /// Source whose every section is `words`-many filler words; handy
    /// for exact budget math.
    pub fn sized(words: usize) -> Self {
        let text = vec!["w"; words].join(" ");
        Self {
            system: text.clone(),
            rules_core: text.clone(),
            narrative_guidance: String::new(),
            snapshot: text.clone(),
            retrieval_minimal: text.clone(),
            retrieval_standard: text.clone(),
            retrieval_deep: text.clone(),
            recap: text,
        }
    }
}

impl SectionSource for StaticSectionSource {
    fn system_text(&self) -> String {
        self.system.clone()
    }

    fn rules_text(&self, tier: StrainTier) -> String {
        if tier.cuts_narrative_guidance() || self.narrative_guidance.is_empty() {
            self.rules_core.clone()
        } else {
            format!("{}\n{}", self.rules_core, self.narrative_guidance)
        }
    }

    fn state_snapshot(&self) -> String {
        self.snapshot.clone()
    }

    fn retrieval_text(&self, preset: RetrievalPreset) -> String {
        match preset {
            RetrievalPreset::Off => String::new(),
            RetrievalPreset::Minimal => self.retrieval_minimal.clone(),
            RetrievalPreset::Standard => self.retrieval_standard.clone(),
            RetrievalPreset::Deep => self.retrieval_deep.clone(),
        }
    }

    fn scene_recap(&self, _old_blocks: &[Block]) -> String {
        self.recap.clone()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Filler text of exactly `words` words.
pub fn filler(words: usize) -> String {
    vec!["w"; words].join(" ")
}

pub fn narrative_block(id: u64, words: usize) -> Block {
    Block::new(
        BlockId::new(id),
        BlockType::Narrative,
        ChatRole::Assistant,
        filler(words),
    )
}

pub fn intel_block(id: u64, words: usize) -> Block {
    Block::new(
        BlockId::new(id),
        BlockType::Intel,
        ChatRole::Assistant,
        filler(words),
    )
}

pub fn user_block(id: u64, text: &str) -> Block {
    Block::new(BlockId::new(id), BlockType::Intel, ChatRole::User, text)
}

pub fn choice_block(id: u64, text: &str) -> Block {
    Block::new(BlockId::new(id), BlockType::Choice, ChatRole::Assistant, text)
}

pub fn system_block(id: u64, text: &str) -> Block {
    Block::new(BlockId::new(id), BlockType::System, ChatRole::System, text)
}

pub fn hinge_block(id: u64, hinge: &str, text: &str) -> Block {
    Block::new(BlockId::new(id), BlockType::Choice, ChatRole::Assistant, text)
        .with_tag(Tag::Hinge(hinge.to_string()))
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_block_type() -> impl Strategy<Value = BlockType> {
        prop_oneof![
            Just(BlockType::Narrative),
            Just(BlockType::Intel),
            Just(BlockType::Choice),
            Just(BlockType::System),
        ]
    }

    pub fn arb_chat_role() -> impl Strategy<Value = ChatRole> {
        prop_oneof![
            Just(ChatRole::System),
            Just(ChatRole::User),
            Just(ChatRole::Assistant),
        ]
    }

    pub fn arb_tag() -> impl Strategy<Value = Tag> {
        prop_oneof![
            "[a-z_]{1,12}".prop_map(Tag::Npc),
            "[a-z_]{1,12}".prop_map(Tag::Faction),
            "[a-z_]{1,12}".prop_map(Tag::Hinge),
            "[a-z_]{1,12}".prop_map(Tag::Thread),
            Just(Tag::LowSignal),
        ]
    }

    /// A block with the given id and random everything else.
    pub fn arb_block(id: u64) -> impl Strategy<Value = Block> {
        (
            arb_block_type(),
            arb_chat_role(),
            "[a-z ]{1,60}",
            prop::collection::vec(arb_tag(), 0..3),
        )
            .prop_map(move |(kind, role, text, tags)| {
                Block::new(BlockId::new(id), kind, role, text).with_tags(tags)
            })
    }

    /// A transcript of up to `max_len` blocks with strictly increasing
    /// ids.
    pub fn arb_transcript(max_len: usize) -> impl Strategy<Value = Vec<Block>> {
        prop::collection::vec(
            (
                arb_block_type(),
                arb_chat_role(),
                "[a-z ]{1,60}",
                prop::collection::vec(arb_tag(), 0..3),
            ),
            0..max_len,
        )
        .prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (kind, role, text, tags))| {
                    Block::new(BlockId::new(i as u64 + 1), kind, role, text).with_tags(tags)
                })
                .collect()
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
