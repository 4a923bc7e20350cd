//! Transcript block and chat message types

use crate::{BlockId, BlockType, ChatRole, SessionIndex, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// TAGS
// ============================================================================

/// Typed tag attached to a transcript block.
///
/// The four known prefixes (`npc:`, `faction:`, `hinge:`, `thread:`)
/// drive retention and digest policies. `low_signal` marks expendable
/// bookkeeping. Anything else is preserved but not prioritized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// `npc:<name>` - a durable character reference
    Npc(String),
    /// `faction:<name>` - a faction standing reference
    Faction(String),
    /// `hinge:<id>` - an irreversible narrative choice
    Hinge(String),
    /// `thread:<name>` - an open plot thread
    Thread(String),
    /// `low_signal` - first in line to be dropped under pressure
    LowSignal,
    /// Any other tag, preserved verbatim
    Other(String),
}

impl Tag {
    /// Parse a raw tag string into its typed form.
    pub fn parse(raw: &str) -> Self {
        if raw == "low_signal" {
            return Self::LowSignal;
        }
        match raw.split_once(':') {
            Some(("npc", rest)) if !rest.is_empty() => Self::Npc(rest.to_string()),
            Some(("faction", rest)) if !rest.is_empty() => Self::Faction(rest.to_string()),
            Some(("hinge", rest)) if !rest.is_empty() => Self::Hinge(rest.to_string()),
            Some(("thread", rest)) if !rest.is_empty() => Self::Thread(rest.to_string()),
            _ => Self::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Npc(name) => write!(f, "npc:{}", name),
            Self::Faction(name) => write!(f, "faction:{}", name),
            Self::Hinge(id) => write!(f, "hinge:{}", id),
            Self::Thread(name) => write!(f, "thread:{}", name),
            Self::LowSignal => f.write_str("low_signal"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

// ============================================================================
// BLOCK
// ============================================================================

/// One unit of transcript: id, timestamp, kind, text, tags, role hint.
///
/// Blocks are appended by the narrative collaborator and never rewritten;
/// the text is immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Monotonically increasing id, stable across the session
    pub id: BlockId,
    /// Wall time, for ordering ties and age-based policies
    pub timestamp: Timestamp,
    /// Block kind
    pub kind: BlockType,
    /// Block content
    pub text: String,
    /// Typed tags
    pub tags: Vec<Tag>,
    /// Chat role the text occupies when assembled
    pub role_hint: ChatRole,
}

impl Block {
    /// Create a new block with the current wall time and no tags.
    pub fn new(id: BlockId, kind: BlockType, role_hint: ChatRole, text: impl Into<String>) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            kind,
            text: text.into(),
            tags: Vec::new(),
            role_hint,
        }
    }

    /// Set the tags.
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Add one tag.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Set an explicit timestamp.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The hinge id carried by this block, if any.
    pub fn hinge_id(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| match t {
            Tag::Hinge(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Faction names referenced by this block's tags.
    pub fn faction_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|t| match t {
            Tag::Faction(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Thread names referenced by this block's tags.
    pub fn thread_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|t| match t {
            Tag::Thread(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// NPC names referenced by this block's tags.
    pub fn npc_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|t| match t {
            Tag::Npc(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Whether this block is expendable bookkeeping: tagged `low_signal`,
    /// or a `System` block carrying no other tags.
    pub fn is_low_signal(&self) -> bool {
        self.tags.contains(&Tag::LowSignal)
            || (self.kind == BlockType::System
                && !self
                    .tags
                    .iter()
                    .any(|t| !matches!(t, Tag::LowSignal | Tag::Other(_))))
    }
}

/// A block paired with the session it was appended in. Sessions are the
/// unit of the anchor TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBlock {
    pub block: Block,
    pub session: SessionIndex,
}

// ============================================================================
// CHAT MESSAGE
// ============================================================================

/// One `(role, text)` entry of an assembled prompt pack or an outgoing
/// LLM call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ChatRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, text)
    }
}

// ============================================================================
// TESTS
// ============================================================================
