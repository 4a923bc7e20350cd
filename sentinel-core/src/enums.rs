//! Enumerations shared across the SENTINEL workspace

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// BLOCK TYPE
// ============================================================================

/// Kind of a transcript block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    /// Prose narration from the GM
    Narrative,
    /// Discovered facts, clues, reconnaissance results
    Intel,
    /// A decision point offered to or taken by the player
    Choice,
    /// Mechanical bookkeeping (dice, status lines, meta notices)
    System,
}

impl BlockType {
    /// Stable string representation used in traces and archives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Narrative => "narrative",
            Self::Intel => "intel",
            Self::Choice => "choice",
            Self::System => "system",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CHAT ROLE
// ============================================================================

/// Chat role a block occupies when assembled into a prompt pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    /// Wire-format role name for chat-completions backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION KIND
// ============================================================================

/// Named slot in the assembled pack. The emission order is fixed and is
/// the declaration order here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKind {
    System,
    Rules,
    StateSnapshot,
    Digest,
    RecentWindow,
    Retrieval,
    UserInput,
}

impl SectionKind {
    /// All sections in pack emission order.
    pub const ALL: [SectionKind; 7] = [
        SectionKind::System,
        SectionKind::Rules,
        SectionKind::StateSnapshot,
        SectionKind::Digest,
        SectionKind::RecentWindow,
        SectionKind::Retrieval,
        SectionKind::UserInput,
    ];

    /// Stable name used in traces and debug output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Rules => "rules",
            Self::StateSnapshot => "state_snapshot",
            Self::Digest => "digest",
            Self::RecentWindow => "recent_window",
            Self::Retrieval => "retrieval",
            Self::UserInput => "user_input",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// STRAIN TIER
// ============================================================================

/// Discrete memory-strain level derived from the used/allowed token
/// ratio. Ordered: `Normal < StrainI < StrainII < StrainIII`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum StrainTier {
    #[default]
    Normal,
    StrainI,
    StrainII,
    StrainIII,
}

impl StrainTier {
    /// Stable name used in traces and debug output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::StrainI => "strain_i",
            Self::StrainII => "strain_ii",
            Self::StrainIII => "strain_iii",
        }
    }

    /// Whether narrative guidance rules are cut at this tier.
    pub fn cuts_narrative_guidance(&self) -> bool {
        *self >= Self::StrainII
    }

    /// Whether the window replaces its oldest half with a scene recap.
    pub fn uses_scene_recap(&self) -> bool {
        *self >= Self::StrainII
    }
}

impl fmt::Display for StrainTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RETRIEVAL PRESET
// ============================================================================

/// Bound on how much retrieval text the packer will accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalPreset {
    /// No retrieval text at all
    Off,
    /// 1 lore + 1 campaign passage
    Minimal,
    /// 2 lore + 2 campaign passages
    Standard,
    /// Everything the retriever found, still bounded by the section budget
    Deep,
}

impl RetrievalPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Deep => "deep",
        }
    }
}

impl fmt::Display for RetrievalPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DROP REASON
// ============================================================================

/// Why a candidate block was left out of the emitted window.
///
/// Reasons cover evictions from the candidate set only; blocks that were
/// never candidates (older than the window and not anchors) are not
/// listed block-by-block in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Low-signal system block dropped first under pressure
    LowSignal,
    /// Oldest narrative block dropped under pressure
    OldestNarrative,
    /// Oldest intel block dropped under pressure
    OldestIntel,
    /// Oldest choice block dropped under pressure
    OldestChoice,
    /// Anchor hinge evicted after all other classes were exhausted
    AnchorEvicted,
    /// Anchor hinge beyond the per-window quota
    AnchorQuota,
    /// Anchor hinge older than the TTL; covered by the digest instead
    AnchorExpired,
    /// Replaced by the scene recap paragraph
    RecapReplaced,
    /// Shed while collapsing to the minimum set under extreme pressure
    WindowOverflow,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowSignal => "low_signal",
            Self::OldestNarrative => "oldest_narrative",
            Self::OldestIntel => "oldest_intel",
            Self::OldestChoice => "oldest_choice",
            Self::AnchorEvicted => "anchor_evicted",
            Self::AnchorQuota => "anchor_quota",
            Self::AnchorExpired => "anchor_expired",
            Self::RecapReplaced => "recap_replaced",
            Self::WindowOverflow => "window_overflow",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
