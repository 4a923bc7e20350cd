//! Prompt pack and per-build trace types

use sentinel_core::{
    pack_fingerprint, BlockId, ChatMessage, DropReason, SectionKind, StrainTier, Timestamp,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// PROMPT PACK
// ============================================================================

/// The fully assembled, ordered list of chat messages for one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPack {
    /// Messages in emission order
    pub messages: Vec<ChatMessage>,
    /// Content tokens across all sections (label overhead excluded)
    pub total_tokens: u32,
    /// Tier the pack was assembled under
    pub tier: StrainTier,
}

impl PromptPack {
    /// Canonical rendering of the pack, used for fingerprinting and
    /// golden comparisons.
    pub fn rendered(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            out.push_str(message.role.as_str());
            out.push_str(": ");
            out.push_str(&message.text);
            out.push('\n');
        }
        out
    }

    /// SHA-256 fingerprint of the canonical rendering.
    pub fn fingerprint(&self) -> String {
        pack_fingerprint(&self.rendered())
    }
}

// ============================================================================
// TRACE
// ============================================================================

/// Per-section accounting for one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionTrace {
    pub section: SectionKind,
    pub used_tokens: u32,
    pub budget_tokens: u32,
    /// Tokens cut from this section's raw text to fit the budget
    pub trimmed_tokens: u32,
}

/// Machine-readable warning categories surfaced in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// A section's raw text exceeded its budget and was tail-truncated
    SectionTruncated,
    /// The user's input exceeded its reservation and was truncated
    UserInputTruncated,
    /// Passive retrieval skipped under StrainII+
    RetrievalSkipped,
    /// Active retrieval included even though it escalates the tier
    RetrievalWouldEscalate,
    /// The tier escalated mid-build
    TierEscalated,
    /// The window's minimum set exceeds its budget
    WindowOverrun,
}

/// One warning with its human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceWarning {
    pub kind: WarningKind,
    pub detail: String,
}

impl TraceWarning {
    pub fn new(kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Diagnostic record of one `build` call. Backs the debug command and
/// golden tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackTrace {
    pub built_at: Timestamp,
    /// Per-section usage in emission order
    pub sections: Vec<SectionTrace>,
    /// Window blocks that made it into the pack, chronological
    pub retained_blocks: Vec<BlockId>,
    /// Candidate blocks left out, with reasons
    pub dropped_blocks: Vec<(BlockId, DropReason)>,
    /// Anchor hinge blocks retained from beyond the window
    pub anchors_retained: usize,
    /// used / allowed after final assembly
    pub pressure: f32,
    /// Tier the pack was emitted at
    pub tier: StrainTier,
    /// Whether the build re-planned after a mid-build escalation
    pub replanned: bool,
    pub warnings: Vec<TraceWarning>,
    /// SHA-256 fingerprint of the emitted pack
    pub pack_fingerprint: String,
}

impl PackTrace {
    /// Total used tokens across sections.
    pub fn used_tokens(&self) -> u32 {
        self.sections.iter().map(|s| s.used_tokens).sum()
    }

    /// Usage entry for one section, if it was part of the build.
    pub fn section(&self, kind: SectionKind) -> Option<&SectionTrace> {
        self.sections.iter().find(|s| s.section == kind)
    }

    /// Whether a warning of the given kind was recorded.
    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

// ============================================================================
// TESTS
// ============================================================================
