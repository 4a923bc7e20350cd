//! Section source capability

use sentinel_core::{Block, RetrievalPreset, StrainTier};

/// Capability the packer polls for raw section text.
///
/// All methods are synchronous: pack assembly never suspends. The
/// collaborator behind this trait owns layered rules, the campaign
/// snapshot, and retrieval; the packer only sees text and enforces
/// budgets on it.
pub trait SectionSource: Send + Sync {
    /// Raw text of the `System` section.
    fn system_text(&self) -> String;

    /// Raw text of the `Rules` section for the given tier: the core
    /// rules layer always, the narrative guidance layer only below
    /// StrainII.
    fn rules_text(&self, tier: StrainTier) -> String;

    /// Human-readable campaign state summary.
    fn state_snapshot(&self) -> String;

    /// Retrieval passages bounded by the preset. `Off` must return an
    /// empty string.
    fn retrieval_text(&self, preset: RetrievalPreset) -> String;

    /// One-paragraph recap standing in for the given old blocks when the
    /// window compresses its oldest half under strain.
    fn scene_recap(&self, old_blocks: &[Block]) -> String;
}
