//! Configuration types

use crate::{ConfigError, RetrievalPreset, SectionKind, SentinelResult, StrainTier};
use serde::{Deserialize, Serialize};

// ============================================================================
// SECTION BUDGETS
// ============================================================================

/// Per-section maximum tokens.
///
/// `user_input` is both a budget and a hard reservation: the user's text
/// is always present in the emitted pack, truncated to this many tokens
/// if necessary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    pub system: u32,
    pub rules: u32,
    pub state_snapshot: u32,
    pub digest: u32,
    pub recent_window: u32,
    pub retrieval: u32,
    pub user_input: u32,
}

impl Budgets {
    /// Budget for one section.
    pub fn for_section(&self, section: SectionKind) -> u32 {
        match section {
            SectionKind::System => self.system,
            SectionKind::Rules => self.rules,
            SectionKind::StateSnapshot => self.state_snapshot,
            SectionKind::Digest => self.digest,
            SectionKind::RecentWindow => self.recent_window,
            SectionKind::Retrieval => self.retrieval,
            SectionKind::UserInput => self.user_input,
        }
    }

    /// Sum across all sections.
    pub fn total(&self) -> u32 {
        SectionKind::ALL
            .iter()
            .map(|s| self.for_section(*s))
            .sum()
    }

    /// Sum of the budgets in force for one build. The retrieval budget
    /// drops out of the denominator when the preset for the turn is off.
    pub fn allowed(&self, retrieval_included: bool) -> u32 {
        if retrieval_included {
            self.total()
        } else {
            self.total() - self.retrieval
        }
    }
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            system: 1_500,
            rules: 2_000,
            state_snapshot: 1_500,
            digest: 2_500,
            recent_window: 3_500,
            retrieval: 2_000,
            user_input: 500,
        }
    }
}

// ============================================================================
// WINDOW CONFIG
// ============================================================================

/// Target block counts per strain tier, bounded by `min_blocks` and
/// `max_blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub target_normal: usize,
    pub target_strain_i: usize,
    pub target_strain_ii: usize,
    pub target_strain_iii: usize,
    pub min_blocks: usize,
    pub max_blocks: usize,
    /// Maximum anchor hinge blocks per window
    pub anchor_quota: usize,
    /// Anchors older than this many sessions are covered by the digest
    /// instead of retained as blocks
    pub anchor_ttl_sessions: u32,
}

impl WindowConfig {
    /// Tier target clamped into `[min_blocks, max_blocks]`.
    pub fn target_for(&self, tier: StrainTier) -> usize {
        let raw = match tier {
            StrainTier::Normal => self.target_normal,
            StrainTier::StrainI => self.target_strain_i,
            StrainTier::StrainII => self.target_strain_ii,
            StrainTier::StrainIII => self.target_strain_iii,
        };
        raw.clamp(self.min_blocks, self.max_blocks)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            target_normal: 12,
            target_strain_i: 10,
            target_strain_ii: 8,
            target_strain_iii: 5,
            min_blocks: 4,
            max_blocks: 20,
            anchor_quota: 3,
            anchor_ttl_sessions: 8,
        }
    }
}

// ============================================================================
// RETRIEVAL CONFIG
// ============================================================================

/// Retrieval preset per strain tier. Explicit user-invoked retrieval
/// bypasses this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub preset_normal: RetrievalPreset,
    pub preset_strain_i: RetrievalPreset,
    pub preset_strain_ii: RetrievalPreset,
    pub preset_strain_iii: RetrievalPreset,
}

impl RetrievalConfig {
    pub fn preset_for(&self, tier: StrainTier) -> RetrievalPreset {
        match tier {
            StrainTier::Normal => self.preset_normal,
            StrainTier::StrainI => self.preset_strain_i,
            StrainTier::StrainII => self.preset_strain_ii,
            StrainTier::StrainIII => self.preset_strain_iii,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            preset_normal: RetrievalPreset::Standard,
            preset_strain_i: RetrievalPreset::Minimal,
            preset_strain_ii: RetrievalPreset::Off,
            preset_strain_iii: RetrievalPreset::Off,
        }
    }
}

// ============================================================================
// DIGEST CONFIG
// ============================================================================

/// Token caps for the four digest sub-sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsectionCaps {
    pub hinge_index: u32,
    pub standing_reasons: u32,
    pub npc_anchors: u32,
    pub open_threads: u32,
}

impl Default for SubsectionCaps {
    fn default() -> Self {
        Self {
            hinge_index: 800,
            standing_reasons: 600,
            npc_anchors: 600,
            open_threads: 500,
        }
    }
}

/// Digest update parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestConfig {
    /// How many trailing blocks feed the LLM update prompt
    pub k_blocks: usize,
    pub subsection_caps: SubsectionCaps,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            k_blocks: 20,
            subsection_caps: SubsectionCaps::default(),
        }
    }
}

// ============================================================================
// TOKENIZER CONFIG
// ============================================================================

/// Tokenizer fallback behavior when the BPE encoder cannot initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Bytes per token for the degraded-mode estimate. 4 for mixed
    /// English/UTF-8 prose; 3 when the conservatism bound cannot be
    /// guaranteed.
    pub fallback_divisor: u32,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            fallback_divisor: 4,
        }
    }
}

// ============================================================================
// STRAIN THRESHOLDS
// ============================================================================

/// Pressure thresholds separating the four strain tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrainThresholds {
    pub strain_i: f32,
    pub strain_ii: f32,
    pub strain_iii: f32,
}

impl Default for StrainThresholds {
    fn default() -> Self {
        Self {
            strain_i: 0.70,
            strain_ii: 0.85,
            strain_iii: 0.95,
        }
    }
}

// ============================================================================
// CHECKPOINT CONFIG
// ============================================================================

/// Checkpoint pruning behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Blocks kept in the live transcript after a checkpoint; everything
    /// older is archived
    pub retain_blocks: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { retain_blocks: 12 }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration for the context control core.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    pub budgets: Budgets,
    pub window: WindowConfig,
    pub retrieval: RetrievalConfig,
    pub digest: DigestConfig,
    pub tokenizer: TokenizerConfig,
    pub strain: StrainThresholds,
    pub checkpoint: CheckpointConfig,
}

impl SentinelConfig {
    /// Validate the configuration.
    ///
    /// Validates:
    /// - every section budget > 0
    /// - window targets are non-increasing as strain rises, with
    ///   `min_blocks <= max_blocks`
    /// - anchor quota > 0
    /// - digest `k_blocks` > 0
    /// - fallback divisor is 3 or 4
    /// - strain thresholds strictly increasing in (0, 1]
    pub fn validate(&self) -> SentinelResult<()> {
        for section in SectionKind::ALL {
            if self.budgets.for_section(section) == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("budgets.{}", section),
                    value: "0".to_string(),
                    reason: "section budget must be greater than 0".to_string(),
                }
                .into());
            }
        }

        if self.window.min_blocks == 0 || self.window.min_blocks > self.window.max_blocks {
            return Err(ConfigError::InvalidValue {
                field: "window.min_blocks".to_string(),
                value: self.window.min_blocks.to_string(),
                reason: format!(
                    "must be in 1..=max_blocks ({})",
                    self.window.max_blocks
                ),
            }
            .into());
        }

        let targets = [
            self.window.target_normal,
            self.window.target_strain_i,
            self.window.target_strain_ii,
            self.window.target_strain_iii,
        ];
        if targets.windows(2).any(|pair| pair[0] < pair[1]) {
            return Err(ConfigError::InvalidValue {
                field: "window.target_by_tier".to_string(),
                value: format!("{:?}", targets),
                reason: "targets must not increase as strain rises".to_string(),
            }
            .into());
        }

        if self.window.anchor_quota == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.anchor_quota".to_string(),
                value: "0".to_string(),
                reason: "anchor quota must be greater than 0".to_string(),
            }
            .into());
        }

        if self.digest.k_blocks == 0 {
            return Err(ConfigError::InvalidValue {
                field: "digest.k_blocks".to_string(),
                value: "0".to_string(),
                reason: "k_blocks must be greater than 0".to_string(),
            }
            .into());
        }

        if !matches!(self.tokenizer.fallback_divisor, 3 | 4) {
            return Err(ConfigError::InvalidValue {
                field: "tokenizer.fallback_divisor".to_string(),
                value: self.tokenizer.fallback_divisor.to_string(),
                reason: "fallback divisor must be 3 or 4".to_string(),
            }
            .into());
        }

        let t = &self.strain;
        let ordered = 0.0 < t.strain_i && t.strain_i < t.strain_ii && t.strain_ii < t.strain_iii;
        if !ordered || t.strain_iii > 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "strain.thresholds".to_string(),
                value: format!("{}/{}/{}", t.strain_i, t.strain_ii, t.strain_iii),
                reason: "thresholds must be strictly increasing within (0, 1]".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
