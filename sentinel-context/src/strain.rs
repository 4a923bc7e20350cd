//! Memory strain classification
//!
//! Pure functions over token usage. All storage lives in the packer's
//! trace; nothing here holds state.

use sentinel_core::{Budgets, SectionKind, StrainThresholds, StrainTier};

/// Pressure is used tokens over the budgets in force. An empty
/// denominator reads as full pressure rather than dividing by zero.
pub fn pressure(used_tokens: u32, allowed_tokens: u32) -> f32 {
    if allowed_tokens == 0 {
        return 1.0;
    }
    used_tokens as f32 / allowed_tokens as f32
}

/// Classify a pressure reading into a strain tier.
pub fn classify(pressure: f32, thresholds: &StrainThresholds) -> StrainTier {
    if pressure >= thresholds.strain_iii {
        StrainTier::StrainIII
    } else if pressure >= thresholds.strain_ii {
        StrainTier::StrainII
    } else if pressure >= thresholds.strain_i {
        StrainTier::StrainI
    } else {
        StrainTier::Normal
    }
}

/// Pressure from measured per-section usage against the budget table.
///
/// `retrieval_included` mirrors the turn's retrieval decision: a turn
/// with retrieval off measures pressure against the smaller denominator.
pub fn pressure_from(
    sections: &[(SectionKind, u32)],
    budgets: &Budgets,
    retrieval_included: bool,
) -> f32 {
    let used: u32 = sections.iter().map(|(_, tokens)| tokens).sum();
    pressure(used, budgets.allowed(retrieval_included))
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
