//! Prompt pack assembly
//!
//! The packer is a stateless function over references: it owns nothing,
//! consults only in-memory state and the tokenizer, and never suspends.
//! One build runs the plan at most twice - once at the provisional tier
//! and once more if the measured pressure escalates it.

use crate::source::SectionSource;
use crate::strain::{classify, pressure};
use crate::trace::{PackTrace, PromptPack, SectionTrace, TraceWarning, WarningKind};
use crate::window::{Window, WindowSelection};
use sentinel_core::truncate_to_budget;
use chrono::Utc;
use sentinel_core::{
    Budgets, ChatMessage, RetrievalPreset, SectionKind, SentinelConfig, StrainTier, TokenCounter,
};
use tracing::debug;

/// Tail-truncate one section to its budget, recording usage and any
/// truncation warning.
fn bounded_section(
    counter: &dyn TokenCounter,
    budgets: &Budgets,
    sections: &mut Vec<SectionTrace>,
    warnings: &mut Vec<TraceWarning>,
    kind: SectionKind,
    raw: &str,
) -> String {
    let budget = budgets.for_section(kind);
    let (text, used, trimmed) = truncate_to_budget(raw, budget, counter);
    if trimmed > 0 {
        warnings.push(TraceWarning::new(
            WarningKind::SectionTruncated,
            format!("{} cut by {} tokens to fit {}", kind, trimmed, budget),
        ));
    }
    sections.push(SectionTrace {
        section: kind,
        used_tokens: used,
        budget_tokens: budget,
        trimmed_tokens: trimmed,
    });
    text
}

// ============================================================================
// BUILD OPTIONS
// ============================================================================

/// Per-build switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Force a tier instead of classifying; used by golden tests. A
    /// forced tier disables re-planning.
    pub tier_hint: Option<StrainTier>,
    /// The user explicitly invoked retrieval this turn; retrieval is
    /// attempted even under StrainII+.
    pub active_retrieval: bool,
}

// ============================================================================
// PACKER
// ============================================================================

/// One tier's worth of planned sections.
struct Plan {
    sections: Vec<SectionTrace>,
    head_text: String,
    context_text: String,
    window_sel: WindowSelection,
    retrieval_included: bool,
    used: u32,
    warnings: Vec<TraceWarning>,
}

/// Assembles one prompt pack from bounded sections.
pub struct Packer<'a> {
    config: &'a SentinelConfig,
    counter: &'a dyn TokenCounter,
    source: &'a dyn SectionSource,
    window: &'a Window,
    digest_text: &'a str,
}

impl<'a> Packer<'a> {
    pub fn new(
        config: &'a SentinelConfig,
        counter: &'a dyn TokenCounter,
        source: &'a dyn SectionSource,
        window: &'a Window,
        digest_text: &'a str,
    ) -> Self {
        Self {
            config,
            counter,
            source,
            window,
            digest_text,
        }
    }

    /// Build the prompt pack and its trace.
    ///
    /// Deterministic: identical transcript, digest, snapshot, user input
    /// and options produce a byte-identical pack.
    pub fn build(&self, user_input: &str, options: &BuildOptions) -> (PromptPack, PackTrace) {
        let budgets = &self.config.budgets;

        // The user's input is a hard reservation: present always,
        // truncated from the end when it exceeds its own budget.
        let (user_text, user_tokens, user_trimmed) =
            truncate_to_budget(user_input, budgets.user_input, self.counter);

        let provisional = match options.tier_hint {
            Some(forced) => forced,
            None => self.provisional_tier(user_tokens),
        };

        let mut warnings: Vec<TraceWarning> = Vec::new();
        let mut tier = provisional;
        let mut replanned = false;

        let (plan, final_pressure, emitted_tier) = loop {
            let plan = self.plan(tier, user_tokens, user_trimmed, options);
            let measured = pressure(plan.used, budgets.allowed(plan.retrieval_included));
            if options.tier_hint.is_some() {
                break (plan, measured, tier);
            }
            let assessed = classify(measured, &self.config.strain);
            if assessed > tier {
                if !replanned {
                    // Discard the stale plan and run once more at the
                    // escalated tier.
                    replanned = true;
                    warnings.push(TraceWarning::new(
                        WarningKind::TierEscalated,
                        format!("re-planning {} -> {}", tier, assessed),
                    ));
                    tier = assessed;
                    continue;
                }
                // A second escalation is accepted as-is; this bounds the
                // loop at two passes.
                warnings.push(TraceWarning::new(
                    WarningKind::TierEscalated,
                    format!("second escalation {} -> {} accepted", tier, assessed),
                ));
            }
            // The emitted tier is always the measured classification of
            // the final assembly, even when it sits below the tier the
            // sections were planned at.
            break (plan, measured, assessed);
        };
        warnings.extend(plan.warnings.iter().cloned());

        // Assembly: one system message for System+Rules, one context
        // message for StateSnapshot+Digest+Retrieval, the window's
        // messages in order, the user input last.
        let mut messages: Vec<ChatMessage> = Vec::new();
        if !plan.head_text.is_empty() {
            messages.push(ChatMessage::system(plan.head_text.clone()));
        }
        if !plan.context_text.is_empty() {
            messages.push(ChatMessage::system(plan.context_text.clone()));
        }
        messages.extend(plan.window_sel.messages.iter().cloned());
        messages.push(ChatMessage::user(user_text));

        let pack = PromptPack {
            messages,
            total_tokens: plan.used,
            tier: emitted_tier,
        };

        let trace = PackTrace {
            built_at: Utc::now(),
            sections: plan.sections,
            retained_blocks: plan.window_sel.retained.clone(),
            dropped_blocks: plan.window_sel.dropped.clone(),
            anchors_retained: plan.window_sel.anchor_count,
            pressure: final_pressure,
            tier: emitted_tier,
            replanned,
            warnings,
            pack_fingerprint: pack.fingerprint(),
        };

        debug!(
            tier = %emitted_tier,
            pressure = final_pressure,
            used = plan.used,
            replanned,
            "pack assembled"
        );

        (pack, trace)
    }

    /// Provisional pressure before any trimming: raw section sizes,
    /// standard retrieval, and the window at tier-Normal's block count.
    fn provisional_tier(&self, user_tokens: u32) -> StrainTier {
        let budgets = &self.config.budgets;
        let used = self.counter.count(&self.source.system_text())
            + self.counter.count(&self.source.rules_text(StrainTier::Normal))
            + self.counter.count(&self.source.state_snapshot())
            + self.counter.count(self.digest_text)
            + self
                .counter
                .count(&self.source.retrieval_text(RetrievalPreset::Standard))
            + self.window.untrimmed_tokens(
                self.config.window.target_for(StrainTier::Normal),
                self.counter,
            )
            + user_tokens;
        classify(pressure(used, budgets.allowed(true)), &self.config.strain)
    }

    fn plan(
        &self,
        tier: StrainTier,
        user_tokens: u32,
        user_trimmed: u32,
        options: &BuildOptions,
    ) -> Plan {
        let budgets = &self.config.budgets;
        let mut warnings: Vec<TraceWarning> = Vec::new();
        let mut sections: Vec<SectionTrace> = Vec::new();

        let system_text = bounded_section(
            self.counter,
            budgets,
            &mut sections,
            &mut warnings,
            SectionKind::System,
            &self.source.system_text(),
        );
        let rules_text = bounded_section(
            self.counter,
            budgets,
            &mut sections,
            &mut warnings,
            SectionKind::Rules,
            &self.source.rules_text(tier),
        );
        let snapshot_text = bounded_section(
            self.counter,
            budgets,
            &mut sections,
            &mut warnings,
            SectionKind::StateSnapshot,
            &self.source.state_snapshot(),
        );
        let digest_text = bounded_section(
            self.counter,
            budgets,
            &mut sections,
            &mut warnings,
            SectionKind::Digest,
            self.digest_text,
        );

        // The window defers to its own selection algorithm instead of
        // tail truncation.
        let window_sel = self.window.select(
            budgets.recent_window,
            tier,
            self.counter,
            self.source,
            &self.config.window,
        );
        if window_sel.overrun {
            warnings.push(TraceWarning::new(
                WarningKind::WindowOverrun,
                format!(
                    "minimum set holds {} tokens against budget {}",
                    window_sel.tokens, budgets.recent_window
                ),
            ));
        }
        sections.push(SectionTrace {
            section: SectionKind::RecentWindow,
            used_tokens: window_sel.tokens,
            budget_tokens: budgets.recent_window,
            trimmed_tokens: 0,
        });

        // Retrieval: preset by tier for passive retrieval; an explicit
        // user invocation is attempted even under StrainII+, at minimal
        // depth when the tier preset is off.
        let passive = self.config.retrieval.preset_for(tier);
        let preset = if options.active_retrieval && passive == RetrievalPreset::Off {
            RetrievalPreset::Minimal
        } else {
            passive
        };
        let retrieval_included = preset != RetrievalPreset::Off;
        let retrieval_text = if retrieval_included {
            bounded_section(
                self.counter,
                budgets,
                &mut sections,
                &mut warnings,
                SectionKind::Retrieval,
                &self.source.retrieval_text(preset),
            )
        } else {
            if tier >= StrainTier::StrainII {
                warnings.push(TraceWarning::new(
                    WarningKind::RetrievalSkipped,
                    format!("passive retrieval suppressed at {}", tier),
                ));
            }
            sections.push(SectionTrace {
                section: SectionKind::Retrieval,
                used_tokens: 0,
                budget_tokens: budgets.retrieval,
                trimmed_tokens: 0,
            });
            String::new()
        };

        if user_trimmed > 0 {
            warnings.push(TraceWarning::new(
                WarningKind::UserInputTruncated,
                format!("user input cut by {} tokens", user_trimmed),
            ));
        }
        sections.push(SectionTrace {
            section: SectionKind::UserInput,
            used_tokens: user_tokens,
            budget_tokens: budgets.user_input,
            trimmed_tokens: user_trimmed,
        });

        let used: u32 = sections.iter().map(|s| s.used_tokens).sum();

        // An explicit retrieval that lifts pressure past the current
        // tier is included anyway; the caller decides what to do with
        // the warning.
        if retrieval_included && options.active_retrieval && tier >= StrainTier::StrainII {
            let with_retrieval = classify(
                pressure(used, budgets.allowed(true)),
                &self.config.strain,
            );
            if with_retrieval > tier {
                warnings.push(TraceWarning::new(
                    WarningKind::RetrievalWouldEscalate,
                    format!("active retrieval lifts tier {} -> {}", tier, with_retrieval),
                ));
            }
        }

        let mut head_text = system_text;
        if !rules_text.is_empty() {
            if !head_text.is_empty() {
                head_text.push_str("\n\n");
            }
            head_text.push_str(&rules_text);
        }

        let mut context_parts: Vec<String> = Vec::new();
        if !snapshot_text.is_empty() {
            context_parts.push(format!("State Snapshot:\n{}", snapshot_text));
        }
        if !digest_text.is_empty() {
            context_parts.push(format!("Digest:\n{}", digest_text));
        }
        if !retrieval_text.is_empty() {
            context_parts.push(format!("Retrieval:\n{}", retrieval_text));
        }
        let context_text = if context_parts.is_empty() {
            String::new()
        } else {
            format!("[context]\n{}", context_parts.join("\n\n"))
        };

        Plan {
            sections,
            head_text,
            context_text,
            window_sel,
            retrieval_included,
            used,
            warnings,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
