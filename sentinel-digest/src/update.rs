//! Digest update paths
//!
//! Two ways to fold new transcript into the digest: an LLM path that is
//! validated against the schema and sub-section caps, and a mechanical
//! template path that never fails. The template path is the authority:
//! any LLM failure recovers locally by running it instead.

use crate::model::{
    Digest, HingeEntry, StandingEntry, ThreadEntry, HEADING_ANCHORS, HEADING_HINGES,
    HEADING_STANDINGS, HEADING_THREADS,
};
use sentinel_core::{
    truncate_to_budget, Block, ChatMessage, DigestConfig, DigestUpdateError, TokenCounter,
};
use sentinel_llm::{call_bounded, CallOptions, LlmCaller};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// TEMPLATE PATH
// ============================================================================

/// Compress a block's text into one line for a digest entry.
fn entry_summary(text: &str) -> String {
    let trimmed = text.trim();
    let sentence_end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8());
    let summary = match sentence_end {
        Some(end) => &trimmed[..end],
        None => trimmed,
    };
    // One line, bounded length
    let mut line: String = summary.chars().take(160).collect();
    if let Some(cut) = line.find('\n') {
        line.truncate(cut);
    }
    line
}

/// Deterministic digest update. Appends hinges missing from the index,
/// refreshes faction standing reasons, surfaces new thread triggers, and
/// preserves NPC anchors verbatim. Never fails.
pub fn update_template(prev: &Digest, new_blocks: &[Block]) -> Digest {
    let mut next = prev.clone();

    for block in new_blocks {
        if let Some(hinge) = block.hinge_id() {
            if !next.covers_hinge(hinge) {
                next.hinges.push(HingeEntry {
                    id: hinge.to_string(),
                    summary: entry_summary(&block.text),
                });
            }
        }

        for faction in block.faction_names() {
            let reason = entry_summary(&block.text);
            match next.standings.iter_mut().find(|s| s.faction == faction) {
                Some(standing) => standing.reason = reason,
                None => next.standings.push(StandingEntry {
                    faction: faction.to_string(),
                    reason,
                }),
            }
        }

        for thread in block.thread_names() {
            if !next.threads.iter().any(|t| t.name == thread) {
                next.threads.push(ThreadEntry {
                    name: thread.to_string(),
                    trigger: entry_summary(&block.text),
                });
            }
        }
    }

    next
}

// ============================================================================
// LLM PATH
// ============================================================================

/// Build the bounded update prompt: schema instruction, previous digest,
/// last session recap, and the trailing blocks.
pub fn build_update_prompt(
    prev: &Digest,
    last_session_summary: &str,
    last_blocks: &[Block],
    config: &DigestConfig,
    digest_budget: u32,
    counter: &dyn TokenCounter,
) -> Vec<ChatMessage> {
    let caps = &config.subsection_caps;
    let instruction = format!(
        "Update the campaign digest. Reply with the digest text only, in exactly this shape:\n\
         digest-schema: 1\n\
         {HEADING_HINGES} (every hinge ever recorded, one `- [id] summary` line each, at most {} tokens)\n\
         {HEADING_STANDINGS} (one `- faction: reason` line per non-neutral faction, at most {} tokens)\n\
         {HEADING_ANCHORS} (durable `- anchor` lines only, at most {} tokens)\n\
         {HEADING_THREADS} (one `- thread (trigger: condition)` line per open thread, at most {} tokens)\n\
         Keep every existing hinge. Total output stays under {} tokens.",
        caps.hinge_index, caps.standing_reasons, caps.npc_anchors, caps.open_threads, digest_budget,
    );

    let (prev_text, _, _) = truncate_to_budget(&prev.render(), digest_budget, counter);

    let mut body = String::new();
    body.push_str("Previous digest:\n");
    body.push_str(&prev_text);
    if !last_session_summary.is_empty() {
        body.push_str("\n\nLast session:\n");
        body.push_str(last_session_summary);
    }
    body.push_str("\n\nRecent blocks:\n");
    for block in last_blocks.iter().rev().take(config.k_blocks).rev() {
        let tags = if block.tags.is_empty() {
            String::new()
        } else {
            format!(
                " [{}]",
                block
                    .tags
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        body.push_str(&format!(
            "{} ({}){}: {}\n",
            block.role_hint, block.kind, tags, block.text
        ));
    }

    vec![ChatMessage::system(instruction), ChatMessage::user(body)]
}

/// Validate LLM output against the digest schema.
///
/// Checks all four headings in order, each sub-section against its cap,
/// the total against the section budget, and that every required hinge
/// id survived.
pub fn validate_digest_text(
    text: &str,
    config: &DigestConfig,
    digest_budget: u32,
    counter: &dyn TokenCounter,
    required_hinges: &[String],
) -> Result<(), DigestUpdateError> {
    let invalid = |reason: String| DigestUpdateError::SchemaInvalid { reason };

    let positions: Vec<usize> = [
        HEADING_HINGES,
        HEADING_STANDINGS,
        HEADING_ANCHORS,
        HEADING_THREADS,
    ]
    .iter()
    .map(|heading| {
        text.find(heading)
            .ok_or_else(|| invalid(format!("missing heading '{}'", heading)))
    })
    .collect::<Result<_, _>>()?;

    if positions.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(invalid("headings out of order".to_string()));
    }

    let caps = &config.subsection_caps;
    let slices = [
        (&text[positions[0]..positions[1]], caps.hinge_index, HEADING_HINGES),
        (&text[positions[1]..positions[2]], caps.standing_reasons, HEADING_STANDINGS),
        (&text[positions[2]..positions[3]], caps.npc_anchors, HEADING_ANCHORS),
        (&text[positions[3]..], caps.open_threads, HEADING_THREADS),
    ];
    for (slice, cap, heading) in slices {
        let used = counter.count(slice);
        if used > cap {
            return Err(invalid(format!(
                "'{}' holds {} tokens over its cap of {}",
                heading, used, cap
            )));
        }
    }

    let total = counter.count(text);
    if total > digest_budget {
        return Err(invalid(format!(
            "digest holds {} tokens over its budget of {}",
            total, digest_budget
        )));
    }

    let parsed = Digest::parse(text);
    for hinge in required_hinges {
        if !parsed.covers_hinge(hinge) {
            return Err(invalid(format!("hinge '{}' missing from index", hinge)));
        }
    }

    Ok(())
}

/// LLM digest update. Returns the parsed digest on success; any failure
/// surfaces as a [`DigestUpdateError`] for the caller to recover from.
pub async fn update_via_llm(
    caller: &dyn LlmCaller,
    counter: &dyn TokenCounter,
    config: &DigestConfig,
    digest_budget: u32,
    prev: &Digest,
    last_session_summary: &str,
    last_blocks: &[Block],
    required_hinges: &[String],
    options: &CallOptions,
) -> Result<Digest, DigestUpdateError> {
    let messages = build_update_prompt(
        prev,
        last_session_summary,
        last_blocks,
        config,
        digest_budget,
        counter,
    );
    let text = call_bounded(caller, &messages, options).await?;
    validate_digest_text(&text, config, digest_budget, counter, required_hinges)?;
    Ok(Digest::parse(&text))
}

// ============================================================================
// COMBINED UPDATE
// ============================================================================

/// Which path produced the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestPath {
    Llm,
    Template,
}

/// Outcome of one digest update.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestUpdate {
    pub digest: Digest,
    pub path: DigestPath,
    /// The error that forced the template fallback, when one did
    pub fallback_reason: Option<DigestUpdateError>,
}

/// Run the LLM path and fall back to the template path on any failure.
///
/// The fallback is a complete replacement computed from `all_blocks`, so
/// a failed LLM update never leaves a partially updated digest. This
/// function cannot fail.
pub async fn update_digest(
    caller: &dyn LlmCaller,
    counter: &dyn TokenCounter,
    config: &DigestConfig,
    digest_budget: u32,
    prev: &Digest,
    last_session_summary: &str,
    all_blocks: &[Block],
    options: &CallOptions,
) -> DigestUpdate {
    let start = all_blocks.len().saturating_sub(config.k_blocks);
    let last_blocks = &all_blocks[start..];

    let mut required: Vec<String> = prev.hinges.iter().map(|h| h.id.clone()).collect();
    for block in all_blocks {
        if let Some(hinge) = block.hinge_id() {
            if !required.iter().any(|r| r == hinge) {
                required.push(hinge.to_string());
            }
        }
    }

    match update_via_llm(
        caller,
        counter,
        config,
        digest_budget,
        prev,
        last_session_summary,
        last_blocks,
        &required,
        options,
    )
    .await
    {
        Ok(mut digest) => {
            digest.trim_to_budget(digest_budget, counter);
            DigestUpdate {
                digest,
                path: DigestPath::Llm,
                fallback_reason: None,
            }
        }
        Err(err) => {
            warn!(error = %err, "digest LLM update failed; running template path");
            let mut digest = update_template(prev, all_blocks);
            digest.trim_to_budget(digest_budget, counter);
            DigestUpdate {
                digest,
                path: DigestPath::Template,
                fallback_reason: Some(err),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
