//! Rolling transcript window with anchor retention
//!
//! The window owns the ordered transcript and produces the RecentWindow
//! section under a token budget. Selection is deterministic: ties inside
//! a drop class break by ascending id, and the same transcript always
//! yields the same retained set.

use crate::source::SectionSource;
use sentinel_core::{
    AppendError, Block, BlockId, BlockType, ChatMessage, ChatRole, DropReason, SessionBlock,
    SessionIndex, StrainTier, TokenCounter, WindowConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Render one block the way it appears in the emitted window: prefixed
/// by its role hint so the assembler can map it onto a chat message.
fn render_line(block: &Block) -> String {
    format!("{}: {}", block.role_hint, block.text)
}

// ============================================================================
// SELECTION RESULT
// ============================================================================

/// Result of one window selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSelection {
    /// Retained content in chronological order, recap paragraph first
    /// when one was produced
    pub messages: Vec<ChatMessage>,
    /// Ids of retained blocks, chronological
    pub retained: Vec<BlockId>,
    /// Candidate blocks left out, with reasons, ascending by id
    pub dropped: Vec<(BlockId, DropReason)>,
    /// Tokens of the emitted window content
    pub tokens: u32,
    /// Whether a scene recap paragraph stands in for the oldest half
    pub recap_used: bool,
    /// Anchor hinge blocks retained from beyond the window
    pub anchor_count: usize,
    /// The minimum set still exceeds the budget
    pub overrun: bool,
}

impl WindowSelection {
    /// Rendered window text: one role-prefixed line per retained
    /// message, chronological.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn empty() -> Self {
        Self {
            messages: Vec::new(),
            retained: Vec::new(),
            dropped: Vec::new(),
            tokens: 0,
            recap_used: false,
            anchor_count: 0,
            overrun: false,
        }
    }
}

// ============================================================================
// WINDOW
// ============================================================================

/// Ordered transcript log and window selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Window {
    blocks: Vec<SessionBlock>,
    session: SessionIndex,
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block. Rejects ids that do not strictly increase; a
    /// rejected append leaves the window untouched.
    pub fn append(&mut self, block: Block) -> Result<(), AppendError> {
        let last = self.blocks.last().map(|sb| sb.block.id);
        if last.is_some_and(|last| block.id <= last) {
            return Err(AppendError::NonMonotonicId {
                last,
                got: block.id,
            });
        }
        self.blocks.push(SessionBlock {
            block,
            session: self.session,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks, oldest first.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().map(|sb| &sb.block)
    }

    /// Clones of the trailing `k` blocks, oldest first.
    pub fn tail_blocks(&self, k: usize) -> Vec<Block> {
        let start = self.blocks.len().saturating_sub(k);
        self.blocks[start..].iter().map(|sb| sb.block.clone()).collect()
    }

    /// Current session counter (the anchor TTL unit).
    pub fn session(&self) -> SessionIndex {
        self.session
    }

    /// Advance the session counter; invoked on checkpoint.
    pub fn bump_session(&mut self) {
        self.session = self.session.saturating_add(1);
    }

    /// Drop everything but the last `keep` blocks, returning the removed
    /// blocks oldest first.
    pub fn prune_to_last(&mut self, keep: usize) -> Vec<Block> {
        let cut = self.blocks.len().saturating_sub(keep);
        self.blocks
            .drain(..cut)
            .map(|sb| sb.block)
            .collect()
    }

    /// Token total of the last `n` blocks as rendered, without any
    /// trimming. Feeds the provisional pressure estimate.
    pub fn untrimmed_tokens(&self, n: usize, counter: &dyn TokenCounter) -> u32 {
        let start = self.blocks.len().saturating_sub(n);
        self.blocks[start..]
            .iter()
            .map(|sb| counter.count(&render_line(&sb.block)))
            .sum()
    }

    /// Select the window content for one build.
    ///
    /// Never fails: under extreme pressure the minimum set (last user
    /// input plus last GM choice) is emitted even over budget, flagged
    /// via `overrun`.
    pub fn select(
        &self,
        budget: u32,
        tier: StrainTier,
        counter: &dyn TokenCounter,
        source: &dyn SectionSource,
        cfg: &WindowConfig,
    ) -> WindowSelection {
        if self.blocks.is_empty() {
            return WindowSelection::empty();
        }

        let total = self.blocks.len();
        let target = cfg.target_for(tier);
        let start = total.saturating_sub(target);
        let mut dropped: Vec<(BlockId, DropReason)> = Vec::new();

        let mut selected: BTreeSet<usize> = (start..total).collect();

        // The last user input and the last GM choice are reservations:
        // included always, dropped never.
        let mut pinned: BTreeSet<usize> = BTreeSet::new();
        let last_user = self
            .blocks
            .iter()
            .rposition(|sb| sb.block.role_hint == ChatRole::User);
        let last_choice = self.blocks.iter().rposition(|sb| {
            sb.block.kind == BlockType::Choice && sb.block.role_hint == ChatRole::Assistant
        });
        for idx in [last_user, last_choice].into_iter().flatten() {
            selected.insert(idx);
            pinned.insert(idx);
        }

        // Anchor retention: the newest block per distinct hinge id, when
        // that block predates the starting set. Subject to TTL and quota.
        let mut latest_per_hinge: BTreeMap<&str, usize> = BTreeMap::new();
        for (idx, sb) in self.blocks.iter().enumerate() {
            if let Some(hinge) = sb.block.hinge_id() {
                latest_per_hinge.insert(hinge, idx);
            }
        }
        let mut candidates: Vec<usize> = latest_per_hinge
            .into_values()
            .filter(|idx| *idx < start && !selected.contains(idx))
            .collect();
        candidates.sort_unstable();

        let mut fresh: Vec<usize> = Vec::new();
        for idx in candidates {
            let age = self.session.saturating_sub(self.blocks[idx].session);
            if age <= cfg.anchor_ttl_sessions {
                fresh.push(idx);
            } else {
                // Expired anchors live on in the digest's hinge index
                dropped.push((self.blocks[idx].block.id, DropReason::AnchorExpired));
            }
        }
        if fresh.len() > cfg.anchor_quota {
            let cut = fresh.len() - cfg.anchor_quota;
            for &idx in &fresh[..cut] {
                dropped.push((self.blocks[idx].block.id, DropReason::AnchorQuota));
            }
            fresh.drain(..cut);
        }
        let mut anchors: BTreeSet<usize> = BTreeSet::new();
        for idx in fresh {
            selected.insert(idx);
            anchors.insert(idx);
        }

        let line_tokens: BTreeMap<usize, u32> = selected
            .iter()
            .map(|&idx| (idx, counter.count(&render_line(&self.blocks[idx].block))))
            .collect();
        let mut tokens: u32 = line_tokens.values().sum();

        // Scene recap: at StrainII+ the oldest half of the regular
        // window blocks collapses into one paragraph. Pinned blocks and
        // anchors are exempt; anchors are only ever shed by the final
        // drop class below.
        let mut recap: Option<(String, u32)> = None;
        if tier.uses_scene_recap() {
            let replaceable: Vec<usize> = selected
                .iter()
                .copied()
                .filter(|idx| !pinned.contains(idx) && !anchors.contains(idx))
                .collect();
            if replaceable.len() >= 2 {
                let victims = &replaceable[..replaceable.len() / 2];
                let old_blocks: Vec<Block> = victims
                    .iter()
                    .map(|&idx| self.blocks[idx].block.clone())
                    .collect();
                let paragraph = source.scene_recap(&old_blocks);
                if !paragraph.is_empty() {
                    let recap_tokens =
                        counter.count(&format!("{}: {}", ChatRole::System, paragraph));
                    for &idx in victims {
                        selected.remove(&idx);
                        tokens -= line_tokens[&idx];
                        dropped.push((self.blocks[idx].block.id, DropReason::RecapReplaced));
                    }
                    tokens += recap_tokens;
                    recap = Some((paragraph, recap_tokens));
                }
            }
        }

        // Budget trim, strict class order, oldest first within a class.
        if tokens > budget {
            let class_of = |block: &Block| -> Option<(u8, DropReason)> {
                if block.is_low_signal() {
                    return Some((0, DropReason::LowSignal));
                }
                match block.kind {
                    BlockType::Narrative => Some((1, DropReason::OldestNarrative)),
                    BlockType::Intel => Some((2, DropReason::OldestIntel)),
                    BlockType::Choice => Some((3, DropReason::OldestChoice)),
                    // Tagged system blocks have no drop class; they only
                    // go in the minimum-set collapse
                    BlockType::System => None,
                }
            };

            'classes: for class in 0..4u8 {
                loop {
                    if tokens <= budget {
                        break 'classes;
                    }
                    let next = selected.iter().copied().find_map(|idx| {
                        if pinned.contains(&idx) || anchors.contains(&idx) {
                            return None;
                        }
                        class_of(&self.blocks[idx].block)
                            .filter(|(c, _)| *c == class)
                            .map(|(_, reason)| (idx, reason))
                    });
                    let Some((idx, reason)) = next else { break };
                    selected.remove(&idx);
                    tokens -= line_tokens[&idx];
                    dropped.push((self.blocks[idx].block.id, reason));
                }
            }

            // Anchors go last, oldest first
            while tokens > budget {
                let Some(idx) = anchors.iter().copied().next() else {
                    break;
                };
                anchors.remove(&idx);
                selected.remove(&idx);
                tokens -= line_tokens[&idx];
                dropped.push((self.blocks[idx].block.id, DropReason::AnchorEvicted));
            }

            // Minimum-set collapse: shed whatever is left beyond the
            // pinned reservations, then the recap itself.
            if tokens > budget {
                let leftovers: Vec<usize> = selected
                    .iter()
                    .copied()
                    .filter(|idx| !pinned.contains(idx))
                    .collect();
                for idx in leftovers {
                    if tokens <= budget {
                        break;
                    }
                    selected.remove(&idx);
                    tokens -= line_tokens[&idx];
                    dropped.push((self.blocks[idx].block.id, DropReason::WindowOverflow));
                }
                if tokens > budget {
                    if let Some((_, recap_tokens)) = recap.take() {
                        tokens -= recap_tokens;
                    }
                }
            }
        }

        let overrun = tokens > budget;
        if overrun {
            debug!(tokens, budget, "window minimum set exceeds budget");
        }

        let mut messages = Vec::with_capacity(selected.len() + 1);
        if let Some((paragraph, _)) = &recap {
            messages.push(ChatMessage::system(paragraph.clone()));
        }
        for &idx in &selected {
            let block = &self.blocks[idx].block;
            messages.push(ChatMessage::new(block.role_hint, block.text.clone()));
        }
        let retained: Vec<BlockId> = selected
            .iter()
            .map(|&idx| self.blocks[idx].block.id)
            .collect();

        dropped.sort_by_key(|(id, _)| *id);

        WindowSelection {
            messages,
            retained,
            dropped,
            tokens,
            recap_used: recap.is_some(),
            anchor_count: anchors.len(),
            overrun,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{RetrievalPreset, Tag};

    /// One token per whitespace-separated word.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> u32 {
            text.split_whitespace().count() as u32
        }
    }

    struct StubSource {
        recap: String,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                recap: "Earlier, the crew crossed the blockade.".to_string(),
            }
        }
    }

    impl SectionSource for StubSource {
        fn system_text(&self) -> String {
            String::new()
        }
        fn rules_text(&self, _tier: StrainTier) -> String {
            String::new()
        }
        fn state_snapshot(&self) -> String {
            String::new()
        }
        fn retrieval_text(&self, _preset: RetrievalPreset) -> String {
            String::new()
        }
        fn scene_recap(&self, _old_blocks: &[Block]) -> String {
            self.recap.clone()
        }
    }

    fn narrative(id: u64, words: usize) -> Block {
        Block::new(
            BlockId::new(id),
            BlockType::Narrative,
            ChatRole::Assistant,
            vec!["word"; words].join(" "),
        )
    }

    fn user_input(id: u64, text: &str) -> Block {
        Block::new(BlockId::new(id), BlockType::Intel, ChatRole::User, text)
    }

    fn gm_choice(id: u64, text: &str) -> Block {
        Block::new(BlockId::new(id), BlockType::Choice, ChatRole::Assistant, text)
    }

    fn window_of(blocks: Vec<Block>) -> Window {
        let mut window = Window::new();
        for block in blocks {
            window.append(block).unwrap();
        }
        window
    }

    fn cfg() -> WindowConfig {
        WindowConfig::default()
    }

    #[test]
    fn test_append_rejects_non_monotonic() {
        let mut window = Window::new();
        window.append(narrative(5, 3)).unwrap();
        let err = window.append(narrative(5, 3)).unwrap_err();
        assert_eq!(
            err,
            AppendError::NonMonotonicId {
                last: Some(BlockId::new(5)),
                got: BlockId::new(5)
            }
        );
        let err = window.append(narrative(2, 3)).unwrap_err();
        assert!(matches!(err, AppendError::NonMonotonicId { .. }));
        // Rejection leaves the log untouched
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_select_small_transcript_keeps_all() {
        let window = window_of((1..=6).map(|i| narrative(i, 5)).collect());
        let sel = window.select(1_000, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert_eq!(sel.retained.len(), 6);
        assert!(sel.dropped.is_empty());
        assert!(!sel.overrun);
    }

    #[test]
    fn test_select_respects_tier_target() {
        let window = window_of((1..=40).map(|i| narrative(i, 5)).collect());
        let sel = window.select(10_000, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert_eq!(sel.retained.len(), 12);
        // Chronological order, newest twelve
        assert_eq!(sel.retained.first(), Some(&BlockId::new(29)));
        assert_eq!(sel.retained.last(), Some(&BlockId::new(40)));

        let sel = window.select(10_000, StrainTier::StrainIII, &WordCounter, &StubSource::new(), &cfg());
        // Five targeted; recap replaces part of the set at StrainIII
        assert!(sel.retained.len() <= 5);
    }

    #[test]
    fn test_anchor_retained_outside_window() {
        let mut blocks: Vec<Block> = (1..=40).map(|i| narrative(i, 5)).collect();
        blocks[4] = blocks[4]
            .clone()
            .with_tag(Tag::parse("hinge:betrayed_architects"));
        let window = window_of(blocks);

        let sel = window.select(10_000, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert!(sel.retained.contains(&BlockId::new(5)));
        assert_eq!(sel.anchor_count, 1);
    }

    #[test]
    fn test_anchor_quota_keeps_most_recent() {
        // Twenty distinct hinges, all older than the window target
        let mut blocks: Vec<Block> = Vec::new();
        for i in 1..=20 {
            blocks.push(
                narrative(i, 3).with_tag(Tag::Hinge(format!("h{}", i))),
            );
        }
        for i in 21..=40 {
            blocks.push(narrative(i, 3));
        }
        let window = window_of(blocks);

        let sel = window.select(10_000, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert_eq!(sel.anchor_count, 3);
        // The three most recent hinges survive the quota
        for id in [18, 19, 20] {
            assert!(sel.retained.contains(&BlockId::new(id)));
        }
        let quota_drops = sel
            .dropped
            .iter()
            .filter(|(_, r)| *r == DropReason::AnchorQuota)
            .count();
        assert_eq!(quota_drops, 17);
    }

    #[test]
    fn test_anchor_ttl_expiry() {
        let mut window = Window::new();
        window
            .append(narrative(1, 3).with_tag(Tag::parse("hinge:ancient")))
            .unwrap();
        // Nine checkpoints age the hinge past the default TTL of eight
        for _ in 0..9 {
            window.bump_session();
        }
        for i in 2..=20 {
            window.append(narrative(i, 3)).unwrap();
        }

        let sel = window.select(10_000, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert!(!sel.retained.contains(&BlockId::new(1)));
        assert!(sel
            .dropped
            .contains(&(BlockId::new(1), DropReason::AnchorExpired)));
    }

    #[test]
    fn test_duplicate_hinge_id_in_window_suppresses_anchor() {
        let mut blocks: Vec<Block> = Vec::new();
        blocks.push(narrative(1, 3).with_tag(Tag::parse("hinge:door")));
        for i in 2..=30 {
            blocks.push(narrative(i, 3));
        }
        // Newest mention of the same hinge sits inside the window
        blocks.push(narrative(31, 3).with_tag(Tag::parse("hinge:door")));
        let window = window_of(blocks);

        let sel = window.select(10_000, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert!(!sel.retained.contains(&BlockId::new(1)));
        assert!(sel.retained.contains(&BlockId::new(31)));
        assert_eq!(sel.anchor_count, 0);
    }

    #[test]
    fn test_drop_order_low_signal_first() {
        let mut blocks = Vec::new();
        blocks.push(Block::new(
            BlockId::new(1),
            BlockType::System,
            ChatRole::System,
            "roll check noted extra words here",
        ));
        blocks.push(narrative(2, 6));
        blocks.push(user_input(3, "inspect the manifest closely now"));
        let window = window_of(blocks);

        // Budget forces exactly one drop
        let sel = window.select(14, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert_eq!(
            sel.dropped.first(),
            Some(&(BlockId::new(1), DropReason::LowSignal))
        );
        assert!(sel.retained.contains(&BlockId::new(2)));
    }

    #[test]
    fn test_narrative_dropped_before_intel() {
        let blocks = vec![
            narrative(1, 6),
            Block::new(BlockId::new(2), BlockType::Intel, ChatRole::Assistant, "a b c d e f"),
            narrative(3, 6),
            user_input(4, "go"),
        ];
        let window = window_of(blocks);

        let sel = window.select(13, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        // Both narratives go before any intel does
        let reasons: Vec<DropReason> = sel.dropped.iter().map(|(_, r)| *r).collect();
        assert!(reasons.contains(&DropReason::OldestNarrative));
        assert!(sel.retained.contains(&BlockId::new(2)) || reasons.contains(&DropReason::OldestIntel));
        assert_eq!(
            sel.dropped.first().map(|(id, _)| *id),
            Some(BlockId::new(1))
        );
    }

    #[test]
    fn test_pinned_never_dropped() {
        let blocks = vec![
            gm_choice(1, "stand and fight or slip away unseen tonight"),
            user_input(2, "we slip away through the maintenance shafts quietly"),
        ];
        let window = window_of(blocks);

        // Budget far below what the pinned pair needs
        let sel = window.select(2, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert_eq!(sel.retained.len(), 2);
        assert!(sel.overrun);
        assert!(sel.tokens > 2);
    }

    #[test]
    fn test_recap_replaces_oldest_half_at_strain_ii() {
        let window = window_of((1..=16).map(|i| narrative(i, 8)).collect());
        let sel = window.select(10_000, StrainTier::StrainII, &WordCounter, &StubSource::new(), &cfg());
        assert!(sel.recap_used);
        // Target eight, oldest half recapped
        assert_eq!(sel.retained.len(), 4);
        assert_eq!(
            sel.messages.first().map(|m| m.role),
            Some(ChatRole::System)
        );
        let recapped = sel
            .dropped
            .iter()
            .filter(|(_, r)| *r == DropReason::RecapReplaced)
            .count();
        assert_eq!(recapped, 4);
    }

    #[test]
    fn test_no_recap_below_strain_ii() {
        let window = window_of((1..=16).map(|i| narrative(i, 8)).collect());
        let sel = window.select(10_000, StrainTier::StrainI, &WordCounter, &StubSource::new(), &cfg());
        assert!(!sel.recap_used);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut blocks: Vec<Block> = (1..=30).map(|i| narrative(i, 7)).collect();
        blocks[2] = blocks[2].clone().with_tag(Tag::parse("hinge:h1"));
        blocks[29] = user_input(30, "act");
        let window = window_of(blocks);

        let first = window.select(60, StrainTier::StrainI, &WordCounter, &StubSource::new(), &cfg());
        let second = window.select(60, StrainTier::StrainI, &WordCounter, &StubSource::new(), &cfg());
        assert_eq!(first, second);
    }

    #[test]
    fn test_prune_to_last() {
        let mut window = window_of((1..=30).map(|i| narrative(i, 2)).collect());
        let removed = window.prune_to_last(4);
        assert_eq!(removed.len(), 26);
        assert_eq!(removed.first().map(|b| b.id), Some(BlockId::new(1)));
        assert_eq!(window.len(), 4);
        assert_eq!(
            window.blocks().next().map(|b| b.id),
            Some(BlockId::new(27))
        );
    }

    #[test]
    fn test_low_signal_transcript_collapses_under_pressure() {
        let blocks: Vec<Block> = (1..=12)
            .map(|i| {
                Block::new(
                    BlockId::new(i),
                    BlockType::System,
                    ChatRole::System,
                    vec!["roll"; 10].join(" "),
                )
            })
            .collect();
        let window = window_of(blocks);

        let sel = window.select(20, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        // Nothing is pinned and everything is low-signal; the window
        // empties down to the budget
        assert!(sel.retained.len() <= 1);
        assert!(!sel.overrun);
        assert!(sel
            .dropped
            .iter()
            .all(|(_, reason)| *reason == DropReason::LowSignal));
    }

    #[test]
    fn test_empty_window_selects_nothing() {
        let window = Window::new();
        let sel = window.select(100, StrainTier::Normal, &WordCounter, &StubSource::new(), &cfg());
        assert!(sel.messages.is_empty());
        assert!(!sel.overrun);
    }
}
