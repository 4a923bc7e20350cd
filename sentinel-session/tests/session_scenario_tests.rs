//! End-to-end session scenarios: one test per documented flow, built on
//! the mock capabilities from sentinel-test-utils.

use sentinel_context::WarningKind;
use sentinel_core::{Block, SectionKind, SentinelConfig, StrainTier, Tag};
use sentinel_digest::{Digest, DigestPath, HingeEntry, HEADING_ANCHORS, HEADING_HINGES, HEADING_STANDINGS, HEADING_THREADS};
use sentinel_session::{SentinelSession, SessionCommand};
use sentinel_storage::DigestStore;
use sentinel_test_utils::{
    choice_block, filler, hinge_block, narrative_block, user_block, MemoryDigestStore,
    MemorySummaryWriter, MemoryTranscriptArchive, ScriptedLlmCaller, StaticSectionSource,
    WordTokenCounter,
};
use std::sync::Arc;

struct Harness {
    session: SentinelSession,
    store: Arc<MemoryDigestStore>,
    archive: Arc<MemoryTranscriptArchive>,
}

fn harness_with(source: StaticSectionSource, caller: ScriptedLlmCaller) -> Harness {
    let store = Arc::new(MemoryDigestStore::new());
    let archive = Arc::new(MemoryTranscriptArchive::new());
    let session = SentinelSession::new(
        SentinelConfig::default(),
        Box::new(WordTokenCounter),
        Box::new(source),
        Box::new(Arc::clone(&store)),
        Box::new(Arc::clone(&archive)),
        Box::new(caller),
    )
    .expect("default config is valid");
    Harness {
        session,
        store,
        archive,
    }
}

fn harness() -> Harness {
    harness_with(StaticSectionSource::default(), ScriptedLlmCaller::failing())
}

/// A hinge carried on ordinary narration, so it competes as an anchor
/// rather than as the pinned last GM choice.
fn narrative_hinge(id: u64, hinge: &str) -> Block {
    narrative_block(id, 4).with_tag(Tag::Hinge(hinge.to_string()))
}

#[test]
fn normal_tier_smoke() {
    let source = StaticSectionSource {
        system: filler(1_500),
        rules_core: filler(2_000),
        narrative_guidance: String::new(),
        snapshot: filler(400),
        retrieval_standard: filler(600),
        ..StaticSectionSource::default()
    };
    let mut h = harness_with(source, ScriptedLlmCaller::failing());

    for i in 1..=6 {
        h.session.append_block(narrative_block(i, 300)).unwrap();
    }

    let (pack, trace) = h.session.build("push through the airlock");

    assert_eq!(pack.tier, StrainTier::Normal);
    assert_eq!(trace.retained_blocks.len(), 6);

    let used = |kind| trace.section(kind).unwrap().used_tokens;
    assert_eq!(used(SectionKind::System), 1_500);
    assert_eq!(used(SectionKind::Rules), 2_000);
    assert_eq!(used(SectionKind::StateSnapshot), 400);
    // Six blocks of 300 words, each rendered with a one-word role prefix
    assert_eq!(used(SectionKind::RecentWindow), 6 * 301);
    assert_eq!(used(SectionKind::Retrieval), 600);
    assert_eq!(used(SectionKind::UserInput), 4);
    assert_eq!(pack.total_tokens, trace.used_tokens());
    assert!(trace.pressure < 0.70);
}

#[test]
fn anchor_retained_from_deep_history() {
    let mut h = harness();
    for i in 1..=40u64 {
        if i == 6 {
            h.session
                .append_block(narrative_hinge(i, "betrayed_architects"))
                .unwrap();
        } else {
            h.session.append_block(narrative_block(i, 10)).unwrap();
        }
    }

    let (_, trace) = h.session.build("now what");

    assert!(trace.retained_blocks.contains(&sentinel_core::BlockId::new(6)));
    assert_eq!(trace.anchors_retained, 1);
    assert!(trace.anchors_retained <= 3);
}

#[test]
fn oversized_snapshot_truncated_exactly() {
    let source = StaticSectionSource {
        snapshot: filler(3_000),
        ..StaticSectionSource::default()
    };
    let mut h = harness_with(source, ScriptedLlmCaller::failing());
    h.session.append_block(narrative_block(1, 20)).unwrap();

    let (_, trace) = h.session.build("go");

    let snapshot = trace.section(SectionKind::StateSnapshot).unwrap();
    assert_eq!(snapshot.used_tokens, 1_500);
    assert_eq!(snapshot.trimmed_tokens, 1_500);
    assert!(trace.has_warning(WarningKind::SectionTruncated));
}

#[tokio::test]
async fn checkpoint_survives_llm_failure() {
    let mut h = harness();
    for i in 1..=30u64 {
        if i % 10 == 0 {
            h.session
                .append_block(hinge_block(i, &format!("hinge_{}", i), "A door closes forever."))
                .unwrap();
        } else {
            h.session.append_block(narrative_block(i, 8)).unwrap();
        }
    }

    let outcome = h.session.command(SessionCommand::Checkpoint).await.unwrap();

    assert_eq!(outcome.digest_path, Some(DigestPath::Template));
    assert!(outcome.fallback_reason.is_some());
    assert!(!outcome.cleared_without_checkpoint);

    // The persisted digest carries all four headings in order
    let text = h.store.load().unwrap().expect("digest was written");
    let positions: Vec<usize> = [
        HEADING_HINGES,
        HEADING_STANDINGS,
        HEADING_ANCHORS,
        HEADING_THREADS,
    ]
    .iter()
    .map(|heading| text.find(heading).expect("heading present"))
    .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

    // Every hinge from the transcript is in the index
    let digest = Digest::parse(&text);
    for id in ["hinge_10", "hinge_20", "hinge_30"] {
        assert!(digest.covers_hinge(id), "missing {}", id);
    }

    // Pruning archived everything older than the retained tail
    assert_eq!(h.session.transcript_len(), 12);
    assert_eq!(h.archive.archived().len(), 18);
    assert_eq!(h.session.session_index(), 1);
}

#[tokio::test]
async fn clear_preserves_digest_and_sets_flag() {
    let mut h = harness();
    for i in 1..=10u64 {
        h.session
            .append_block(hinge_block(i, &format!("h{}", i), "Irreversible."))
            .unwrap();
    }
    // Seed the digest through a compress (template path)
    h.session.command(SessionCommand::Compress).await.unwrap();
    let digest_before = h.store.load().unwrap().expect("compress wrote a digest");

    for i in 11..=30u64 {
        h.session.append_block(narrative_block(i, 8)).unwrap();
    }
    let outcome = h.session.command(SessionCommand::Clear).await.unwrap();

    assert_eq!(h.session.transcript_len(), 4);
    assert!(outcome.cleared_without_checkpoint);
    assert!(h.session.cleared_without_checkpoint());
    assert_eq!(outcome.archived_blocks, 0);
    // The digest on disk did not move
    assert_eq!(h.store.load().unwrap().as_deref(), Some(digest_before.as_str()));

    // A build after clear holds at most the minimum window plus the
    // head and context messages and the user line
    let (pack, trace) = h.session.build("take stock");
    assert!(trace.retained_blocks.len() <= 4);
    assert_eq!(pack.messages.last().unwrap().text, "take stock");
}

#[tokio::test]
async fn checkpoint_exports_summary_through_writer() {
    let source = StaticSectionSource::default();
    let recap = source.recap.clone();
    let store = Arc::new(MemoryDigestStore::new());
    let archive = Arc::new(MemoryTranscriptArchive::new());
    let writer = Arc::new(MemorySummaryWriter::new());
    let mut session = SentinelSession::new(
        SentinelConfig::default(),
        Box::new(WordTokenCounter),
        Box::new(source),
        Box::new(Arc::clone(&store)),
        Box::new(Arc::clone(&archive)),
        Box::new(ScriptedLlmCaller::failing()),
    )
    .expect("default config is valid")
    .with_summary_writer(Box::new(Arc::clone(&writer)));

    for i in 1..=6u64 {
        session.append_block(narrative_block(i, 8)).unwrap();
    }
    session.command(SessionCommand::Checkpoint).await.unwrap();

    // The checkpoint exported exactly the session recap
    assert_eq!(writer.written(), vec![recap]);

    // A compress writes the digest but exports nothing further
    session.command(SessionCommand::Compress).await.unwrap();
    assert_eq!(writer.written().len(), 1);
}

#[tokio::test]
async fn checkpoint_resets_cleared_flag() {
    let mut h = harness();
    for i in 1..=12u64 {
        h.session.append_block(narrative_block(i, 5)).unwrap();
    }
    h.session.command(SessionCommand::Clear).await.unwrap();
    assert!(h.session.cleared_without_checkpoint());

    h.session.command(SessionCommand::Checkpoint).await.unwrap();
    assert!(!h.session.cleared_without_checkpoint());
}

#[tokio::test]
async fn hinge_quota_enforced_and_covered_after_compress() {
    let mut h = harness();
    for i in 1..=20u64 {
        h.session
            .append_block(narrative_hinge(i, &format!("h{}", i)))
            .unwrap();
    }
    for i in 21..=35u64 {
        h.session.append_block(narrative_block(i, 6)).unwrap();
    }

    let (_, trace) = h.session.build("survey the wreckage");
    assert!(trace.anchors_retained <= 3);
    let quota_dropped = trace
        .dropped_blocks
        .iter()
        .filter(|(_, reason)| *reason == sentinel_core::DropReason::AnchorQuota)
        .count();
    assert_eq!(quota_dropped, 17);

    h.session.command(SessionCommand::Compress).await.unwrap();
    let digest = Digest::parse(&h.store.load().unwrap().unwrap());
    for i in 1..=20u64 {
        assert!(digest.covers_hinge(&format!("h{}", i)));
    }
}

#[tokio::test]
async fn compress_does_not_prune() {
    let mut h = harness();
    for i in 1..=30u64 {
        h.session.append_block(narrative_block(i, 5)).unwrap();
    }
    let outcome = h.session.command(SessionCommand::Compress).await.unwrap();

    assert_eq!(outcome.pruned_blocks, 0);
    assert_eq!(h.session.transcript_len(), 30);
    assert!(h.archive.archived().is_empty());
    assert!(h.store.load().unwrap().is_some());
    // Compress does not bump the session counter
    assert_eq!(h.session.session_index(), 0);
}

#[tokio::test]
async fn valid_llm_digest_is_persisted() {
    let mut produced = Digest::default();
    produced.hinges.push(HingeEntry {
        id: "h1".to_string(),
        summary: "retold by the model".to_string(),
    });
    let caller = ScriptedLlmCaller::always(produced.render());
    let mut h = harness_with(StaticSectionSource::default(), caller);

    h.session
        .append_block(hinge_block(1, "h1", "The original telling."))
        .unwrap();
    let outcome = h.session.command(SessionCommand::Compress).await.unwrap();

    assert_eq!(outcome.digest_path, Some(DigestPath::Llm));
    assert!(outcome.fallback_reason.is_none());
    let digest = Digest::parse(&h.store.load().unwrap().unwrap());
    assert_eq!(digest.hinges[0].summary, "retold by the model");
}

#[test]
fn debug_returns_last_trace() {
    let mut h = harness();
    h.session.append_block(user_block(1, "hello")).unwrap();
    assert!(h.session.debug().is_none());

    let (_, trace) = h.session.build("hello again");
    let debug = h.session.debug().expect("trace recorded");
    assert_eq!(debug.pack_fingerprint, trace.pack_fingerprint);
}

#[test]
fn last_gm_choice_survives_deep_transcript() {
    let mut h = harness();
    h.session
        .append_block(choice_block(1, "Fight, flee, or bargain?"))
        .unwrap();
    for i in 2..=40u64 {
        h.session.append_block(narrative_block(i, 10)).unwrap();
    }

    let (_, trace) = h.session.build("decide");
    assert!(trace
        .retained_blocks
        .contains(&sentinel_core::BlockId::new(1)));
}
