//! SENTINEL Digest - Compressed Long-Term Memory
//!
//! The digest is the campaign's durable memory: a single UTF-8 blob with
//! four fixed sub-sections, machine-parseable and tolerant of format
//! evolution. Updates run through a validated LLM path that always falls
//! back to a deterministic template path; the fallback never fails.

mod model;
mod update;

pub use model::{
    compress_marker, Digest, HingeEntry, StandingEntry, ThreadEntry, DIGEST_SCHEMA_VERSION,
    HEADING_ANCHORS, HEADING_HINGES, HEADING_STANDINGS, HEADING_THREADS,
};
pub use update::{
    build_update_prompt, update_digest, update_template, update_via_llm, validate_digest_text,
    DigestPath, DigestUpdate,
};
