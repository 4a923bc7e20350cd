//! SENTINEL Session - Engine Facade
//!
//! Single owner of the transcript window, the digest, and the last
//! trace. Collaborators reach the core only through this facade: append
//! blocks, build packs, run the three session commands. Methods are not
//! reentrant; the caller serializes builds against commands. The only
//! suspension points are the digest updates inside `checkpoint` and
//! `compress`.

use sentinel_context::{BuildOptions, PackTrace, Packer, PromptPack, SectionSource, Window};
use sentinel_core::{
    AppendError, Block, DigestUpdateError, SentinelConfig, SentinelResult, SessionIndex,
    TokenCounter,
};
use sentinel_digest::{update_digest, Digest, DigestPath};
use sentinel_llm::{CallOptions, LlmCaller};
use sentinel_storage::{DigestStore, SummaryWriter, TranscriptArchive};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// COMMANDS
// ============================================================================

/// The three session commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Update the digest, export a summary, prune and archive old blocks
    Checkpoint,
    /// Update the digest only
    Compress,
    /// Shrink the transcript to the minimum window; never touches the
    /// digest
    Clear,
}

/// What one command did.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub command: SessionCommand,
    /// Which path produced the digest, for digest-updating commands
    pub digest_path: Option<DigestPath>,
    /// The error that forced the template fallback, when one did
    pub fallback_reason: Option<DigestUpdateError>,
    /// Blocks removed from the live transcript
    pub pruned_blocks: usize,
    /// Blocks handed to the archive
    pub archived_blocks: usize,
    /// Flag state after the command
    pub cleared_without_checkpoint: bool,
}

// ============================================================================
// SESSION
// ============================================================================

/// Top-level facade owning the context control core for one campaign
/// session.
pub struct SentinelSession {
    config: SentinelConfig,
    counter: Box<dyn TokenCounter>,
    source: Box<dyn SectionSource>,
    digest_store: Box<dyn DigestStore>,
    archive: Box<dyn TranscriptArchive>,
    caller: Box<dyn LlmCaller>,
    summary_writer: Option<Box<dyn SummaryWriter>>,
    call_options: CallOptions,
    window: Window,
    digest: Digest,
    last_trace: Option<PackTrace>,
    cleared_without_checkpoint: bool,
}

impl SentinelSession {
    /// Construct the session, loading any existing digest from the
    /// store. Fails on invalid configuration or an unreadable store.
    pub fn new(
        config: SentinelConfig,
        counter: Box<dyn TokenCounter>,
        source: Box<dyn SectionSource>,
        digest_store: Box<dyn DigestStore>,
        archive: Box<dyn TranscriptArchive>,
        caller: Box<dyn LlmCaller>,
    ) -> SentinelResult<Self> {
        config.validate()?;
        let digest = match digest_store.load()? {
            Some(text) => Digest::parse(&text),
            None => Digest::default(),
        };
        Ok(Self {
            config,
            counter,
            source,
            digest_store,
            archive,
            caller,
            summary_writer: None,
            call_options: CallOptions::default(),
            window: Window::new(),
            digest,
            last_trace: None,
            cleared_without_checkpoint: false,
        })
    }

    /// Attach a summary writer for checkpoint exports.
    pub fn with_summary_writer(mut self, writer: Box<dyn SummaryWriter>) -> Self {
        self.summary_writer = Some(writer);
        self
    }

    /// Override the call options used for digest updates.
    pub fn with_call_options(mut self, options: CallOptions) -> Self {
        self.call_options = options;
        self
    }

    // ------------------------------------------------------------------
    // Transcript
    // ------------------------------------------------------------------

    /// Append a block to the transcript. Rejects non-monotonic ids
    /// without mutating state.
    pub fn append_block(&mut self, block: Block) -> Result<(), AppendError> {
        self.window.append(block)
    }

    /// Number of blocks in the live transcript.
    pub fn transcript_len(&self) -> usize {
        self.window.len()
    }

    /// Session counter; bumped on every checkpoint.
    pub fn session_index(&self) -> SessionIndex {
        self.window.session()
    }

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------

    /// Assemble the prompt pack for one turn. Never suspends and never
    /// fails; pressure problems surface as trace warnings.
    pub fn build(&mut self, user_input: &str) -> (PromptPack, PackTrace) {
        self.build_with(user_input, &BuildOptions::default())
    }

    /// `build` with explicit options (tier hint, active retrieval).
    pub fn build_with(
        &mut self,
        user_input: &str,
        options: &BuildOptions,
    ) -> (PromptPack, PackTrace) {
        let digest_text = if self.digest.is_empty() {
            String::new()
        } else {
            self.digest.render()
        };
        let packer = Packer::new(
            &self.config,
            self.counter.as_ref(),
            self.source.as_ref(),
            &self.window,
            &digest_text,
        );
        let (pack, trace) = packer.build(user_input, options);
        self.last_trace = Some(trace.clone());
        (pack, trace)
    }

    /// Last build's trace, for the debug command.
    pub fn debug(&self) -> Option<&PackTrace> {
        self.last_trace.as_ref()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Run one session command.
    pub async fn command(&mut self, command: SessionCommand) -> SentinelResult<CommandOutcome> {
        match command {
            SessionCommand::Checkpoint => self.checkpoint().await,
            SessionCommand::Compress => self.compress().await,
            SessionCommand::Clear => Ok(self.clear()),
        }
    }

    /// Whether the transcript was cleared since the last checkpoint. The
    /// narrative collaborator may reference the gap only under StrainII+
    /// and never as a surprise.
    pub fn cleared_without_checkpoint(&self) -> bool {
        self.cleared_without_checkpoint
    }

    /// Current digest text as persisted.
    pub fn digest_text(&self) -> String {
        self.digest.render()
    }

    /// Update the digest from the live transcript and persist it.
    /// Atomic from the caller's perspective: a failed LLM update is
    /// replaced wholesale by the template result before anything is
    /// saved.
    async fn refresh_digest(
        &mut self,
        session_recap: &str,
    ) -> SentinelResult<(DigestPath, Option<DigestUpdateError>)> {
        let blocks: Vec<Block> = self.window.blocks().cloned().collect();
        let update = update_digest(
            self.caller.as_ref(),
            self.counter.as_ref(),
            &self.config.digest,
            self.config.budgets.digest,
            &self.digest,
            session_recap,
            &blocks,
            &self.call_options,
        )
        .await;

        self.digest = update.digest;
        self.digest_store.save(&self.digest.render())?;
        debug!(path = ?update.path, "digest persisted");
        Ok((update.path, update.fallback_reason))
    }

    async fn checkpoint(&mut self) -> SentinelResult<CommandOutcome> {
        let recap = self
            .source
            .scene_recap(&self.window.tail_blocks(self.config.digest.k_blocks));
        let (path, fallback_reason) = self.refresh_digest(&recap).await?;

        if let Some(writer) = &self.summary_writer {
            if !recap.is_empty() {
                writer.write_summary(&recap)?;
            }
        }

        let pruned = self
            .window
            .prune_to_last(self.config.checkpoint.retain_blocks);
        if !pruned.is_empty() {
            self.archive.archive(&pruned)?;
        }

        self.cleared_without_checkpoint = false;
        self.window.bump_session();
        info!(
            pruned = pruned.len(),
            session = self.window.session(),
            "checkpoint complete"
        );

        Ok(CommandOutcome {
            command: SessionCommand::Checkpoint,
            digest_path: Some(path),
            fallback_reason,
            pruned_blocks: pruned.len(),
            archived_blocks: pruned.len(),
            cleared_without_checkpoint: false,
        })
    }

    async fn compress(&mut self) -> SentinelResult<CommandOutcome> {
        let recap = self
            .source
            .scene_recap(&self.window.tail_blocks(self.config.digest.k_blocks));
        let (path, fallback_reason) = self.refresh_digest(&recap).await?;

        Ok(CommandOutcome {
            command: SessionCommand::Compress,
            digest_path: Some(path),
            fallback_reason,
            pruned_blocks: 0,
            archived_blocks: 0,
            cleared_without_checkpoint: self.cleared_without_checkpoint,
        })
    }

    fn clear(&mut self) -> CommandOutcome {
        // The digest is deliberately untouched here. Retrieval caches
        // live with the retrieval collaborator; callers owning one are
        // expected to drop it alongside this clear.
        let removed = self.window.prune_to_last(self.config.window.min_blocks);
        self.cleared_without_checkpoint = true;
        info!(removed = removed.len(), "transcript cleared");

        CommandOutcome {
            command: SessionCommand::Clear,
            digest_path: None,
            fallback_reason: None,
            pruned_blocks: removed.len(),
            archived_blocks: 0,
            cleared_without_checkpoint: true,
        }
    }
}
