//! Serial alignment loop.
//!
//! ## Per batch
//!
//! ```text
//! 1. Drop the batch if it was queued before the last reset / script load
//! 2. Refuse it if no readable script is loaded          → empty-script
//! 3. Compose context + batch, snapshot cursor as search start
//! 4. Time-sliced match (the only await point)
//! 5. Re-check generation, then validate against the *current* cursor
//!    a. no match                                         → no-match
//!    b. behind cursor and outside the manual grace window → backward-jump
//!    c. otherwise move the cursor and emit an update
//! ```
//!
//! Exactly one task runs this loop, so batches never race on the cursor. The
//! state lock is only held between await points.

use std::ops::Range;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::{
    engine::{context::ContextBuffer, EngineConfig},
    error::{CuetrackError, Result},
    ipc::events::{AlignmentUpdateEvent, RejectReason, RejectedEvent, UpdateSource},
    matcher::{MatchCorpus, MatchResult, SegmentMatcher},
    script::Script,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything the cursor depends on. Owned by the engine behind one mutex.
#[derive(Debug)]
pub(crate) struct TrackerState {
    pub script: Arc<Script>,
    pub corpus: Arc<MatchCorpus>,
    /// Original index of the next word expected to be spoken.
    pub cursor: usize,
    pub context: ContextBuffer,
    /// Bumped on reset and script load; queued work from older generations is stale.
    pub generation: u64,
    /// Backward results are accepted until this instant after a manual jump.
    pub grace_until: Option<Instant>,
}

impl TrackerState {
    pub fn new(context_capacity: usize) -> Self {
        Self {
            script: Arc::new(Script::default()),
            corpus: Arc::new(MatchCorpus::default()),
            cursor: 0,
            context: ContextBuffer::new(context_capacity),
            generation: 0,
            grace_until: None,
        }
    }

    pub fn install_script(&mut self, script: Arc<Script>, corpus: Arc<MatchCorpus>) {
        self.script = script;
        self.corpus = corpus;
        self.rewind();
    }

    /// Cursor to 0, context cleared, queued batches invalidated.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.context.clear();
        self.grace_until = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn display_position(&self) -> usize {
        self.script.mapper().resolve_display_position(self.cursor)
    }
}

pub(crate) enum QueueItem {
    Batch { generation: u64, words: Vec<String> },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct AlignmentDiagnostics {
    pub batches_in: AtomicUsize,
    pub matches_accepted: AtomicUsize,
    pub no_match: AtomicUsize,
    pub backward_rejected: AtomicUsize,
    pub empty_script: AtomicUsize,
    pub stale_dropped: AtomicUsize,
    pub scheduler_yields: AtomicUsize,
    pub candidates_examined: AtomicUsize,
}

impl AlignmentDiagnostics {
    pub fn reset(&self) {
        self.batches_in.store(0, Ordering::Relaxed);
        self.matches_accepted.store(0, Ordering::Relaxed);
        self.no_match.store(0, Ordering::Relaxed);
        self.backward_rejected.store(0, Ordering::Relaxed);
        self.empty_script.store(0, Ordering::Relaxed);
        self.stale_dropped.store(0, Ordering::Relaxed);
        self.scheduler_yields.store(0, Ordering::Relaxed);
        self.candidates_examined.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            batches_in: self.batches_in.load(Ordering::Relaxed),
            matches_accepted: self.matches_accepted.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            backward_rejected: self.backward_rejected.load(Ordering::Relaxed),
            empty_script: self.empty_script.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            scheduler_yields: self.scheduler_yields.load(Ordering::Relaxed),
            candidates_examined: self.candidates_examined.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub batches_in: usize,
    pub matches_accepted: usize,
    pub no_match: usize,
    pub backward_rejected: usize,
    pub empty_script: usize,
    pub stale_dropped: usize,
    pub scheduler_yields: usize,
    pub candidates_examined: usize,
}

// ---------------------------------------------------------------------------
// Event fan-out
// ---------------------------------------------------------------------------

/// Broadcast senders plus the shared sequence counter.
#[derive(Clone)]
pub(crate) struct EventSink {
    update_tx: broadcast::Sender<AlignmentUpdateEvent>,
    reject_tx: broadcast::Sender<RejectedEvent>,
    seq: Arc<AtomicU64>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (update_tx, _) = broadcast::channel(capacity);
        let (reject_tx, _) = broadcast::channel(capacity);
        Self {
            update_tx,
            reject_tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<AlignmentUpdateEvent> {
        self.update_tx.subscribe()
    }

    pub fn subscribe_rejections(&self) -> broadcast::Receiver<RejectedEvent> {
        self.reject_tx.subscribe()
    }

    /// Translate an original-space update to display space and broadcast it.
    pub fn update(
        &self,
        script: &Script,
        position: usize,
        matched: Range<usize>,
        source: UpdateSource,
    ) -> AlignmentUpdateEvent {
        let mapper = script.mapper();
        let event = AlignmentUpdateEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            display_position: mapper.resolve_display_position(position),
            matched_display_indices: matched
                .filter_map(|i| mapper.to_display_index(i))
                .collect(),
            original_position: position,
            source,
        };
        let _ = self.update_tx.send(event.clone());
        event
    }

    pub fn reject(&self, reason: RejectReason, cursor: usize) -> RejectedEvent {
        let event = RejectedEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            reason,
            cursor,
        };
        let _ = self.reject_tx.send(event.clone());
        event
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// All context the consumer task needs.
pub(crate) struct OrchestratorContext {
    pub config: EngineConfig,
    pub matcher: SegmentMatcher,
    pub state: Arc<Mutex<TrackerState>>,
    pub events: EventSink,
    pub diagnostics: Arc<AlignmentDiagnostics>,
}

/// Drain the queue one batch at a time until `Shutdown` or the sender drops.
pub(crate) async fn run(ctx: OrchestratorContext, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
    info!("alignment orchestrator started");

    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Batch { generation, words } => {
                let span = debug_span!("batch", generation, words = words.len());
                process_batch(&ctx, generation, words).instrument(span).await;
            }
            QueueItem::Shutdown => break,
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        batches_in = snap.batches_in,
        matches_accepted = snap.matches_accepted,
        no_match = snap.no_match,
        backward_rejected = snap.backward_rejected,
        empty_script = snap.empty_script,
        stale_dropped = snap.stale_dropped,
        scheduler_yields = snap.scheduler_yields,
        candidates_examined = snap.candidates_examined,
        "alignment orchestrator stopped — diagnostics"
    );
}

pub(crate) async fn process_batch(ctx: &OrchestratorContext, generation: u64, batch: Vec<String>) {
    ctx.diagnostics.batches_in.fetch_add(1, Ordering::Relaxed);

    let prepared = {
        let state = ctx.state.lock();
        if state.generation != generation {
            None
        } else if state.corpus.is_empty() {
            Some(Err(state.cursor))
        } else {
            let (spoken, fresh) = state
                .context
                .compose(&batch, ctx.matcher.config().max_segment_words);
            Some(Ok((Arc::clone(&state.corpus), state.cursor, spoken, fresh)))
        }
    };

    let (corpus, search_start, spoken, fresh) = match prepared {
        None => {
            ctx.diagnostics.stale_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("dropping batch queued before the last reset");
            return;
        }
        Some(Err(cursor)) => {
            report_rejection(ctx, &CuetrackError::EmptyScript, cursor);
            return;
        }
        Some(Ok(prepared)) => prepared,
    };

    let started = Instant::now();
    let sliced = ctx
        .matcher
        .find_best_match_sliced(&spoken, fresh, &corpus, search_start)
        .await;
    ctx.diagnostics
        .scheduler_yields
        .fetch_add(sliced.yields, Ordering::Relaxed);
    ctx.diagnostics
        .candidates_examined
        .fetch_add(sliced.candidates, Ordering::Relaxed);
    debug!(
        search_start,
        spoken = spoken.len(),
        fresh,
        candidates = sliced.candidates,
        yields = sliced.yields,
        elapsed_us = started.elapsed().as_micros() as u64,
        "match search finished"
    );

    settle(ctx, generation, sliced.result, &batch);
}

/// Validate a finished search against the current state, then broadcast the
/// update or report the rejection.
fn settle(ctx: &OrchestratorContext, generation: u64, result: Option<MatchResult>, batch: &[String]) {
    let outcome = {
        let mut state = ctx.state.lock();
        if state.generation != generation {
            None
        } else {
            let committed = commit_match(&mut state, &ctx.config, result, batch, Instant::now());
            Some(match committed {
                Ok(accepted) => Ok((accepted, Arc::clone(&state.script))),
                Err(e) => Err((e, state.cursor)),
            })
        }
    };

    match outcome {
        None => {
            ctx.diagnostics.stale_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("discarding match computed against a replaced script");
        }
        Some(Ok((accepted, script))) => {
            ctx.diagnostics
                .matches_accepted
                .fetch_add(1, Ordering::Relaxed);
            let event = ctx.events.update(
                &script,
                accepted.position,
                accepted.matched.clone(),
                UpdateSource::Speech,
            );
            debug!(
                previous = accepted.previous,
                cursor = accepted.position,
                display_position = event.display_position,
                "cursor advanced"
            );
        }
        Some(Err((e, cursor))) => report_rejection(ctx, &e, cursor),
    }
}

fn report_rejection(ctx: &OrchestratorContext, error: &CuetrackError, cursor: usize) {
    match error {
        CuetrackError::NoMatch => {
            ctx.diagnostics.no_match.fetch_add(1, Ordering::Relaxed);
            debug!(cursor, "no match — waiting for more speech");
        }
        CuetrackError::BackwardJumpRejected { .. } => {
            ctx.diagnostics
                .backward_rejected
                .fetch_add(1, Ordering::Relaxed);
            warn!(%error, "rejected backward match");
        }
        CuetrackError::EmptyScript => {
            ctx.diagnostics.empty_script.fetch_add(1, Ordering::Relaxed);
            warn!("batch refused — no readable script loaded");
        }
        other => warn!(error = %other, "unexpected alignment failure"),
    }

    if let Some(reason) = error.reject_reason() {
        ctx.events.reject(reason, cursor);
    }
}

/// A cursor move that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Accepted {
    pub previous: usize,
    pub position: usize,
    /// Original indices covered by the batch's words.
    pub matched: Range<usize>,
}

/// Validate a match result against the current state and apply it.
pub(crate) fn commit_match(
    state: &mut TrackerState,
    config: &EngineConfig,
    result: Option<MatchResult>,
    batch: &[String],
    now: Instant,
) -> Result<Accepted> {
    let Some(found) = result else {
        // Unmatched words stay around to anchor the next batch.
        state.context.push_batch(batch);
        return Err(CuetrackError::NoMatch);
    };

    let proposed = found.end();
    let in_grace = state.grace_until.is_some_and(|until| now < until);
    if proposed < state.cursor && !in_grace {
        return Err(CuetrackError::BackwardJumpRejected {
            cursor: state.cursor,
            proposed,
        });
    }

    let previous = state.cursor;
    state.cursor = proposed;
    state.grace_until = None;

    if found.fresh_start.abs_diff(previous) > config.context_reset_jump {
        state.context.clear();
    }
    state.context.push_batch(batch);

    Ok(Accepted {
        previous,
        position: proposed,
        matched: found.fresh_start..proposed,
    })
}
