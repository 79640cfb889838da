//! `AlignmentEngine` — top-level handle around the alignment orchestrator.
//!
//! ## Lifecycle
//!
//! ```text
//! AlignmentEngine::new()
//!     └─► load_script()       → cursor = 0, context cleared
//!         └─► start()         → consumer task spawned on the current tokio runtime
//!             ├─► push_batch()       (any number, processed in arrival order)
//!             ├─► update_position()  (manual jump, opens the grace window)
//!             ├─► reset()            (cursor = 0, queued batches discarded)
//!             └─► stop()             → consumer exits after the batches already queued
//! ```
//!
//! `start()`/`stop()` return an error in the wrong state rather than panicking.
//!
//! ## Threading
//!
//! The engine is `Send + Sync`; wrap it in `Arc<AlignmentEngine>` to share it
//! between the recognition callback and the UI. Only the consumer task runs
//! matches, so cursor updates are serialized by construction. Manual jumps and
//! resets take the same state lock for a few instructions and never wait on a
//! match.

pub mod coalesce;
pub mod context;
pub mod orchestrator;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    error::{CuetrackError, Result},
    ipc::events::{AlignmentUpdateEvent, RecognitionBatch, RejectedEvent, UpdateSource},
    matcher::{similarity::normalize_words, MatchCorpus, MatcherConfig, SegmentMatcher},
    script::Script,
};

use orchestrator::{AlignmentDiagnostics, EventSink, OrchestratorContext, QueueItem, TrackerState};

pub use orchestrator::DiagnosticsSnapshot;

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `AlignmentEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    pub matcher: MatcherConfig,
    /// Recent words kept to anchor short batches. Default: 24.
    pub context_capacity: usize,
    /// Context is dropped when a match lands more than this many words away
    /// from the cursor. Default: 20.
    pub context_reset_jump: usize,
    /// After a manual jump, backward matches are accepted for this long
    /// (first one only). Default: 1000 ms.
    pub manual_grace_ms: u64,
    /// Quiet period before a `BatchCoalescer` pushes what it collected.
    /// Default: 250 ms.
    pub coalesce_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            context_capacity: 24,
            context_reset_jump: 20,
            manual_grace_ms: 1_000,
            coalesce_delay_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON object; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(CuetrackError::Config(
                "engine config must be a JSON object".into(),
            ));
        }
        let mut config: Self = serde_json::from_value(value)?;
        config.normalize();
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn normalize(&mut self) {
        self.matcher.normalize();
        self.context_capacity = self.context_capacity.min(256);
        self.manual_grace_ms = self.manual_grace_ms.min(10_000);
        self.coalesce_delay_ms = self.coalesce_delay_ms.clamp(10, 5_000);
    }

    pub fn manual_grace(&self) -> Duration {
        Duration::from_millis(self.manual_grace_ms)
    }

    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }
}

/// The top-level engine handle.
pub struct AlignmentEngine {
    config: EngineConfig,
    matcher: SegmentMatcher,
    state: Arc<Mutex<TrackerState>>,
    events: EventSink,
    diagnostics: Arc<AlignmentDiagnostics>,
    /// `Some` while the consumer task is running.
    queue_tx: Mutex<Option<mpsc::UnboundedSender<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// True from `start()` until the consumer has handled its last batch.
    consumer_alive: Arc<AtomicBool>,
}

impl AlignmentEngine {
    /// Create an engine with no script loaded. Call `start()` before pushing batches.
    pub fn new(mut config: EngineConfig) -> Self {
        config.normalize();
        let state = TrackerState::new(config.context_capacity);
        Self {
            matcher: SegmentMatcher::new(config.matcher.clone()),
            config,
            state: Arc::new(Mutex::new(state)),
            events: EventSink::new(BROADCAST_CAP),
            diagnostics: Arc::new(AlignmentDiagnostics::default()),
            queue_tx: Mutex::new(None),
            worker: Mutex::new(None),
            consumer_alive: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the consumer task on the current tokio runtime.
    ///
    /// # Errors
    /// - `CuetrackError::AlreadyRunning` if already started, or if a stopped
    ///   consumer is still working through its backlog (see [`Self::join`]).
    /// - `CuetrackError::Other` when called outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut queue = self.queue_tx.lock();
        if queue.is_some() {
            return Err(CuetrackError::AlreadyRunning);
        }

        if self.consumer_alive.load(Ordering::Acquire) {
            debug!("previous consumer still draining; refusing to start a second one");
            return Err(CuetrackError::AlreadyRunning);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CuetrackError::Other(anyhow::anyhow!("start() needs a tokio runtime: {e}"))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = OrchestratorContext {
            config: self.config.clone(),
            matcher: self.matcher.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        self.diagnostics.reset();
        self.consumer_alive.store(true, Ordering::Release);
        let alive = ConsumerAlive(Arc::clone(&self.consumer_alive));
        let worker = runtime.spawn(async move {
            let _alive = alive;
            orchestrator::run(ctx, rx).await;
        });
        *self.worker.lock() = Some(worker);
        *queue = Some(tx);
        info!("alignment engine started");
        Ok(())
    }

    /// Ask the consumer to exit once the batches already queued are processed.
    ///
    /// The consumer keeps running until then; `start()` is refused in the
    /// meantime. Await [`Self::join`] to wait for it.
    ///
    /// # Errors
    /// - `CuetrackError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        let Some(tx) = self.queue_tx.lock().take() else {
            return Err(CuetrackError::NotRunning);
        };
        let _ = tx.send(QueueItem::Shutdown);
        info!("alignment engine stop requested");
        Ok(())
    }

    /// Wait for a stopped consumer to finish its backlog. Returns immediately
    /// when no consumer was ever started.
    ///
    /// # Errors
    /// - `CuetrackError::AlreadyRunning` if the engine has not been stopped.
    pub async fn join(&self) -> Result<()> {
        if self.is_running() {
            return Err(CuetrackError::AlreadyRunning);
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| CuetrackError::Other(anyhow::Error::new(e)))?;
        }
        Ok(())
    }

    /// `stop()`, then wait until every queued batch has been handled.
    pub async fn stop_and_drain(&self) -> Result<()> {
        self.stop()?;
        self.join().await
    }

    pub fn is_running(&self) -> bool {
        self.queue_tx.lock().is_some()
    }

    /// Replace the script. Cursor returns to 0 and queued batches are discarded.
    pub fn load_script(&self, text: &str) -> Arc<Script> {
        let script = Arc::new(Script::parse(text));
        let corpus = Arc::new(MatchCorpus::from_script(&script));
        info!(
            words = script.len(),
            readable = script.mapper().display_len(),
            attachments = script.attachments().len(),
            markup_issues = script.issues().len(),
            "script loaded"
        );

        self.state
            .lock()
            .install_script(Arc::clone(&script), corpus);
        self.events
            .update(&script, 0, 0..0, UpdateSource::Reset);
        script
    }

    pub fn script(&self) -> Arc<Script> {
        Arc::clone(&self.state.lock().script)
    }

    /// Queue a finalized recognition batch.
    ///
    /// Words are normalized here; a batch with nothing matchable is dropped.
    ///
    /// # Errors
    /// - `CuetrackError::NotRunning` before `start()` / after `stop()`.
    /// - `CuetrackError::QueueClosed` if the consumer task died.
    pub fn push_batch(&self, batch: impl Into<RecognitionBatch>) -> Result<()> {
        let batch = batch.into();
        let words = normalize_words(&batch.words);

        let queue = self.queue_tx.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(CuetrackError::NotRunning);
        };
        if words.is_empty() {
            debug!(raw = batch.words.len(), "ignoring batch with no matchable words");
            return Ok(());
        }

        let generation = self.state.lock().generation;
        tx.send(QueueItem::Batch { generation, words })
            .map_err(|_| CuetrackError::QueueClosed)
    }

    /// Move the cursor to `original_index` (clamped to the script length),
    /// even backward. Clears context and opens the grace window.
    ///
    /// # Errors
    /// - `CuetrackError::EmptyScript` when no script is loaded.
    pub fn update_position(&self, original_index: usize) -> Result<()> {
        let (script, previous, cursor) = {
            let mut state = self.state.lock();
            if state.script.is_empty() {
                return Err(CuetrackError::EmptyScript);
            }
            let previous = state.cursor;
            state.cursor = original_index.min(state.script.len());
            state.context.clear();
            state.grace_until = Some(Instant::now() + self.config.manual_grace());
            (Arc::clone(&state.script), previous, state.cursor)
        };

        info!(previous, cursor, "manual position override");
        self.events
            .update(&script, cursor, cursor..cursor, UpdateSource::Manual);
        Ok(())
    }

    /// Cursor to 0, context cleared, batches still queued are discarded.
    pub fn reset(&self) {
        let script = {
            let mut state = self.state.lock();
            state.rewind();
            Arc::clone(&state.script)
        };
        info!("alignment reset");
        self.events.update(&script, 0, 0..0, UpdateSource::Reset);
    }

    /// Cursor in original space.
    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }

    /// Cursor in display space; a cursor inside an attachment reports the
    /// next readable word.
    pub fn display_position(&self) -> usize {
        self.state.lock().display_position()
    }

    /// Subscribe to accepted cursor changes.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<AlignmentUpdateEvent> {
        self.events.subscribe_updates()
    }

    /// Subscribe to diagnostic rejection events.
    pub fn subscribe_rejections(&self) -> broadcast::Receiver<RejectedEvent> {
        self.events.subscribe_rejections()
    }

    /// Snapshot of orchestrator counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

/// Clears the liveness flag when the consumer task ends, panics included.
struct ConsumerAlive(Arc<AtomicBool>);

impl Drop for ConsumerAlive {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for AlignmentEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
