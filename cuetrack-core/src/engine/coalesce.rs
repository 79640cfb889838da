//! Debounce for recognizers that finalize one word at a time.
//!
//! Words pushed in quick succession are held until the stream goes quiet for
//! `delay`, then forwarded to the engine as one batch. Longer batches match
//! more reliably than single words.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    engine::AlignmentEngine,
    error::{CuetrackError, Result},
    ipc::events::RecognitionBatch,
};

enum CoalesceMsg {
    Words(Vec<String>),
    Flush,
}

/// Collects words and forwards them to an [`AlignmentEngine`] after a quiet period.
///
/// Dropping the coalescer forwards whatever is still pending.
pub struct BatchCoalescer {
    tx: mpsc::UnboundedSender<CoalesceMsg>,
    task: JoinHandle<()>,
    delay: Duration,
}

impl BatchCoalescer {
    /// Spawn with the engine's configured `coalesce_delay_ms`.
    pub fn from_config(engine: Arc<AlignmentEngine>) -> Result<Self> {
        let delay = engine.config().coalesce_delay();
        Self::spawn(engine, delay)
    }

    /// Spawn the debounce task on the current tokio runtime.
    pub fn spawn(engine: Arc<AlignmentEngine>, delay: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CuetrackError::Other(anyhow::anyhow!("coalescer needs a tokio runtime: {e}"))
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(debounce_loop(engine, delay, rx));
        Ok(Self { tx, task, delay })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Add words to the pending batch and restart the quiet-period timer.
    pub fn push(&self, batch: impl Into<RecognitionBatch>) -> Result<()> {
        let batch = batch.into();
        if batch.is_empty() {
            return Ok(());
        }
        self.tx
            .send(CoalesceMsg::Words(batch.words))
            .map_err(|_| CuetrackError::QueueClosed)
    }

    /// Forward the pending batch now.
    pub fn flush(&self) -> Result<()> {
        self.tx
            .send(CoalesceMsg::Flush)
            .map_err(|_| CuetrackError::QueueClosed)
    }

    /// Forward the pending batch and wait for the task to exit.
    pub async fn close(self) -> Result<()> {
        let Self { tx, task, .. } = self;
        drop(tx);
        task.await
            .map_err(|e| CuetrackError::Other(anyhow::Error::new(e)))
    }
}

async fn debounce_loop(
    engine: Arc<AlignmentEngine>,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<CoalesceMsg>,
) {
    let mut pending: Vec<String> = Vec::new();

    loop {
        let msg = if pending.is_empty() {
            rx.recv().await
        } else {
            match tokio::time::timeout(delay, rx.recv()).await {
                Ok(msg) => msg,
                Err(_) => {
                    forward(&engine, &mut pending);
                    continue;
                }
            }
        };

        match msg {
            Some(CoalesceMsg::Words(words)) => pending.extend(words),
            Some(CoalesceMsg::Flush) => forward(&engine, &mut pending),
            None => {
                forward(&engine, &mut pending);
                break;
            }
        }
    }
    debug!("batch coalescer stopped");
}

fn forward(engine: &AlignmentEngine, pending: &mut Vec<String>) {
    if pending.is_empty() {
        return;
    }
    let words = std::mem::take(pending);
    debug!(words = words.len(), "forwarding coalesced batch");
    if let Err(e) = engine.push_batch(words) {
        warn!(error = %e, "coalesced batch dropped");
    }
}
