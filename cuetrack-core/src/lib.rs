//! # cuetrack-core
//!
//! Script-following engine for a teleprompter: aligns finalized speech
//! recognition batches to a script and reports where the reader is.
//!
//! ## Architecture
//!
//! ```text
//! Recognizer ──► BatchCoalescer (optional) ──► AlignmentEngine::push_batch
//!                                                    │
//!                                         mpsc queue (arrival order)
//!                                                    │
//!                                 orchestrator task: context + batch
//!                                                    │
//!                                   SegmentMatcher (time-sliced, forward-only)
//!                                                    │
//!                                  cursor (original space) ──► PositionMapper
//!                                                    │
//!                                broadcast::Sender<AlignmentUpdateEvent>
//! ```
//!
//! Scripts may embed non-spoken attachments with `[[name: content]]`. They are
//! shown as a single placeholder and never matched against speech.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod ipc;
pub mod matcher;
pub mod script;

// Convenience re-exports for downstream crates
pub use engine::{coalesce::BatchCoalescer, AlignmentEngine, EngineConfig};
pub use error::CuetrackError;
pub use ipc::events::{
    AlignmentUpdateEvent, RecognitionBatch, RejectReason, RejectedEvent, UpdateSource,
};
pub use matcher::{MatchResult, MatcherConfig, SegmentMatcher};
pub use script::{Attachment, PositionMapper, Script};
