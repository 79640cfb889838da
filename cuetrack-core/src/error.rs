use thiserror::Error;

use crate::ipc::events::RejectReason;
use crate::script::markup::MarkupIssue;

/// All errors produced by cuetrack-core.
#[derive(Debug, Error)]
pub enum CuetrackError {
    #[error("no script segment matched the spoken words")]
    NoMatch,

    #[error("match would move the cursor backward ({cursor} → {proposed})")]
    BackwardJumpRejected { cursor: usize, proposed: usize },

    #[error("no script loaded — alignment refused")]
    EmptyScript,

    #[error("malformed attachment markup: {0}")]
    Markup(#[from] MarkupIssue),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("alignment queue closed — consumer task has exited")]
    QueueClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CuetrackError {
    /// Diagnostic reason for the alignment failures that are reported as
    /// rejection events instead of being returned to the caller.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::NoMatch => Some(RejectReason::NoMatch),
            Self::BackwardJumpRejected { .. } => Some(RejectReason::BackwardJump),
            Self::EmptyScript => Some(RejectReason::EmptyScript),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CuetrackError>;
