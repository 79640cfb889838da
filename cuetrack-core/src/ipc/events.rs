//! Event types produced and consumed by the alignment engine.
//!
//! | Event | Direction | Subscription |
//! |-------|-----------|--------------|
//! | `RecognitionBatch` | host → engine | `AlignmentEngine::push_batch` |
//! | `AlignmentUpdateEvent` | engine → host | `subscribe_updates()` |
//! | `RejectedEvent` | engine → host | `subscribe_rejections()` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Recognition input
// ---------------------------------------------------------------------------

/// One finalized group of recognized words.
///
/// Interim/provisional text must be filtered out before it gets here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionBatch {
    pub words: Vec<String>,
}

impl RecognitionBatch {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }

    /// Whitespace-split a finalized transcript string.
    pub fn from_text(text: &str) -> Self {
        Self {
            words: text.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl From<Vec<String>> for RecognitionBatch {
    fn from(words: Vec<String>) -> Self {
        Self::new(words)
    }
}

impl From<&[&str]> for RecognitionBatch {
    fn from(words: &[&str]) -> Self {
        Self::new(words.iter().map(|w| w.to_string()).collect())
    }
}

impl From<&str> for RecognitionBatch {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

// ---------------------------------------------------------------------------
// Alignment updates
// ---------------------------------------------------------------------------

/// What moved the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    /// Speech matched the script.
    Speech,
    /// `update_position` from the host.
    Manual,
    /// Script load or `reset()`.
    Reset,
}

/// Emitted after every accepted cursor change, in display space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignmentUpdateEvent {
    /// Monotonically increasing event sequence number (shared with rejections).
    pub seq: u64,
    /// Display index of the next word to be read.
    pub display_position: usize,
    /// Display indices of the words just recognized, for highlighting.
    pub matched_display_indices: Vec<usize>,
    /// Cursor in original space.
    pub original_position: usize,
    pub source: UpdateSource,
}

// ---------------------------------------------------------------------------
// Rejections (diagnostic only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// Nothing in the forward window was similar enough.
    NoMatch,
    /// The match resolved behind the cursor.
    BackwardJump,
    /// A batch arrived while no readable script was loaded.
    EmptyScript,
}

/// Emitted when a batch leaves the cursor where it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedEvent {
    pub seq: u64,
    pub reason: RejectReason,
    /// Cursor (original space) at the time of rejection.
    pub cursor: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_event_serializes_with_camel_case() {
        let event = AlignmentUpdateEvent {
            seq: 4,
            display_position: 12,
            matched_display_indices: vec![9, 10, 11],
            original_position: 15,
            source: UpdateSource::Speech,
        };

        let json = serde_json::to_value(&event).expect("serialize update event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["displayPosition"], 12);
        assert_eq!(json["matchedDisplayIndices"][2], 11);
        assert_eq!(json["originalPosition"], 15);
        assert_eq!(json["source"], "speech");

        let round_trip: AlignmentUpdateEvent =
            serde_json::from_value(json).expect("deserialize update event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn reject_reasons_use_kebab_case() {
        for (reason, expected) in [
            (RejectReason::NoMatch, "no-match"),
            (RejectReason::BackwardJump, "backward-jump"),
            (RejectReason::EmptyScript, "empty-script"),
        ] {
            let json = serde_json::to_value(RejectedEvent {
                seq: 1,
                reason,
                cursor: 3,
            })
            .expect("serialize rejection");
            assert_eq!(json["reason"], expected);
        }
        assert!(serde_json::from_str::<RejectReason>(r#""NoMatch""#).is_err());
    }

    #[test]
    fn recognition_batch_from_text_splits_words() {
        let batch = RecognitionBatch::from("  welcome   to our ");
        assert_eq!(batch.words, vec!["welcome", "to", "our"]);
        let json = serde_json::to_string(&batch).expect("serialize batch");
        assert_eq!(json, r#"{"words":["welcome","to","our"]}"#);
    }
}
