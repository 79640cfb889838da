//! Approximate segment matcher.
//!
//! Given the spoken words of a batch (optionally preceded by recent context)
//! and the cursor, finds where in the script the speaker is. The search only
//! looks forward: the first fresh word of every candidate must land at or
//! after the cursor.
//!
//! ## Candidate scan
//!
//! ```text
//! for L in min(max_segment_words, spoken.len()) ..= 1   (longest first)
//!   for landing in cursor ..= cursor + window(L)
//!     script segment = corpus[landing - context(L) .. + L]
//!     spoken segment = last L spoken words
//!     similarity     = normalized Levenshtein of the joined segments
//!     score          = similarity − penalty·distance + bonus·min(L, cap)
//! ```
//!
//! A candidate only counts if it clears the length-dependent similarity
//! minimum and the similarity-dependent distance cap. The scan is a resumable
//! state machine (see [`search`]) so the async entry point can hand control
//! back to the scheduler whenever its time slice runs out.

pub mod corpus;
pub mod search;
pub mod similarity;

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use corpus::MatchCorpus;
use search::{MatchSearch, SearchProgress};

/// Similarity at which a long enough candidate ends the scan immediately.
const EARLY_EXIT_SIMILARITY: f64 = 0.98;
const EARLY_EXIT_MIN_WORDS: usize = 3;

/// Multi-word candidates above this similarity may land anywhere in the window.
const MULTI_WORD_CONFIDENT_SIMILARITY: f64 = 0.85;
const MULTI_WORD_MARGINAL_DISTANCE_CAP: usize = 20;
const SINGLE_WORD_CONFIDENT_SIMILARITY: f64 = 0.95;
const SINGLE_WORD_CONFIDENT_DISTANCE_CAP: usize = 8;
const SINGLE_WORD_MARGINAL_DISTANCE_CAP: usize = 3;

/// Precision 0 → 0.45, precision 100 → 0.85 for multi-word segments.
const MIN_SIMILARITY_FLOOR: f64 = 0.45;
const MIN_SIMILARITY_SPAN: f64 = 0.40;
/// Single words are easy to match by accident.
const SINGLE_WORD_STRICTNESS: f64 = 0.15;
const MAX_MIN_SIMILARITY: f64 = 0.98;

/// Tunable matcher parameters. All values are defaults, not derived constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct MatcherConfig {
    /// 0 (lenient) ..= 100 (strict). Default: 50.
    pub precision: u8,
    /// Longest spoken suffix tried. Default: 10.
    pub max_segment_words: usize,
    /// Forward window for single-word segments. Default: 8.
    pub min_window: usize,
    /// Extra window per segment word. Default: 6.
    pub window_per_word: usize,
    /// Hard cap on how far ahead of the cursor a segment may land. Default: 60.
    pub max_lookahead: usize,
    /// Score penalty per word between the cursor and the landing. Default: 0.004.
    pub distance_penalty: f64,
    /// Score bonus per matched word, up to `length_bonus_cap`. Default: 0.03.
    pub length_bonus: f64,
    pub length_bonus_cap: usize,
    /// Character-length ratio beyond which candidates are skipped. Default: 3.0.
    pub max_length_ratio: f64,
    /// Work per scheduler slice before yielding (ms). Default: 8.
    /// Overridden by `CUETRACK_SLICE_BUDGET_MS` when set.
    pub slice_budget_ms: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            precision: 50,
            max_segment_words: 10,
            min_window: 8,
            window_per_word: 6,
            max_lookahead: 60,
            distance_penalty: 0.004,
            length_bonus: 0.03,
            length_bonus_cap: 6,
            max_length_ratio: 3.0,
            slice_budget_ms: 8,
        }
    }
}

impl MatcherConfig {
    /// Clamp every field into a usable range.
    pub fn normalize(&mut self) {
        self.precision = self.precision.min(100);
        self.max_segment_words = self.max_segment_words.clamp(1, 32);
        self.max_lookahead = self.max_lookahead.clamp(1, 1_000);
        self.min_window = self.min_window.min(self.max_lookahead);
        self.window_per_word = self.window_per_word.min(self.max_lookahead);
        self.distance_penalty = self.distance_penalty.clamp(0.0, 1.0);
        self.length_bonus = self.length_bonus.clamp(0.0, 1.0);
        self.length_bonus_cap = self.length_bonus_cap.clamp(1, self.max_segment_words);
        if !self.max_length_ratio.is_finite() || self.max_length_ratio < 1.0 {
            self.max_length_ratio = 1.0;
        }
        self.slice_budget_ms = self.slice_budget_ms.clamp(1, 100);
    }

    /// Forward window (in corpus words) searched for a segment of `len` words.
    pub fn window_for(&self, len: usize) -> usize {
        (self.min_window + len.saturating_sub(1) * self.window_per_word).min(self.max_lookahead)
    }

    /// Minimum raw similarity for a segment of `len` words.
    pub fn min_similarity(&self, len: usize) -> f64 {
        let multi = MIN_SIMILARITY_FLOOR + MIN_SIMILARITY_SPAN * f64::from(self.precision) / 100.0;
        if len <= 1 {
            (multi + SINGLE_WORD_STRICTNESS).min(MAX_MIN_SIMILARITY)
        } else {
            multi
        }
    }

    /// Furthest a segment of `len` words with `similarity` may land from the cursor.
    pub fn distance_cap(&self, len: usize, similarity: f64) -> usize {
        let cap = if len <= 1 {
            if similarity >= SINGLE_WORD_CONFIDENT_SIMILARITY {
                SINGLE_WORD_CONFIDENT_DISTANCE_CAP
            } else {
                SINGLE_WORD_MARGINAL_DISTANCE_CAP
            }
        } else if similarity >= MULTI_WORD_CONFIDENT_SIMILARITY {
            self.max_lookahead
        } else {
            MULTI_WORD_MARGINAL_DISTANCE_CAP
        };
        cap.min(self.max_lookahead)
    }

    pub fn accepts(&self, len: usize, similarity: f64, distance: usize) -> bool {
        similarity >= self.min_similarity(len) && distance <= self.distance_cap(len, similarity)
    }

    pub fn score(&self, len: usize, similarity: f64, distance: usize) -> f64 {
        similarity - self.distance_penalty * distance as f64
            + self.length_bonus * len.min(self.length_bonus_cap) as f64
    }

    pub fn is_early_exit(&self, len: usize, spoken_len: usize, similarity: f64) -> bool {
        similarity >= EARLY_EXIT_SIMILARITY && (len >= EARLY_EXIT_MIN_WORDS || len == spoken_len)
    }

    pub fn slice_budget(&self) -> Duration {
        let ms = slice_budget_override().unwrap_or(self.slice_budget_ms);
        Duration::from_millis(ms)
    }
}

fn slice_budget_override() -> Option<u64> {
    static OVERRIDE: OnceLock<Option<u64>> = OnceLock::new();
    *OVERRIDE.get_or_init(|| {
        std::env::var("CUETRACK_SLICE_BUDGET_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 100))
    })
}

/// Best accepted alignment of a spoken segment. Indices are in original space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Original index of the first script word of the segment.
    pub index: usize,
    /// Original-space span of the segment; `index + length` is the new cursor.
    pub length: usize,
    /// First original index covered by words of the current batch.
    pub fresh_start: usize,
    pub score: f64,
    pub raw_similarity: f64,
    /// Corpus words between the cursor and where the fresh words land.
    pub distance: usize,
    /// Spoken words in the segment.
    pub words: usize,
}

impl MatchResult {
    pub fn end(&self) -> usize {
        self.index + self.length
    }
}

/// Result of a time-sliced search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicedMatch {
    pub result: Option<MatchResult>,
    /// Times the search handed control back to the scheduler.
    pub yields: usize,
    pub candidates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentMatcher {
    config: MatcherConfig,
}

impl SegmentMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Run the search to completion on the calling thread.
    ///
    /// `spoken` is context followed by the batch; the last `fresh` words are
    /// the batch. Returns `None` when nothing clears the thresholds.
    pub fn find_best_match<S: AsRef<str>>(
        &self,
        spoken: &[S],
        fresh: usize,
        corpus: &MatchCorpus,
        search_start: usize,
    ) -> Option<MatchResult> {
        let mut search = MatchSearch::new(&self.config, corpus, spoken, fresh, search_start);
        loop {
            if let SearchProgress::Done(result) = search.advance(None) {
                return result;
            }
        }
    }

    /// Same search, but yields to the tokio scheduler every time the current
    /// slice exceeds [`MatcherConfig::slice_budget`].
    pub async fn find_best_match_sliced<S: AsRef<str>>(
        &self,
        spoken: &[S],
        fresh: usize,
        corpus: &MatchCorpus,
        search_start: usize,
    ) -> SlicedMatch {
        self.find_best_match_with_budget(
            spoken,
            fresh,
            corpus,
            search_start,
            self.config.slice_budget(),
        )
        .await
    }

    pub async fn find_best_match_with_budget<S: AsRef<str>>(
        &self,
        spoken: &[S],
        fresh: usize,
        corpus: &MatchCorpus,
        search_start: usize,
        budget: Duration,
    ) -> SlicedMatch {
        let mut search = MatchSearch::new(&self.config, corpus, spoken, fresh, search_start);
        let mut yields = 0usize;
        loop {
            let deadline = Instant::now() + budget;
            match search.advance(Some(deadline)) {
                SearchProgress::Done(result) => {
                    return SlicedMatch {
                        result,
                        yields,
                        candidates: search.candidates(),
                    };
                }
                SearchProgress::Pending => {
                    yields += 1;
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}
