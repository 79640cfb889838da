//! Resumable candidate scan.
//!
//! `MatchSearch` keeps its loop position between calls to [`MatchSearch::advance`],
//! so a caller can stop at a deadline and pick up exactly where it left off.

use std::time::Instant;

use super::corpus::MatchCorpus;
use super::similarity::{lengths_compatible, normalize_words, segment_similarity};
use super::{MatchResult, MatcherConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchProgress {
    /// Deadline reached; call `advance` again to continue.
    Pending,
    Done(Option<MatchResult>),
}

pub struct MatchSearch<'a> {
    config: &'a MatcherConfig,
    corpus: &'a MatchCorpus,
    /// Normalized context words followed by normalized batch words.
    spoken: Vec<String>,
    fresh: usize,
    /// Corpus index of the cursor.
    start: usize,
    /// Current segment length; 0 once the scan is over.
    len: usize,
    /// Next landing offset to try for `len`.
    offset: usize,
    spoken_joined: String,
    spoken_chars: usize,
    best: Option<MatchResult>,
    candidates: usize,
}

impl<'a> MatchSearch<'a> {
    pub fn new<S: AsRef<str>>(
        config: &'a MatcherConfig,
        corpus: &'a MatchCorpus,
        spoken: &[S],
        fresh: usize,
        search_start: usize,
    ) -> Self {
        let split = spoken.len().saturating_sub(fresh);
        let mut normalized = normalize_words(&spoken[..split]);
        let context_len = normalized.len();
        normalized.extend(normalize_words(&spoken[split..]));
        let fresh = normalized.len() - context_len;

        let len = if fresh == 0 || corpus.is_empty() {
            0
        } else {
            normalized.len().min(config.max_segment_words)
        };

        let mut search = Self {
            config,
            corpus,
            spoken: normalized,
            fresh,
            start: corpus.first_at_or_after(search_start),
            len,
            offset: 0,
            spoken_joined: String::new(),
            spoken_chars: 0,
            best: None,
            candidates: 0,
        };
        search.refresh_spoken_segment();
        search
    }

    /// Candidates examined so far.
    pub fn candidates(&self) -> usize {
        self.candidates
    }

    /// Scan until done, or until `deadline` passes after examining a candidate.
    pub fn advance(&mut self, deadline: Option<Instant>) -> SearchProgress {
        while self.len > 0 {
            let window = self.config.window_for(self.len);
            if self.offset > window {
                self.next_length();
                continue;
            }

            let distance = self.offset;
            self.offset += 1;

            let landing = self.start + distance;
            let context = self.len.saturating_sub(self.fresh);
            let Some(index) = landing.checked_sub(context) else {
                continue;
            };
            if index + self.len > self.corpus.len() {
                // Every later landing for this length runs off the end too.
                self.next_length();
                continue;
            }

            if self.examine(index, distance) {
                self.len = 0;
                break;
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return SearchProgress::Pending;
            }
        }
        SearchProgress::Done(self.best)
    }

    fn next_length(&mut self) {
        self.len -= 1;
        self.offset = 0;
        self.refresh_spoken_segment();
    }

    fn refresh_spoken_segment(&mut self) {
        if self.len == 0 {
            return;
        }
        let tail = &self.spoken[self.spoken.len() - self.len..];
        self.spoken_joined = tail.join(" ");
        self.spoken_chars = self.spoken_joined.chars().count();
    }

    /// Score one candidate. Returns `true` when it is good enough to stop.
    fn examine(&mut self, index: usize, distance: usize) -> bool {
        self.candidates += 1;

        let segment = self.corpus.joined(index..index + self.len);
        if !lengths_compatible(
            self.spoken_chars,
            segment.chars().count(),
            self.config.max_length_ratio,
        ) {
            return false;
        }

        let similarity = segment_similarity(&self.spoken_joined, &segment);
        if !self.config.accepts(self.len, similarity, distance) {
            return false;
        }

        let score = self.config.score(self.len, similarity, distance);
        if self.best.map_or(true, |b| score > b.score) {
            let first = self.corpus.original_index(index);
            self.best = Some(MatchResult {
                index: first,
                length: self.corpus.original_end(index + self.len) - first,
                fresh_start: self.corpus.original_index(self.start + distance),
                score,
                raw_similarity: similarity,
                distance,
                words: self.len,
            });
        }

        self.config
            .is_early_exit(self.len, self.spoken.len(), similarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;

    fn corpus(text: &str) -> MatchCorpus {
        MatchCorpus::from_script(&Script::parse(text))
    }

    #[test]
    fn empty_corpus_finishes_immediately() {
        let config = MatcherConfig::default();
        let corpus = MatchCorpus::default();
        let mut search = MatchSearch::new(&config, &corpus, &["hello"], 1, 0);
        assert_eq!(search.advance(None), SearchProgress::Done(None));
        assert_eq!(search.candidates(), 0);
    }

    #[test]
    fn punctuation_only_batch_has_nothing_to_match() {
        let config = MatcherConfig::default();
        let corpus = corpus("hello world");
        let mut search = MatchSearch::new(&config, &corpus, &["hello", "—", "..."], 2, 0);
        assert_eq!(search.advance(None), SearchProgress::Done(None));
    }

    #[test]
    fn expired_deadline_pauses_after_one_candidate() {
        let config = MatcherConfig::default();
        let corpus = corpus("one two three four five six");
        let mut search = MatchSearch::new(&config, &corpus, &["four", "fiv"], 2, 0);

        let past = Instant::now();
        assert_eq!(search.advance(Some(past)), SearchProgress::Pending);
        assert_eq!(search.candidates(), 1);

        let SearchProgress::Done(Some(m)) = search.advance(None) else {
            panic!("expected a match after resuming");
        };
        assert_eq!((m.index, m.length), (3, 2));
    }

    #[test]
    fn finished_search_keeps_reporting_done() {
        let config = MatcherConfig::default();
        let corpus = corpus("one two three");
        let mut search = MatchSearch::new(&config, &corpus, &["one", "two", "three"], 3, 0);
        let first = search.advance(None);
        assert!(matches!(first, SearchProgress::Done(Some(_))));
        assert_eq!(search.advance(None), first);
    }
}
