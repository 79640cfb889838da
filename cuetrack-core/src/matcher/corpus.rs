//! Matchable view of a script.
//!
//! Only readable words that survive normalization take part in matching.
//! Positions inside the corpus are "corpus indices"; every corpus word keeps
//! its original index so results can be reported in original space.

use std::ops::Range;

use crate::script::Script;

use super::similarity::normalize_word;

#[derive(Debug, Clone, Default)]
pub struct MatchCorpus {
    words: Vec<String>,
    original: Vec<usize>,
}

impl MatchCorpus {
    pub fn from_script(script: &Script) -> Self {
        let mut words = Vec::new();
        let mut original = Vec::new();
        for (index, word) in script.readable_words() {
            let normalized = normalize_word(word);
            if normalized.is_empty() {
                continue;
            }
            words.push(normalized);
            original.push(index);
        }
        Self { words, original }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// First corpus index whose original index is `>= original_index`.
    pub fn first_at_or_after(&self, original_index: usize) -> usize {
        self.original.partition_point(|&o| o < original_index)
    }

    pub fn original_index(&self, corpus_index: usize) -> usize {
        self.original[corpus_index]
    }

    /// Original index just past the corpus word before `corpus_end`.
    pub fn original_end(&self, corpus_end: usize) -> usize {
        match corpus_end.checked_sub(1) {
            Some(last) => self.original[last] + 1,
            None => 0,
        }
    }

    /// Space-joined normalized words of `range`.
    pub fn joined(&self, range: Range<usize>) -> String {
        self.words[range].join(" ")
    }
}
