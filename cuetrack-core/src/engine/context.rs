//! Bounded FIFO of recently recognized words.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct ContextBuffer {
    words: VecDeque<String>,
    capacity: usize,
}

impl ContextBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `batch`, evicting the oldest words beyond capacity.
    pub fn push_batch(&mut self, batch: &[String]) {
        if self.capacity == 0 {
            return;
        }
        let skip = batch.len().saturating_sub(self.capacity);
        for word in &batch[skip..] {
            if self.words.len() == self.capacity {
                self.words.pop_front();
            }
            self.words.push_back(word.clone());
        }
    }

    /// Context followed by `batch`, trimmed to the last `max_words`.
    /// Returns the words and how many of them belong to `batch`.
    pub fn compose(&self, batch: &[String], max_words: usize) -> (Vec<String>, usize) {
        let fresh = batch.len().min(max_words);
        let context = (max_words - fresh).min(self.words.len());

        let mut words = Vec::with_capacity(context + fresh);
        words.extend(self.words.iter().skip(self.words.len() - context).cloned());
        words.extend_from_slice(&batch[batch.len() - fresh..]);
        (words, fresh)
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }
}
