//! Word normalization and segment similarity.

use strsim::normalized_levenshtein;

/// Lowercase alphanumerics only; punctuation and apostrophes are dropped so
/// `"Don't,"` and `"dont"` compare equal.
pub fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalize a word list, dropping words that normalize to nothing.
pub fn normalize_words<S: AsRef<str>>(words: &[S]) -> Vec<String> {
    words
        .iter()
        .map(|w| normalize_word(w.as_ref()))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Edit-distance similarity in [0, 1]: Levenshtein distance over the longer
/// length, inverted.
pub fn segment_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b)
}

/// Cheap pre-filter: segments whose character lengths differ by more than
/// `max_ratio` cannot be a plausible match.
pub fn lengths_compatible(a_chars: usize, b_chars: usize, max_ratio: f64) -> bool {
    let (short, long) = if a_chars <= b_chars {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };
    if short == 0 {
        return long == 0;
    }
    long as f64 <= short as f64 * max_ratio
}
