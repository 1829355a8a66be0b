//! Near-duplicate detection with character n-gram Jaccard similarity.

use std::collections::HashSet;

use super::key::{prefix_chars, suffix_chars};

pub const DEFAULT_GRAM_SIZE: usize = 3;
pub const DEFAULT_THRESHOLD: f64 = 0.90;

/// Normalized texts longer than this are reduced to head + tail samples.
const MAX_COMPARE_CHARS: usize = 10_000;
const SAMPLE_EDGE_CHARS: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityMatcher {
    gram_size: usize,
    threshold: f64,
}

impl SimilarityMatcher {
    pub fn new() -> Self {
        Self {
            gram_size: DEFAULT_GRAM_SIZE,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_gram_size(mut self, n: usize) -> Self {
        self.gram_size = n.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn gram_size(&self) -> usize {
        self.gram_size
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Jaccard similarity of the n-gram sets of both texts, in `[0, 1]`.
    ///
    /// Two empty texts score 0.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let grams_a = self.grams(a);
        let grams_b = self.grams(b);
        jaccard(&grams_a, &grams_b)
    }

    /// Whether `a` and `b` are close enough to share a cached result.
    pub fn is_match(&self, a: &str, b: &str) -> bool {
        self.similarity(a, b) >= self.threshold
    }

    /// The n-gram set of the normalized, size-bounded form of `text`.
    pub fn grams(&self, text: &str) -> HashSet<String> {
        ngrams(&comparison_sample(text), self.gram_size)
    }

    /// The n-gram set of a stored [`comparison_sample`], without re-sampling it.
    pub fn sample_grams(&self, sample: &str) -> HashSet<String> {
        ngrams(sample, self.gram_size)
    }
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase and collapse whitespace runs into single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized text, bounded to the first and last 5000 characters when long.
///
/// Cache entries keep this sample rather than the full input and compare it
/// with [`SimilarityMatcher::sample_grams`].
pub fn comparison_sample(text: &str) -> String {
    let normalized = normalize(text);
    if normalized.chars().count() <= MAX_COMPARE_CHARS {
        return normalized;
    }
    let mut sample = String::with_capacity(SAMPLE_EDGE_CHARS * 2);
    sample.push_str(prefix_chars(&normalized, SAMPLE_EDGE_CHARS));
    sample.push_str(suffix_chars(&normalized, SAMPLE_EDGE_CHARS));
    sample
}

/// All contiguous `n`-character substrings. Text shorter than `n` (but not
/// empty) yields itself as a single gram.
pub fn ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = n.max(1);
    if chars.is_empty() {
        return HashSet::new();
    }
    if chars.len() < n {
        return std::iter::once(text.to_string()).collect();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = small.iter().filter(|g| large.contains(*g)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
