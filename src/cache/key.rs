//! Cache key derivation.
//!
//! Keys are SHA-256 digests over `category + prompt head + content sample`.
//! Only a bounded sample of the content is hashed: the first `sample_size`
//! characters, plus the last `sample_size / 4` characters when the content is
//! longer than that. Hashing cost therefore stays constant for multi-megabyte
//! documents.

use sha2::{Digest, Sha256};

/// Default number of leading content characters that feed the digest.
pub const DEFAULT_SAMPLE_SIZE: usize = 20_000;

/// Number of leading prompt characters that feed the digest.
pub const PROMPT_PREFIX_CHARS: usize = 500;

/// Length of the digest prefix used for ETags.
const ETAG_HEX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// Strong ETag derived from this key: the digest prefix, quoted.
    pub fn etag(&self) -> String {
        format!("\"{}\"", prefix_chars(&self.hash, ETAG_HEX_LEN))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Deterministic, size-bounded key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDeriver {
    sample_size: usize,
}

impl KeyDeriver {
    pub fn new() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn derive(&self, content: &str, category: &str, prompt: &str) -> CacheKey {
        let (head, tail) = sample_content(content, self.sample_size);
        let mut hasher = Sha256::new();
        hasher.update(category.as_bytes());
        hasher.update(prefix_chars(prompt, PROMPT_PREFIX_CHARS).as_bytes());
        hasher.update(head.as_bytes());
        if let Some(tail) = tail {
            hasher.update(tail.as_bytes());
        }
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash)
    }

    pub fn etag(&self, content: &str, category: &str, prompt: &str) -> String {
        self.derive(content, category, prompt).etag()
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new()
    }
}

/// First `max_chars` characters of `s` without scanning past them.
pub(crate) fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `max_chars` characters of `s`, scanning from the end only.
pub(crate) fn suffix_chars(s: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match s.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Head sample plus an optional tail sample when the content is longer than
/// `sample_size` characters.
fn sample_content(content: &str, sample_size: usize) -> (&str, Option<&str>) {
    let head = prefix_chars(content, sample_size);
    if head.len() == content.len() {
        return (head, None);
    }
    (head, Some(suffix_chars(content, sample_size / 4)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let d = KeyDeriver::new();
        let a = d.derive("quarterly report", "chart", "make a gantt chart");
        let b = d.derive("quarterly report", "chart", "make a gantt chart");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_empty_content_still_hashes() {
        let key = KeyDeriver::new().derive("", "summary", "");
        assert_eq!(key.as_str().len(), 64);
    }

    #[test]
    fn test_category_and_prompt_change_key() {
        let d = KeyDeriver::new();
        let base = d.derive("doc", "chart", "prompt");
        assert_ne!(base, d.derive("doc", "summary", "prompt"));
        assert_ne!(base, d.derive("doc", "chart", "other prompt"));
    }

    #[test]
    fn test_prompt_beyond_prefix_is_ignored() {
        let d = KeyDeriver::new();
        let head = "p".repeat(PROMPT_PREFIX_CHARS);
        let a = d.derive("doc", "chart", &format!("{}tail one", head));
        let b = d.derive("doc", "chart", &format!("{}tail two", head));
        assert_eq!(a, b);
    }

    #[test]
    fn test_middle_of_long_content_is_not_sampled() {
        let d = KeyDeriver::new().with_sample_size(40);
        let a = format!("{}{}{}", "h".repeat(40), "middle-a".repeat(10), "t".repeat(10));
        let b = format!("{}{}{}", "h".repeat(40), "middle-b".repeat(10), "t".repeat(10));
        assert_eq!(d.derive(&a, "chart", ""), d.derive(&b, "chart", ""));
    }

    #[test]
    fn test_tail_of_long_content_is_sampled() {
        let d = KeyDeriver::new().with_sample_size(40);
        let a = format!("{}{}", "h".repeat(100), "conclusion A");
        let b = format!("{}{}", "h".repeat(100), "conclusion B");
        assert_ne!(d.derive(&a, "chart", ""), d.derive(&b, "chart", ""));
    }

    #[test]
    fn test_char_helpers_respect_utf8_boundaries() {
        let s = "héllo wörld";
        assert_eq!(prefix_chars(s, 2), "hé");
        assert_eq!(suffix_chars(s, 3), "rld");
        assert_eq!(suffix_chars(s, 5), "wörld");
        assert_eq!(prefix_chars(s, 100), s);
        assert_eq!(suffix_chars(s, 0), "");
    }

    #[test]
    fn test_etag_is_quoted_prefix() {
        let key = KeyDeriver::new().derive("doc", "chart", "prompt");
        let etag = key.etag();
        assert_eq!(etag.len(), ETAG_HEX_LEN + 2);
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(&etag[1..ETAG_HEX_LEN + 1], &key.as_str()[..ETAG_HEX_LEN]);
    }

    #[test]
    fn test_etag_of_non_hex_key_does_not_split_chars() {
        let key = CacheKey::new(format!("a{}", "é".repeat(16)));
        assert_eq!(key.etag(), format!("\"a{}\"", "é".repeat(15)));
        assert_eq!(CacheKey::from("short").etag(), "\"short\"");
    }
}
