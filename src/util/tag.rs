//! Faction tag generation.
//!
//! Tags are 2-4 ASCII alphanumerics, unique across the store. When a source
//! faction has no usable tag we derive one from its name, then fall back to
//! hash-based candidates (name prefix + base36 hash of name and nonce).

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

pub const MIN_TAG_LEN: usize = 2;
pub const MAX_TAG_LEN: usize = 4;

/// Hash-suffixed candidates tried before giving up on derived tags.
const MAX_NONCE: u32 = 10_000;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{2,4}$").expect("valid tag regex"));

/// True if `tag` has an acceptable shape (ignores uniqueness).
#[must_use]
pub fn is_valid_tag(tag: &str) -> bool {
    TAG_PATTERN.is_match(tag)
}

/// Uppercase alphanumeric characters of `seed`.
fn normalized(seed: &str) -> String {
    seed.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Candidates derived directly from the name, best first.
fn derived_candidates(seed: &str) -> Vec<String> {
    let letters = normalized(seed);
    let mut out: Vec<String> = Vec::new();

    let initials: String = seed
        .split_whitespace()
        .filter_map(|word| word.chars().find(char::is_ascii_alphanumeric))
        .map(|c| c.to_ascii_uppercase())
        .take(MAX_TAG_LEN)
        .collect();

    for candidate in [
        letters.chars().take(3).collect::<String>(),
        letters.chars().take(4).collect::<String>(),
        initials,
        letters.chars().take(2).collect::<String>(),
    ] {
        if is_valid_tag(&candidate) && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Base36 hash of `input`, uppercase, truncated to `length`.
fn hash_suffix(input: &str, length: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();

    let mut num = 0u64;
    for &byte in digest.iter().take(8) {
        num = (num << 8) | u64::from(byte);
    }

    let mut out = String::with_capacity(length);
    for _ in 0..length {
        out.push(char::from(ALPHABET[(num % 36) as usize]));
        num /= 36;
    }
    out
}

/// Generate a tag for `seed` that `is_taken` does not reject.
///
/// Derived candidates come first; after that, two name characters plus a
/// two-character hash, then a four-character hash. The search is
/// deterministic for a given seed and `is_taken`.
pub fn generate_unique_tag(seed: &str, is_taken: impl Fn(&str) -> bool) -> String {
    for candidate in derived_candidates(seed) {
        if !is_taken(&candidate) {
            return candidate;
        }
    }

    let letters = normalized(seed);
    let head: String = letters.chars().take(2).collect();

    for nonce in 0..MAX_NONCE {
        let material = format!("{seed}|{nonce}");
        let candidate = if head.len() == 2 {
            format!("{head}{}", hash_suffix(&material, 2))
        } else {
            hash_suffix(&material, MAX_TAG_LEN)
        };
        if !is_taken(&candidate) {
            return candidate;
        }
    }

    // 36^4 candidates exist; reaching this means the predicate rejects nearly everything.
    let mut nonce = MAX_NONCE;
    loop {
        let candidate = hash_suffix(&format!("{seed}|{nonce}"), MAX_TAG_LEN);
        if !is_taken(&candidate) {
            return candidate;
        }
        nonce = nonce.wrapping_add(1);
    }
}
