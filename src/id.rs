//! ID generation for Trellis tasks.
//!
//! IDs are `"{prefix}-{suffix}"` where the suffix is fixed-width base36 drawn
//! from fresh random entropy. Nothing is shared between processes; the only
//! collision guard is the retry against the local index in [`IdGenerator::mint`].

use crate::types::ValidationError;
use eyre::{Result, bail};
use rand::Rng;

/// Suffix alphabet: digits then lowercase letters, nothing shell-special.
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Default suffix width.
pub const DEFAULT_WIDTH: usize = 4;

/// Widest suffix; 36^12 still fits in a u64.
pub const MAX_WIDTH: usize = 12;

/// Consecutive collisions tolerated before the suffix grows by one.
const ATTEMPTS_PER_WIDTH: usize = 32;

/// Longest accepted namespace prefix.
const MAX_PREFIX_LEN: usize = 16;

/// Mints task IDs for one namespace.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
    width: usize,
}

impl IdGenerator {
    /// Create a generator, validating the prefix and clamping the width.
    pub fn new(prefix: &str, width: usize) -> Result<Self, ValidationError> {
        validate_prefix(prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
            width: width.clamp(1, MAX_WIDTH),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// One random candidate at the given width.
    pub fn candidate(&self, width: usize) -> String {
        let entropy: u64 = rand::rng().random();
        format!("{}-{}", self.prefix, encode_base36(entropy, width))
    }

    /// Mint an ID that `is_taken` reports as free.
    ///
    /// Retries with fresh entropy on every collision. After
    /// `ATTEMPTS_PER_WIDTH` collisions in a row the suffix grows by one
    /// character, so a crowded namespace slows minting down instead of
    /// failing it.
    pub fn mint<F>(&self, mut is_taken: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        for width in self.width..=MAX_WIDTH {
            for _ in 0..ATTEMPTS_PER_WIDTH {
                let id = self.candidate(width);
                if !is_taken(&id)? {
                    return Ok(id);
                }
                log::debug!("id collision on {}, retrying", id);
            }
            log::info!("id space for prefix '{}' crowded at width {}, widening", self.prefix, width);
        }
        bail!("could not mint a free id for prefix '{}'", self.prefix)
    }
}

/// Draw a single ID for `prefix` at the default width.
pub fn mint(prefix: &str) -> Result<String, ValidationError> {
    let generator = IdGenerator::new(prefix, DEFAULT_WIDTH)?;
    Ok(generator.candidate(DEFAULT_WIDTH))
}

/// Check a namespace prefix: lowercase alphanumerics with inner hyphens.
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    let valid = !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && !prefix.starts_with('-')
        && !prefix.ends_with('-')
        && !prefix.contains("--")
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidPrefix(prefix.to_string()))
    }
}

/// Encode `value` modulo 36^width as exactly `width` base36 digits.
fn encode_base36(value: u64, width: usize) -> String {
    let modulus = 36u64.pow(width as u32);
    let mut rest = value % modulus;
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(rest % 36) as usize];
        rest /= 36;
    }
    // ALPHABET is ASCII
    String::from_utf8(digits).unwrap_or_default()
}
