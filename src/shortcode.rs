//! Short code generation
//!
//! Codes are drawn from the operating system CSPRNG and encoded with the
//! URL-safe base64 alphabet. The generator does not check uniqueness; the
//! store rejects duplicates on insert and the caller decides whether to retry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;

/// Default number of characters in a generated slug
pub const DEFAULT_SLUG_LENGTH: usize = 6;

#[derive(Debug, Error)]
#[error("random source unavailable: {0}")]
pub struct GenerationError(String);

#[derive(Debug, Clone, Copy)]
pub struct SlugGenerator {
    length: usize,
}

impl SlugGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Produce a new slug of exactly `length` URL-safe characters
    pub fn generate(&self) -> Result<String, GenerationError> {
        // One byte per output character over-provisions: n bytes encode to
        // ceil(4n / 3) characters.
        let mut bytes = vec![0u8; self.length];
        getrandom::fill(&mut bytes).map_err(|e| GenerationError(e.to_string()))?;

        let mut slug = URL_SAFE_NO_PAD.encode(&bytes);
        slug.truncate(self.length);
        Ok(slug)
    }
}

impl Default for SlugGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SLUG_LENGTH)
    }
}

/// Whether `code` only uses the URL-safe base64 alphabet
pub fn is_url_safe(code: &str) -> bool {
    code.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
