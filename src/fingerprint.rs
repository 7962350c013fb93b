//! Stable URL fingerprints used as the ledger's dedup key.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept (128 bits).
const FINGERPRINT_BYTES: usize = 16;

/// 128-bit content fingerprint of a source URL, rendered as lowercase hex.
///
/// Derived from the first 16 bytes of the SHA-256 digest of the URL's UTF-8
/// bytes, so the same URL always maps to the same fingerprint across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of `url`.
    #[must_use]
    pub fn of_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        let mut hex = String::with_capacity(FINGERPRINT_BYTES * 2);
        for byte in &digest[..FINGERPRINT_BYTES] {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Wraps an already-computed fingerprint (e.g. read back from the store).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::of_url("https://imgsrc.ru/images/a.webp");
        let b = Fingerprint::of_url("https://imgsrc.ru/images/a.webp");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_is_128_bit_hex() {
        let fp = Fingerprint::of_url("https://imgsrc.ru/images/a.webp");
        assert_eq!(fp.as_str().len(), 32);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_known_value() {
        // SHA-256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(
            Fingerprint::of_url("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223"
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_urls() {
        let a = Fingerprint::of_url("https://imgsrc.ru/images/a.webp");
        let b = Fingerprint::of_url("https://imgsrc.ru/images/b.webp");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_round_trips_through_hex() {
        let fp = Fingerprint::of_url("https://imgsrc.ru/images/a.webp");
        assert_eq!(Fingerprint::from_hex(fp.as_str()), fp);
        assert_eq!(fp.to_string(), fp.as_str());
    }
}
