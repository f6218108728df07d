//! Content identifier extraction and normalization.
//!
//! Turns whatever a client pastes into a request (a magnet URI, a bare info
//! hash, or something else entirely) into a canonical key that the rest of
//! the system can deduplicate on. Extraction is pure string work and never
//! touches the network.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// SHA-1 hash identifying a unique piece of content.
///
/// 20-byte hash of the content's info dictionary, rendered as lowercase
/// hex everywhere it is displayed or compared textually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from a 20-byte hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses a 40-character hex string. Accepts mixed case.
    pub fn from_hex(hash: &str) -> Option<Self> {
        if hash.len() != 40 {
            return None;
        }
        let bytes = hex::decode(hash).ok()?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Some(Self(out))
    }

    /// Returns reference to the underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

static BTIH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)btih:([0-9a-f]{40})").expect("valid btih pattern"));

static BARE_HEX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[0-9a-f]{40}").expect("valid hex pattern"));

/// Canonical key for one piece of content.
///
/// Two requests that normalize to the same canonical identifier are served
/// by a single underlying resolution. When no hash can be extracted the
/// trimmed original input becomes a fallback key, compared by exact string
/// equality only. Two differently-encoded magnets for the same content can
/// therefore fail to coalesce; callers should treat that as best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentId {
    /// Lowercase 40-hex info hash extracted from the input.
    Canonical(InfoHash),
    /// Trimmed original input, kept verbatim when extraction failed.
    Raw(String),
}

impl ContentId {
    /// Extracts a canonical identifier from a magnet URI, a bare hash, or
    /// any string containing a recognizable hash fragment.
    ///
    /// Attempts, in order: a structured magnet parse, a `btih:<40-hex>`
    /// fragment match, and a bare 40-hex fragment match. Inputs are
    /// percent-decoded first since magnets are frequently pasted encoded.
    /// Deterministic and idempotent: normalizing an identifier's display
    /// form yields the same identifier.
    pub fn normalize(input: &str) -> ContentId {
        let trimmed = input.trim();
        let decoded = match urlencoding::decode(trimmed) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => trimmed.to_string(),
        };

        if let Some(hash) = Self::hash_from_magnet(&decoded) {
            return ContentId::Canonical(hash);
        }
        if let Some(captures) = BTIH_PATTERN.captures(&decoded)
            && let Some(hash) = captures.get(1).and_then(|m| InfoHash::from_hex(m.as_str()))
        {
            return ContentId::Canonical(hash);
        }
        if let Some(matched) = BARE_HEX_PATTERN.find(&decoded)
            && let Some(hash) = InfoHash::from_hex(matched.as_str())
        {
            return ContentId::Canonical(hash);
        }

        ContentId::Raw(trimmed.to_string())
    }

    /// Structured parse branch: only attempted for inputs that look like a
    /// magnet URI, scanning the exact-topic parameter for a btih hash.
    fn hash_from_magnet(input: &str) -> Option<InfoHash> {
        if !input.starts_with("magnet:?") {
            return None;
        }
        let magnet = magnet_url::Magnet::new(input).ok()?;
        let url = magnet.to_string();
        for param in url.split(['?', '&']) {
            if let Some(value) = param.strip_prefix("xt=urn:btih:") {
                return InfoHash::from_hex(value);
            }
        }
        None
    }

    /// The canonical hash, when one was extracted.
    pub fn info_hash(&self) -> Option<&InfoHash> {
        match self {
            ContentId::Canonical(hash) => Some(hash),
            ContentId::Raw(_) => None,
        }
    }

    /// Whether this identifier carries a canonical hash.
    pub fn is_canonical(&self) -> bool {
        matches!(self, ContentId::Canonical(_))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentId::Canonical(hash) => write!(f, "{hash}"),
            ContentId::Raw(raw) => write!(f, "{raw}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn magnet_and_bare_hash_normalize_to_same_id() {
        let from_magnet = ContentId::normalize(&format!("magnet:?xt=urn:btih:{HASH}"));
        let from_hash = ContentId::normalize(HASH);
        assert_eq!(from_magnet, from_hash);
        assert!(from_magnet.is_canonical());
    }

    #[test]
    fn normalization_ignores_hash_case() {
        let upper = ContentId::normalize(&HASH.to_uppercase());
        let lower = ContentId::normalize(HASH);
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), HASH);
    }

    #[test]
    fn tracker_parameters_do_not_change_the_id() {
        let plain = ContentId::normalize(&format!("magnet:?xt=urn:btih:{HASH}"));
        let with_trackers = ContentId::normalize(&format!(
            "magnet:?xt=urn:btih:{HASH}&dn=Example&tr=http%3A%2F%2Ftracker.example.com%2Fannounce"
        ));
        assert_eq!(plain, with_trackers);
    }

    #[test]
    fn percent_encoded_magnet_is_decoded_before_extraction() {
        let encoded = format!("magnet%3A%3Fxt%3Durn%3Abtih%3A{HASH}");
        assert_eq!(
            ContentId::normalize(&encoded),
            ContentId::normalize(HASH),
        );
    }

    #[test]
    fn btih_fragment_inside_arbitrary_text_is_found() {
        let id = ContentId::normalize(&format!("please stream urn:btih:{HASH} for me"));
        assert_eq!(id.to_string(), HASH);
    }

    #[test]
    fn bare_hex_fragment_anywhere_is_found() {
        let id = ContentId::normalize(&format!("blob-{HASH}-v2"));
        assert_eq!(id.to_string(), HASH);
    }

    #[test]
    fn unrecognizable_input_falls_back_to_trimmed_raw_key() {
        let id = ContentId::normalize("  not a magnet at all  ");
        assert_eq!(id, ContentId::Raw("not a magnet at all".to_string()));
        assert!(!id.is_canonical());
    }

    #[test]
    fn short_hex_is_not_mistaken_for_a_hash() {
        let id = ContentId::normalize("deadbeef");
        assert!(!id.is_canonical());
    }

    #[test]
    fn from_hex_rejects_wrong_length_and_non_hex() {
        assert!(InfoHash::from_hex("0123").is_none());
        assert!(InfoHash::from_hex(&"g".repeat(40)).is_none());
        assert!(InfoHash::from_hex(HASH).is_some());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(input in ".*") {
            let once = ContentId::normalize(&input);
            let twice = ContentId::normalize(&once.to_string());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn any_embedded_hash_is_recovered(hash in "[0-9a-f]{40}") {
            let id = ContentId::normalize(&format!("magnet:?xt=urn:btih:{hash}"));
            prop_assert_eq!(id.to_string(), hash);
        }
    }
}
