//! Content hashing for cache keys and source tree identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 128-bit content hash computed using XXH3.
///
/// Two files (or two trees) with the same `ContentHash` are assumed to have
/// identical content. Stage cache keys, tree identities and patch boundary
/// checkpoints are all expressed as `ContentHash` values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Computes the identity of a source tree from `(relative path, file hash)` pairs.
    ///
    /// Entries must be supplied in path order; paths use `/` separators. Two
    /// trees with identical files hash identically regardless of where they
    /// live on disk.
    pub fn from_tree<'a>(entries: impl IntoIterator<Item = (&'a str, &'a ContentHash)>) -> Self {
        let mut hasher = ContentHasher::new("tree");
        for (path, hash) in entries {
            hasher.update(path.as_bytes()).update_hash(hash);
        }
        hasher.finish()
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the first 12 hex characters, used for directory names and log lines.
    pub fn short(&self) -> String {
        let full = self.to_string();
        full[..12].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Error returned when a string is not a 32-character hex content hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash '{0}'")]
pub struct ParseHashError(pub String);

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.is_ascii() {
            return Err(ParseHashError(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseHashError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

/// Incremental hasher for keys built from several inputs.
///
/// Each part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
/// hash differently.
pub struct ContentHasher {
    state: xxhash_rust::xxh3::Xxh3,
}

impl ContentHasher {
    /// Creates a hasher seeded with a domain tag (e.g. a stage name).
    pub fn new(domain: &str) -> Self {
        let mut hasher = Self {
            state: xxhash_rust::xxh3::Xxh3::new(),
        };
        hasher.update(domain.as_bytes());
        hasher
    }

    /// Feeds one length-prefixed part into the hash.
    pub fn update(&mut self, part: &[u8]) -> &mut Self {
        self.state.update(&(part.len() as u64).to_le_bytes());
        self.state.update(part);
        self
    }

    /// Feeds another content hash into this one.
    pub fn update_hash(&mut self, hash: &ContentHash) -> &mut Self {
        self.update(hash.as_bytes())
    }

    /// Finishes the hash.
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.state.digest128().to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = ContentHash::from_bytes(b"hello world");
        let b = ContentHash::from_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = ContentHash::from_bytes(b"hello");
        let b = ContentHash::from_bytes(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn display_format() {
        let h = ContentHash::from_bytes(b"test");
        let s = format!("{h}");
        assert_eq!(s.len(), 32, "Display should be 32 hex chars");
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn debug_abbreviated() {
        let h = ContentHash::from_bytes(b"test");
        let s = format!("{h:?}");
        assert!(s.starts_with("ContentHash("));
        assert!(s.ends_with(")"));
    }

    #[test]
    fn parse_display_output() {
        let h = ContentHash::from_bytes(b"parse me");
        let back: ContentHash = h.to_string().parse().unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("xyz".parse::<ContentHash>().is_err());
        assert!("zz".repeat(16).parse::<ContentHash>().is_err());
    }

    #[test]
    fn short_is_prefix() {
        let h = ContentHash::from_bytes(b"short");
        assert!(h.to_string().starts_with(&h.short()));
        assert_eq!(h.short().len(), 12);
    }

    #[test]
    fn hasher_parts_are_length_prefixed() {
        let a = ContentHasher::new("t").update(b"ab").update(b"c").finish();
        let b = ContentHasher::new("t").update(b"a").update(b"bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn hasher_domain_separates() {
        let a = ContentHasher::new("apply").update(b"x").finish();
        let b = ContentHasher::new("decompile").update(b"x").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn tree_hash_depends_on_paths_and_content() {
        let a = ContentHash::from_bytes(b"a");
        let b = ContentHash::from_bytes(b"b");
        let t1 = ContentHash::from_tree([("x.txt", &a), ("y.txt", &b)]);
        let t2 = ContentHash::from_tree([("x.txt", &a), ("y.txt", &b)]);
        let renamed = ContentHash::from_tree([("x.txt", &a), ("z.txt", &b)]);
        let edited = ContentHash::from_tree([("x.txt", &b), ("y.txt", &b)]);
        assert_eq!(t1, t2);
        assert_ne!(t1, renamed);
        assert_ne!(t1, edited);
    }

    #[test]
    fn empty_tree_hash_is_stable() {
        let empty: [(&str, &ContentHash); 0] = [];
        assert_eq!(ContentHash::from_tree(empty), ContentHash::from_tree(empty));
    }

    #[test]
    fn serde_roundtrip() {
        let h = ContentHash::from_bytes(b"serde test");
        let json = serde_json::to_string(&h).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
