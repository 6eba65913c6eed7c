//! Symbol mapping tables.
//!
//! A mapping file starts with a header naming the release it belongs to,
//! followed by one `obfuscated<TAB>readable` pair per line:
//!
//! ```text
//! weft-mapping v1 1.20.4
//! # classes
//! a	net/example/Server
//! b	net/example/World
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. The table itself is
//! only read by the remapper; weft parses it to check that it belongs to the
//! same release as the binary artifact.

use std::collections::BTreeMap;

use crate::error::UpstreamError;

const HEADER_MAGIC: &str = "weft-mapping";
const HEADER_FORMAT: &str = "v1";

/// A parsed mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Release the table was generated for.
    pub version: String,
    /// Obfuscated name to readable name.
    pub entries: BTreeMap<String, String>,
}

impl Mapping {
    /// Parses a mapping file.
    pub fn parse(text: &str) -> Result<Self, UpstreamError> {
        let mut lines = text.lines().enumerate();
        let version = loop {
            let Some((_, line)) = lines.next() else {
                return Err(mismatch("mapping file is empty"));
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(HEADER_MAGIC), Some(HEADER_FORMAT), Some(version), None) => {
                    break version.to_string()
                }
                _ => return Err(mismatch(&format!("unrecognized mapping header '{line}'"))),
            }
        };

        let mut entries = BTreeMap::new();
        for (index, line) in lines {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((from, to)) = line.split_once('\t') else {
                return Err(mismatch(&format!(
                    "mapping line {} is not 'obfuscated<TAB>readable'",
                    index + 1
                )));
            };
            if from.is_empty() || to.is_empty() {
                return Err(mismatch(&format!("mapping line {} has an empty name", index + 1)));
            }
            if entries.insert(from.to_string(), to.to_string()).is_some() {
                return Err(mismatch(&format!(
                    "mapping line {} maps '{from}' a second time",
                    index + 1
                )));
            }
        }
        Ok(Self { version, entries })
    }

    /// Parses mapping bytes, rejecting non-UTF-8 content.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, UpstreamError> {
        let text = std::str::from_utf8(bytes).map_err(|_| mismatch("mapping file is not UTF-8"))?;
        Self::parse(text)
    }

    /// Readable name for an obfuscated symbol.
    pub fn lookup(&self, obfuscated: &str) -> Option<&str> {
        self.entries.get(obfuscated).map(String::as_str)
    }

    /// Number of mapped symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails unless the table was generated for `release`.
    pub fn ensure_release(&self, release: &str) -> Result<(), UpstreamError> {
        if self.version != release {
            return Err(UpstreamError::ArtifactMismatch(format!(
                "mapping is for release {} but the binary is {release}",
                self.version
            )));
        }
        Ok(())
    }
}

fn mismatch(reason: &str) -> UpstreamError {
    UpstreamError::ArtifactMismatch(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# generated\nweft-mapping v1 1.20.4\n\n# classes\na\tnet/example/Server\nb\tnet/example/World\n";

    #[test]
    fn parses_header_and_entries() {
        let m = Mapping::parse(SAMPLE).unwrap();
        assert_eq!(m.version, "1.20.4");
        assert_eq!(m.len(), 2);
        assert_eq!(m.lookup("a"), Some("net/example/Server"));
        assert_eq!(m.lookup("zz"), None);
    }

    #[test]
    fn release_check() {
        let m = Mapping::parse(SAMPLE).unwrap();
        assert!(m.ensure_release("1.20.4").is_ok());
        let err = m.ensure_release("1.20.5").unwrap_err();
        assert!(matches!(err, UpstreamError::ArtifactMismatch(_)));
        assert!(err.to_string().contains("1.20.5"));
    }

    #[test]
    fn rejects_bad_header() {
        assert!(Mapping::parse("proguard 1.0\n").is_err());
        assert!(Mapping::parse("").is_err());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(Mapping::parse("weft-mapping v1 1\na b\n").is_err());
        assert!(Mapping::parse("weft-mapping v1 1\na\tb\na\tc\n").is_err());
        assert!(Mapping::parse("weft-mapping v1 1\n\tb\n").is_err());
    }

    #[test]
    fn rejects_binary() {
        assert!(Mapping::parse_bytes(&[0xff, 0xfe]).is_err());
    }
}
