//! Artifact resolution: fetching the pinned binary and its mapping.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use weft_cache::{BuildCache, CasOutcome, StageRecord, TreeHasher};
use weft_common::{ContentHash, ContentHasher, VersionRef};
use weft_config::{ArtifactConfig, Coordinates};

use crate::error::UpstreamError;
use crate::mapping::Mapping;
use crate::repository::{sha256_hex, RepositoryClient, CHECKSUM_EXT};

/// Cache subdirectory holding materialized artifacts for tools to read.
pub const ARTIFACT_DIR: &str = "artifacts";

/// The binary and mapping of one release, materialized on disk.
#[derive(Debug, Clone)]
pub struct ResolvedArtifacts {
    /// The release both files belong to.
    pub release: VersionRef,
    /// Path of the binary distributable.
    pub binary: PathBuf,
    /// Content hash of the binary.
    pub binary_hash: ContentHash,
    /// Path of the mapping file.
    pub mapping: PathBuf,
    /// Content hash of the mapping file.
    pub mapping_hash: ContentHash,
    /// Number of mapped symbols.
    pub mapped_symbols: usize,
}

/// Fetches artifacts through a repository client, caching them by content.
pub struct ArtifactResolver<'a> {
    client: &'a dyn RepositoryClient,
    cache: &'a BuildCache,
}

impl<'a> ArtifactResolver<'a> {
    /// Creates a resolver reading from `client` and caching in `cache`.
    pub fn new(client: &'a dyn RepositoryClient, cache: &'a BuildCache) -> Self {
        Self { client, cache }
    }

    /// Fetches (or reuses) the binary and mapping for `release` and checks
    /// that they belong together.
    pub fn resolve(
        &self,
        artifact: &ArtifactConfig,
        release: &VersionRef,
    ) -> Result<ResolvedArtifacts, UpstreamError> {
        let binary_coords = Coordinates::parse(&artifact.binary)?.with_version(release.as_str());
        let mapping_coords = Coordinates::parse(&artifact.mapping)?.with_version(release.as_str());

        let binary = self.fetch_cached(&binary_coords, "jar")?;
        let mapping_bytes = self.fetch_cached(&mapping_coords, "txt")?;

        let mapping = Mapping::parse_bytes(&mapping_bytes)?;
        mapping.ensure_release(release.as_str())?;

        let dir = self
            .cache
            .cache_dir()
            .join(ARTIFACT_DIR)
            .join(release.as_str());
        let binary_path = materialize(&dir, &binary_coords.repository_path("jar"), &binary)?;
        let mapping_path =
            materialize(&dir, &mapping_coords.repository_path("txt"), &mapping_bytes)?;

        info!(
            release = %release,
            symbols = mapping.len(),
            "resolved upstream artifacts"
        );
        Ok(ResolvedArtifacts {
            release: release.clone(),
            binary: binary_path,
            binary_hash: ContentHash::from_bytes(&binary),
            mapping: mapping_path,
            mapping_hash: ContentHash::from_bytes(&mapping_bytes),
            mapped_symbols: mapping.len(),
        })
    }

    fn fetch_cached(&self, coords: &Coordinates, ext: &str) -> Result<Vec<u8>, UpstreamError> {
        let stage_key = fetch_stage_key(coords);
        let input_hash = ContentHasher::new("fetch")
            .update(self.client.describe().as_bytes())
            .update(coords.to_string().as_bytes())
            .update(ext.as_bytes())
            .finish();

        if let Some(record) = self.cache.stage(&stage_key)? {
            if record.input_hash == input_hash {
                if let Some(bytes) = self.cache.load_blob(&record.output_hash) {
                    debug!(artifact = %coords, "artifact cache hit");
                    return Ok(bytes);
                }
            }
        }

        let path = coords.repository_path(ext);
        info!(artifact = %coords, repository = %self.client.describe(), "fetching");
        let bytes = self.client.fetch(&path)?;
        self.verify_checksum(&path, &bytes)?;

        let blob = self.cache.store_blob(&bytes)?;
        let record = StageRecord {
            input_hash,
            output_hash: blob,
            output_path: None,
        };
        if let CasOutcome::Lost(_) = self.cache.compare_and_swap(&stage_key, record.clone())? {
            // The recorded blob had gone missing.
            self.cache.invalidate_stage(&stage_key)?;
            self.cache.compare_and_swap(&stage_key, record)?;
        }
        Ok(bytes)
    }

    /// Checks `data` against a published `.sha256` file, when one exists.
    fn verify_checksum(&self, path: &str, data: &[u8]) -> Result<(), UpstreamError> {
        let expected = match self.client.fetch(&format!("{path}.{CHECKSUM_EXT}")) {
            Ok(bytes) => bytes,
            Err(UpstreamError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let expected = String::from_utf8_lossy(&expected);
        let expected = expected.split_whitespace().next().unwrap_or_default();
        let actual = sha256_hex(data);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(UpstreamError::ArtifactMismatch(format!(
                "{path}: checksum {actual} does not match published {expected}"
            )));
        }
        Ok(())
    }
}

fn fetch_stage_key(coords: &Coordinates) -> String {
    format!("fetch:{coords}")
}

/// Bytes of a previously fetched artifact, if the cache still holds them.
pub fn cached_artifact(cache: &BuildCache, coords: &Coordinates) -> Option<Vec<u8>> {
    let record = cache.stage(&fetch_stage_key(coords)).ok()??;
    cache.load_blob(&record.output_hash)
}

/// Writes `data` below `dir` unless an identical file is already there.
fn materialize(dir: &Path, repository_path: &str, data: &[u8]) -> Result<PathBuf, UpstreamError> {
    let name = repository_path
        .rsplit('/')
        .next()
        .unwrap_or(repository_path);
    let path = dir.join(name);
    let fresh = TreeHasher::hash_file(&path)
        .map(|h| h == ContentHash::from_bytes(data))
        .unwrap_or(false);
    if !fresh {
        std::fs::create_dir_all(dir).map_err(|e| UpstreamError::io(dir, e))?;
        weft_cache::artifact::write_atomic(&path, data)?;
    }
    Ok(path)
}
