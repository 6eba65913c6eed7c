//! Publishing finished artifacts to a repository.

use tracing::info;
use weft_upstream::{publish_with_checksum, RepositoryClient};

use crate::error::DistError;
use crate::package::{Artifact, ARTIFACT_EXT};

/// A successfully published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// `group:artifact:version`.
    pub coordinates: String,
    /// Repository-relative path of the archive.
    pub path: String,
    /// SHA-256 published next to it.
    pub sha256: String,
}

/// Uploads each artifact followed by its `.sha256` file.
///
/// Stops at the first failure; artifacts uploaded before it stay published.
pub fn publish_artifacts(
    client: &dyn RepositoryClient,
    artifacts: &[Artifact],
) -> Result<Vec<Published>, DistError> {
    let mut published = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = artifact.coordinates.repository_path(ARTIFACT_EXT);
        let sha256 = publish_with_checksum(client, &path, &artifact.data)?;
        info!(artifact = %artifact.coordinates, repository = %client.describe(), "artifact published");
        published.push(Published {
            coordinates: artifact.coordinates.to_string(),
            path,
            sha256,
        });
    }
    Ok(published)
}
