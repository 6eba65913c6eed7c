//! Artifact repository clients.
//!
//! A repository is addressed by repository-relative paths in Maven layout
//! (see `Coordinates::repository_path`). Local directories and HTTP(S)
//! repositories are supported; anything that can fetch and store bytes by
//! path can implement [`RepositoryClient`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::UpstreamError;

/// Environment variable holding the publishing user name.
pub const USERNAME_ENV: &str = "WEFT_PUBLISH_USERNAME";
/// Environment variable holding the publishing password or token.
pub const PASSWORD_ENV: &str = "WEFT_PUBLISH_PASSWORD";

/// Extension of checksum files published next to each artifact.
pub const CHECKSUM_EXT: &str = "sha256";

/// Fetches and stores files in an artifact repository.
pub trait RepositoryClient: Send + Sync {
    /// Human-readable location, for messages.
    fn describe(&self) -> String;

    /// Downloads the file at `path`.
    fn fetch(&self, path: &str) -> Result<Vec<u8>, UpstreamError>;

    /// Uploads `data` to `path`, replacing any existing file.
    fn publish(&self, path: &str, data: &[u8]) -> Result<(), UpstreamError>;
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Publishes `data` and a `<path>.sha256` file containing its digest.
pub fn publish_with_checksum(
    client: &dyn RepositoryClient,
    path: &str,
    data: &[u8],
) -> Result<String, UpstreamError> {
    let digest = sha256_hex(data);
    client.publish(path, data)?;
    client.publish(&format!("{path}.{CHECKSUM_EXT}"), digest.as_bytes())?;
    info!(repository = %client.describe(), path, "published");
    Ok(digest)
}

/// Opens the repository at `location`: an `http(s)://` URL, a `file://` URL,
/// or a path relative to `root`. HTTP requests are bounded by `timeout`.
pub fn open_repository(
    location: &str,
    root: &Path,
    timeout: Duration,
) -> Result<Box<dyn RepositoryClient>, UpstreamError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(Box::new(HttpRepository::new(
            location,
            Credentials::from_env(),
            timeout,
        )?));
    }
    let path = location.strip_prefix("file://").unwrap_or(location);
    Ok(Box::new(LocalRepository::new(&root.join(path))))
}

/// A repository stored in a local directory.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    /// Creates a client for the directory `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, UpstreamError> {
        if path.split('/').any(|c| c == "..") || path.starts_with('/') {
            return Err(UpstreamError::Fetch {
                location: path.to_string(),
                reason: "path escapes the repository".to_string(),
            });
        }
        Ok(self.root.join(path))
    }
}

impl RepositoryClient for LocalRepository {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn fetch(&self, path: &str) -> Result<Vec<u8>, UpstreamError> {
        let file = self.resolve(path)?;
        match std::fs::read(&file) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UpstreamError::NotFound {
                repository: self.describe(),
                path: path.to_string(),
            }),
            Err(e) => Err(UpstreamError::io(file, e)),
        }
    }

    fn publish(&self, path: &str, data: &[u8]) -> Result<(), UpstreamError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| UpstreamError::io(parent, e))?;
        }
        weft_cache::artifact::write_atomic(&file, data)?;
        Ok(())
    }
}

/// Basic-auth credentials for publishing.
#[derive(Clone)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password or token.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Reads credentials from the environment, if both variables are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).ok()?;
        let password = std::env::var(PASSWORD_ENV).ok()?;
        Some(Self { username, password })
    }
}

/// A repository reached over HTTP(S).
pub struct HttpRepository {
    base_url: String,
    http: reqwest::blocking::Client,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl HttpRepository {
    /// Creates a client for `base_url` whose requests give up after `timeout`.
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("weft/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Fetch {
                location: base_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            credentials,
            timeout,
        })
    }

    /// The per-request limit.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl RepositoryClient for HttpRepository {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn fetch(&self, path: &str) -> Result<Vec<u8>, UpstreamError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let fail = |reason: String| UpstreamError::Fetch {
            location: url.clone(),
            reason,
        };
        let resp = self.http.get(&url).send().map_err(|e| fail(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(UpstreamError::NotFound {
                repository: self.describe(),
                path: path.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(fail(format!("HTTP {}", resp.status())));
        }
        let bytes = resp.bytes().map_err(|e| fail(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn publish(&self, path: &str, data: &[u8]) -> Result<(), UpstreamError> {
        let url = self.url(path);
        debug!(%url, bytes = data.len(), "PUT");
        let mut request = self.http.put(&url).body(data.to_vec());
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let resp = request.send().map_err(|e| UpstreamError::Publish {
            location: url.clone(),
            reason: e.to_string(),
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(UpstreamError::Publish {
                location: url,
                reason: format!("HTTP {status}: {}", body.trim()),
            });
        }
        Ok(())
    }
}
