//! Installer artifact download.
//!
//! One GET per missing artifact; no retry, no checksum. The body is
//! streamed into `<dest>.part` and renamed over `dest` only after it has
//! been fully written, so an interrupted download never leaves a file at
//! the cache path.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;

/// Network boundary for installer downloads.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Blocking `ureq` client driven from Tokio's blocking pool.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || download(&agent, &url, &dest))
            .await
            .map_err(|e| FetchError::Task(e.to_string()))?
    }
}

/// Sibling path used while the body is being written.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn download(agent: &ureq::Agent, url: &str, dest: &Path) -> Result<u64, FetchError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let partial = partial_path(dest);
    match write_body(agent, url, &partial) {
        Ok(bytes) => {
            std::fs::rename(&partial, dest)?;
            debug!(url, dest = %dest.display(), bytes, "download complete");
            Ok(bytes)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn write_body(agent: &ureq::Agent, url: &str, partial: &Path) -> Result<u64, FetchError> {
    // Non-2xx statuses come back as errors with the default agent config.
    let mut response = agent
        .get(url)
        .call()
        .map_err(|e| FetchError::Http(e.to_string()))?;

    let mut file = File::create(partial)?;
    let bytes = io::copy(&mut response.body_mut().as_reader(), &mut file)?;
    file.sync_all()?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/config/.wine/drive_c/mt5setup.exe")),
            PathBuf::from("/config/.wine/drive_c/mt5setup.exe.part")
        );
    }
}
