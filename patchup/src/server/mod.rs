//! Update server endpoints.
//!
//! A [`ServerSource`] is a single endpoint that can fetch text resources and
//! download files relative to its base URL. [`MultipleServers`] wraps an
//! ordered list of sources and fails over to the next one when an operation
//! fails.

mod http;

use std::path::Path;

use tracing::warn;

use crate::error::{UpdateError, UpdateResult};
use crate::progress::DownloadCallback;

pub use http::HttpServerSource;

/// A transport endpoint serving version lists and archives.
pub trait ServerSource: Send + Sync {
    /// Fetch a whole text resource.
    fn fetch_text(&self, path: &str) -> UpdateResult<String>;

    /// Download a resource to `dest`, reporting progress.
    fn download_file(
        &self,
        path: &str,
        dest: &Path,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<u64>;

    /// Full URI of a relative resource.
    fn build_uri(&self, path: &str) -> String;
}

/// Ordered failover over several sources.
pub struct MultipleServers {
    sources: Vec<Box<dyn ServerSource>>,
}

impl MultipleServers {
    /// Wrap the given sources, tried in order.
    pub fn new(sources: Vec<Box<dyn ServerSource>>) -> UpdateResult<Self> {
        if sources.is_empty() {
            return Err(UpdateError::Config("no servers configured".to_string()));
        }
        Ok(Self { sources })
    }

    /// Number of wrapped sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Always false; construction rejects an empty list.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Run `op` against each source until one succeeds.
    ///
    /// Failures are logged and the next source is tried; once every source
    /// has failed the last error is returned. Cancellation is returned
    /// immediately.
    pub fn try_each<T, F>(&self, mut op: F) -> UpdateResult<T>
    where
        F: FnMut(&dyn ServerSource) -> UpdateResult<T>,
    {
        let mut last_error = None;

        for (i, source) in self.sources.iter().enumerate() {
            match op(source.as_ref()) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    warn!(
                        source = i,
                        uri = %source.build_uri(""),
                        error = %e,
                        "Server failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| UpdateError::Config("no servers configured".to_string())))
    }
}

impl ServerSource for MultipleServers {
    fn fetch_text(&self, path: &str) -> UpdateResult<String> {
        self.try_each(|source| source.fetch_text(path))
    }

    fn download_file(
        &self,
        path: &str,
        dest: &Path,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<u64> {
        self.try_each(|source| source.download_file(path, dest, on_progress))
    }

    fn build_uri(&self, path: &str) -> String {
        self.sources
            .first()
            .map(|s| s.build_uri(path))
            .unwrap_or_else(|| path.to_string())
    }
}
