//! HTTP(S) server source.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::ServerSource;
use crate::cancel::CancelToken;
use crate::config::{DownloadSettings, HttpSettings};
use crate::download::{
    map_io_error, with_retrying, ChunkedDownloader, HttpTransport, ReqwestTransport,
};
use crate::error::{UpdateError, UpdateResult};
use crate::progress::DownloadCallback;

/// A single HTTP endpoint.
///
/// Text fetches and whole downloads are retried with exponential backoff;
/// downloads go through the [`ChunkedDownloader`].
pub struct HttpServerSource {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    downloader: ChunkedDownloader,
    retry_times: u32,
    retry_base_delay: Duration,
    cancel: CancelToken,
}

impl HttpServerSource {
    /// Create a source using a reqwest client built from `http`.
    pub fn new(
        base_url: &str,
        http: &HttpSettings,
        download: DownloadSettings,
        cancel: CancelToken,
    ) -> UpdateResult<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(http)?);
        Ok(Self::with_transport(base_url, transport, http, download, cancel))
    }

    /// Create a source over an existing transport.
    pub fn with_transport(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        http: &HttpSettings,
        download: DownloadSettings,
        cancel: CancelToken,
    ) -> Self {
        let downloader = ChunkedDownloader::new(Arc::clone(&transport), download, cancel.clone());
        Self {
            base_url: normalize_base_url(base_url),
            transport,
            downloader,
            retry_times: http.retry_times,
            retry_base_delay: http.retry_base_delay,
            cancel,
        }
    }

    /// Base URL, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ServerSource for HttpServerSource {
    fn fetch_text(&self, path: &str) -> UpdateResult<String> {
        let url = self.build_uri(path);
        debug!(url = %url, "Fetching text");

        with_retrying(self.retry_times, self.retry_base_delay, &self.cancel, &url, || {
            let response = self.transport.get(&url, None)?;
            if !response.is_success() {
                return Err(response.into_status_error(&url, "200..300"));
            }

            let mut text = String::new();
            let mut body = response.body;
            body.read_to_string(&mut text)
                .map_err(|e| map_io_error(&url, &e))?;
            Ok(text)
        })
    }

    fn download_file(
        &self,
        path: &str,
        dest: &Path,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<u64> {
        let link = self.build_uri(path).replace('+', "%2B");

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| UpdateError::create_dir(parent, e))?;
        }

        debug!(url = %link, dest = %dest.display(), "Downloading");
        with_retrying(self.retry_times, self.retry_base_delay, &self.cancel, &link, || {
            self.downloader.download_file(&link, dest, on_progress)
        })
    }

    fn build_uri(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Ensure the base URL ends with exactly one trailing `/`.
fn normalize_base_url(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::mock::MockTransport;
    use tempfile::TempDir;

    fn source(transport: MockTransport) -> HttpServerSource {
        let http = HttpSettings {
            retry_times: 3,
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let download = DownloadSettings {
            block_size: 64,
            block_retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        HttpServerSource::with_transport(
            "http://mirror.example.com/patches",
            Arc::new(transport),
            &http,
            download,
            CancelToken::new(),
        )
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://a/b"), "http://a/b/");
        assert_eq!(normalize_base_url("http://a/b/"), "http://a/b/");
        assert_eq!(normalize_base_url("http://a/b//"), "http://a/b/");
    }

    #[test]
    fn test_build_uri() {
        let source = source(MockTransport::new(Vec::new()));
        assert_eq!(
            source.build_uri("versions.txt"),
            "http://mirror.example.com/patches/versions.txt"
        );
        assert_eq!(
            source.build_uri("/v1.patch-archive"),
            "http://mirror.example.com/patches/v1.patch-archive"
        );
    }

    #[test]
    fn test_fetch_text() {
        let source = source(MockTransport::new(b"v1\nv2\n".to_vec()));
        assert_eq!(source.fetch_text("versions.txt").unwrap(), "v1\nv2\n");
    }

    #[test]
    fn test_download_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("nested").join("v1.patch-archive");
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

        let source = source(MockTransport::new(data.clone()));
        source
            .download_file("v1.patch-archive", &dest, &|_: u64, _: u64, _: u64| {})
            .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), data);
    }
}
