//! HTTP transport used by the downloader.
//!
//! The downloader only needs "GET this URL, optionally with a byte range".
//! [`HttpTransport`] captures exactly that so the block scheduler can be
//! tested without a network.

use std::error::Error as StdError;
use std::io::{self, Read};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, RANGE};

use super::block::ByteRange;
use crate::config::HttpSettings;
use crate::error::{UpdateError, UpdateResult};

/// Maximum number of body characters kept in status errors.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// A response whose body has not been read yet.
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Declared `Content-Length`, if any.
    pub content_length: Option<u64>,
    /// Total resource length from `Content-Range`, if numeric.
    pub content_range_total: Option<u64>,
    /// Streaming body.
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range_total", &self.content_range_total)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Consume the response into an `UnexpectedStatus` error.
    pub fn into_status_error(self, url: &str, expected: &str) -> UpdateError {
        UpdateError::UnexpectedStatus {
            url: url.to_string(),
            status: self.status,
            expected: expected.to_string(),
            body: truncate_body(&read_body_lossy(self.body)),
        }
    }
}

/// Issues GET requests, optionally restricted to a byte range.
pub trait HttpTransport: Send + Sync {
    /// Send a GET request and return once the headers have arrived.
    fn get(&self, url: &str, range: Option<ByteRange>) -> UpdateResult<HttpResponse>;
}

/// [`HttpTransport`] backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client from transport settings.
    pub fn new(settings: &HttpSettings) -> UpdateResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| UpdateError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| UpdateError::Config(format!("invalid header value for {}: {}", name, e)))?;
            headers.append(name, value);
        }

        let mut builder = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.response_timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(settings.ignore_certificate);

        if !settings.user_agent.is_empty() {
            builder = builder.user_agent(settings.user_agent.clone());
        }

        let client = builder
            .build()
            .map_err(|e| UpdateError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, range: Option<ByteRange>) -> UpdateResult<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request.send().map_err(|e| map_reqwest_error(url, &e))?;

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let content_range_total = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_length,
            content_range_total,
            body: Box::new(response),
        })
    }
}

/// Extract the total length from a `Content-Range` value like `bytes 0-0/1234`.
///
/// Returns `None` for an unknown (`*`) or malformed total.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}

/// Classify a reqwest failure into the transport error taxonomy.
fn map_reqwest_error(url: &str, e: &reqwest::Error) -> UpdateError {
    let url = url.to_string();
    let reason = e.to_string();

    if e.is_timeout() {
        return UpdateError::Timeout { url, reason };
    }
    if let Some(kind) = io_kind_in_chain(e) {
        return classify_io_kind(kind, url, reason);
    }
    if e.is_connect() {
        return UpdateError::ConnectionRefused { url, reason };
    }
    UpdateError::Transport { url, reason }
}

/// Classify an I/O failure raised while reading a response body.
pub fn map_io_error(url: &str, e: &io::Error) -> UpdateError {
    let url = url.to_string();
    let reason = e.to_string();

    if let Some(inner) = e.get_ref().and_then(|r| r.downcast_ref::<reqwest::Error>()) {
        if inner.is_timeout() {
            return UpdateError::Timeout { url, reason };
        }
    }
    classify_io_kind(e.kind(), url, reason)
}

fn classify_io_kind(kind: io::ErrorKind, url: String, reason: String) -> UpdateError {
    match kind {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => UpdateError::Timeout { url, reason },
        io::ErrorKind::ConnectionRefused => UpdateError::ConnectionRefused { url, reason },
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => UpdateError::ConnectionReset { url, reason },
        _ => UpdateError::Transport { url, reason },
    }
}

fn io_kind_in_chain(e: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = err.source();
    }
    None
}

fn read_body_lossy(mut body: Box<dyn Read + Send>) -> String {
    let mut bytes = Vec::new();
    // Only a prefix is kept, cap the read.
    let _ = (&mut body)
        .take((MAX_ERROR_BODY_CHARS * 4) as u64)
        .read_to_end(&mut bytes);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Keep the first 500 characters of an error body.
pub fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("\n...");
    truncated
}
