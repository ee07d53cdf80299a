//! Concurrent, range-aware downloads.
//!
//! This module provides:
//! - A minimal HTTP transport abstraction (`transport`)
//! - Block planning over a byte range (`block`)
//! - Shared per-download state and the completion latch (`session`)
//! - Exponential backoff and request-level retry (`retry`)
//! - The chunked downloader itself (`chunked`)
//!
//! # Architecture
//!
//! ```text
//! ChunkedDownloader
//!         │
//!         ├── probe (Range: bytes=0-0)
//!         │       ├── 206 + total ──► concurrent path
//!         │       └── otherwise   ──► sequential path
//!         │
//!         ├── DownloadSession (queue, results map, latch)
//!         │       └── min(threads, blocks) scoped workers
//!         │
//!         └── HttpTransport (trait)
//!                 └── ReqwestTransport
//! ```

mod block;
mod chunked;
mod retry;
mod session;
mod transport;

pub use block::{buffer_size_for, plan_blocks, BlockTask, ByteRange};
pub use chunked::ChunkedDownloader;
pub use retry::{retry_delay, with_retrying};
pub use session::{CompletionLatch, DownloadSession};
pub use transport::{
    map_io_error, parse_content_range_total, truncate_body, HttpResponse, HttpTransport,
    ReqwestTransport,
};

#[cfg(test)]
pub(crate) use transport::mock;
