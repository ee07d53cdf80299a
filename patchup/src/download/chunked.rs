//! Range-aware chunked downloader.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::block::{buffer_size_for, BlockTask, ByteRange};
use super::retry::retry_delay;
use super::session::DownloadSession;
use super::transport::{map_io_error, HttpResponse, HttpTransport};
use crate::cancel::CancelToken;
use crate::config::DownloadSettings;
use crate::error::{UpdateError, UpdateResult};
use crate::progress::{DownloadCallback, ProgressThrottle};

/// How often the coordinator re-checks cancellation and the deadline.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Outcome of the 1-byte range probe.
enum Probe {
    /// Ranges are supported and the total length is known.
    Ranged(u64),
    /// Use a single stream; the probe response is reusable when it already
    /// carries the whole body.
    Sequential(Option<HttpResponse>),
}

/// Downloads one resource, concurrently when the server supports ranges.
pub struct ChunkedDownloader {
    transport: Arc<dyn HttpTransport>,
    settings: DownloadSettings,
    cancel: CancelToken,
}

impl ChunkedDownloader {
    /// Create a downloader over the given transport.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        settings: DownloadSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            settings,
            cancel,
        }
    }

    /// Downloader settings in effect.
    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Download `url` into `dest`, returning the number of bytes written.
    ///
    /// On failure `dest` is removed; a partially reassembled file is never
    /// left behind.
    pub fn download_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<u64> {
        self.cancel.check()?;

        let result = match self.probe(url)? {
            Probe::Ranged(length) if length > 0 => {
                debug!(url, length, "Server supports ranges, downloading in blocks");
                self.download_concurrent(url, dest, length, on_progress)
            }
            Probe::Ranged(_) => {
                debug!(url, "Resource is empty");
                File::create(dest)
                    .map(|_| 0)
                    .map_err(|e| UpdateError::write(dest, e))
            }
            Probe::Sequential(response) => {
                debug!(url, "Server does not support ranges, downloading sequentially");
                let response = match response {
                    Some(response) => response,
                    None => self.transport.get(url, None)?,
                };
                self.download_sequential(url, response, dest, on_progress)
            }
        };

        if result.is_err() {
            discard(dest);
        }
        result
    }

    fn probe(&self, url: &str) -> UpdateResult<Probe> {
        let response = self.transport.get(url, Some(ByteRange::new(0, 0)))?;

        match response.status {
            206 => match response.content_range_total {
                Some(total) => Ok(Probe::Ranged(total)),
                None => Ok(Probe::Sequential(None)),
            },
            // Range ignored, the body is the whole resource.
            200 => Ok(Probe::Sequential(Some(response))),
            416 => Ok(Probe::Sequential(None)),
            status if (200..300).contains(&status) => Ok(Probe::Sequential(None)),
            _ => Err(response.into_status_error(url, "200..300")),
        }
    }

    fn download_sequential(
        &self,
        url: &str,
        response: HttpResponse,
        dest: &Path,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<u64> {
        if !response.is_success() {
            return Err(response.into_status_error(url, "200..300"));
        }

        let declared = response.content_length;
        let total = declared.unwrap_or(self.settings.fallback_length);
        let mut buffer = vec![0u8; buffer_size_for(total)];
        let throttle = ProgressThrottle::default();

        let file = File::create(dest).map_err(|e| UpdateError::write(dest, e))?;
        let mut writer = BufWriter::new(file);
        let mut body = response.body;
        let mut written = 0u64;

        loop {
            self.cancel.check()?;
            let n = body.read(&mut buffer).map_err(|e| map_io_error(url, &e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .map_err(|e| UpdateError::write(dest, e))?;
            written += n as u64;

            if let Some(delta) = throttle.update(written) {
                on_progress(delta, written, total);
            }
        }

        writer.flush().map_err(|e| UpdateError::write(dest, e))?;
        on_progress(throttle.flush(written), written, total);

        if let Some(expected) = declared {
            if written != expected {
                return Err(UpdateError::ByteCountMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        info!(url, bytes = written, "Sequential download complete");
        Ok(written)
    }

    fn download_concurrent(
        &self,
        url: &str,
        dest: &Path,
        length: u64,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<u64> {
        let session = DownloadSession::new(length, self.settings.block_size.max(1));
        let workers = self.settings.threads.max(1).min(session.block_count());
        let throttle = ProgressThrottle::default();
        let started = Instant::now();

        debug!(
            url,
            length,
            blocks = session.block_count(),
            workers,
            "Starting concurrent download"
        );

        let wait_result = std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.run_worker(url, &session, &throttle, on_progress));
            }

            let outcome = self.await_workers(url, &session, started);
            if outcome.is_err() {
                session.stop();
            }
            outcome
        });
        wait_result?;
        self.cancel.check()?;

        let so_far = session.bytes_so_far();
        on_progress(throttle.flush(so_far), so_far, length);

        if let Err(e) = session.verify() {
            warn!(
                url,
                completed = ?session.completed_indices(),
                error = %e,
                "Concurrent download incomplete, discarding destination"
            );
            return Err(e);
        }

        self.write_blocks(&session, dest)?;

        info!(
            url,
            bytes = length,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Concurrent download complete"
        );
        Ok(length)
    }

    /// Block until every task reported, cancellation, or the deadline.
    fn await_workers(
        &self,
        url: &str,
        session: &DownloadSession,
        started: Instant,
    ) -> UpdateResult<()> {
        loop {
            if session.latch().wait_timeout(WAIT_SLICE) {
                return Ok(());
            }
            self.cancel.check()?;
            if started.elapsed() >= self.settings.deadline {
                return Err(UpdateError::DeadlineExceeded {
                    url: url.to_string(),
                    secs: self.settings.deadline.as_secs(),
                });
            }
        }
    }

    fn run_worker(
        &self,
        url: &str,
        session: &DownloadSession,
        throttle: &ProgressThrottle,
        on_progress: &DownloadCallback<'_>,
    ) {
        while let Some(task) = session.next_task() {
            match self.fetch_block_with_retries(url, task, session, throttle, on_progress) {
                Ok(buffer) => session.complete(task.index, buffer),
                Err(e) => {
                    if !e.is_interrupted() {
                        warn!(url, block = task.index, error = %e, "Block failed permanently");
                    }
                    session.fail(task.index, &e);
                }
            }
        }
    }

    fn fetch_block_with_retries(
        &self,
        url: &str,
        task: BlockTask,
        session: &DownloadSession,
        throttle: &ProgressThrottle,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<Vec<u8>> {
        let attempts = self.settings.block_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.ensure_running(session)?;
            attempt += 1;

            match self.fetch_block(url, task, session, throttle, on_progress) {
                Ok(buffer) => return Ok(buffer),
                Err(e) if e.is_interrupted() || attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = retry_delay(attempt - 1, self.settings.block_retry_base_delay);
                    debug!(
                        url,
                        block = task.index,
                        range = %task.range,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Block attempt failed, retrying"
                    );
                    self.cancel.sleep(delay)?;
                }
            }
        }
    }

    fn fetch_block(
        &self,
        url: &str,
        task: BlockTask,
        session: &DownloadSession,
        throttle: &ProgressThrottle,
        on_progress: &DownloadCallback<'_>,
    ) -> UpdateResult<Vec<u8>> {
        let response = self.transport.get(url, Some(task.range))?;
        if response.status != 206 {
            return Err(response.into_status_error(url, "206"));
        }

        let expected = task.range.len();
        let mut buffer = Vec::with_capacity(expected as usize);
        let mut chunk = vec![0u8; buffer_size_for(expected)];
        let mut body = response.body;
        let mut received = 0u64;

        let result = loop {
            if let Err(e) = self.ensure_running(session) {
                break Err(e);
            }
            match body.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    received += n as u64;
                    let so_far = session.add_bytes(n as u64);
                    if let Some(delta) = throttle.update(so_far) {
                        on_progress(delta, so_far, session.length());
                    }
                }
                Err(e) => break Err(map_io_error(url, &e)),
            }
        };

        if let Err(e) = result {
            session.discard_bytes(received);
            return Err(e);
        }

        if received != expected {
            session.discard_bytes(received);
            return Err(UpdateError::BlockSizeMismatch {
                index: task.index,
                expected,
                actual: received,
            });
        }

        Ok(buffer)
    }

    fn ensure_running(&self, session: &DownloadSession) -> UpdateResult<()> {
        if session.is_stopped() {
            return Err(UpdateError::Interrupted);
        }
        self.cancel.check()
    }

    /// Write verified blocks in ascending index order.
    fn write_blocks(&self, session: &DownloadSession, dest: &Path) -> UpdateResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)
            .map_err(|e| UpdateError::write(dest, e))?;
        file.set_len(session.length())
            .map_err(|e| UpdateError::write(dest, e))?;

        for index in 0..session.block_count() {
            let buffer = session.take_block(index).ok_or_else(|| {
                UpdateError::IncompleteBlocks {
                    expected: session.block_count(),
                    received: index,
                    missing: vec![index],
                    details: String::new(),
                }
            })?;
            let offset = index as u64 * session.block_size();
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(&buffer))
                .map_err(|e| UpdateError::write(dest, e))?;
        }

        file.sync_all().map_err(|e| UpdateError::write(dest, e))
    }
}

fn discard(dest: &Path) {
    match fs::remove_file(dest) {
        Ok(()) => debug!(path = %dest.display(), "Discarded incomplete download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dest.display(), error = %e, "Failed to remove incomplete download"),
    }
}
