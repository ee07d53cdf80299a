//! Shared state of one concurrent download.
//!
//! ```text
//!            ┌──────────────┐  pop   ┌──────────┐
//!  plan ───► │  work queue  │ ─────► │ worker N │──┐
//!            └──────────────┘        └──────────┘  │ complete / fail
//!                                                  ▼
//!  coordinator ◄── latch (one count-down per task) ── results map
//! ```
//!
//! The queue is filled once up front and never refilled, so a worker that
//! finds it empty can exit. The coordinator never relies on that: it waits
//! for the [`CompletionLatch`], which reaches zero only after every dispatched
//! task has reported exactly once.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use super::block::{plan_blocks, BlockTask};
use crate::error::{UpdateError, UpdateResult};

/// Count-down barrier satisfied when every task has reported.
#[derive(Debug)]
pub struct CompletionLatch {
    remaining: Mutex<usize>,
    done: Condvar,
}

impl CompletionLatch {
    /// Create a latch expecting `count` reports.
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    /// Record one finished task.
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    /// Tasks that have not reported yet.
    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    /// Wait up to `timeout`; returns `true` once the count is zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return true;
        }
        self.done.wait_for(&mut remaining, timeout);
        *remaining == 0
    }
}

/// Transient state for one chunked download.
#[derive(Debug)]
pub struct DownloadSession {
    length: u64,
    block_size: u64,
    block_count: usize,
    queue: Mutex<VecDeque<BlockTask>>,
    completed: DashMap<usize, Vec<u8>>,
    failed: Mutex<BTreeMap<usize, String>>,
    bytes: AtomicU64,
    stopped: AtomicBool,
    latch: CompletionLatch,
}

impl DownloadSession {
    /// Plan the blocks of a `length`-byte resource and queue them all.
    pub fn new(length: u64, block_size: u64) -> Self {
        let tasks = plan_blocks(length, block_size);
        let block_count = tasks.len();
        Self {
            length,
            block_size,
            block_count,
            queue: Mutex::new(tasks.into()),
            completed: DashMap::with_capacity(block_count),
            failed: Mutex::new(BTreeMap::new()),
            bytes: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            latch: CompletionLatch::new(block_count),
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Next queued task, or `None` when the queue is drained or stopped.
    pub fn next_task(&self) -> Option<BlockTask> {
        if self.is_stopped() {
            return None;
        }
        self.queue.lock().pop_front()
    }

    /// Record a verified block buffer and report the task.
    pub fn complete(&self, index: usize, buffer: Vec<u8>) {
        self.completed.insert(index, buffer);
        self.latch.count_down();
    }

    /// Record a block that exhausted its attempts and report the task.
    pub fn fail(&self, index: usize, error: &UpdateError) {
        self.failed.lock().insert(index, error.to_string());
        self.latch.count_down();
    }

    /// Add received bytes; returns the new running total.
    pub fn add_bytes(&self, n: u64) -> u64 {
        self.bytes.fetch_add(n, Ordering::SeqCst) + n
    }

    /// Take back bytes of an attempt that did not produce a block.
    pub fn discard_bytes(&self, n: u64) {
        self.bytes.fetch_sub(n, Ordering::SeqCst);
    }

    /// Bytes received by attempts that are successful or still in flight.
    pub fn bytes_so_far(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    /// Tell workers to stop taking tasks and abandon in-flight reads.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Completion barrier of this session.
    pub fn latch(&self) -> &CompletionLatch {
        &self.latch
    }

    /// Check that every block is present and the sizes add up.
    pub fn verify(&self) -> UpdateResult<()> {
        let missing: Vec<usize> = (0..self.block_count)
            .filter(|i| !self.completed.contains_key(i))
            .collect();

        if !missing.is_empty() {
            let failed = self.failed.lock();
            let details = failed
                .iter()
                .map(|(index, reason)| format!("\n  block {}: {}", index, reason))
                .collect::<String>();
            return Err(UpdateError::IncompleteBlocks {
                expected: self.block_count,
                received: self.completed.len(),
                missing,
                details,
            });
        }

        let actual: u64 = self.completed.iter().map(|e| e.value().len() as u64).sum();
        if actual != self.length {
            return Err(UpdateError::ByteCountMismatch {
                expected: self.length,
                actual,
            });
        }
        Ok(())
    }

    /// Indices of recorded blocks, ascending.
    pub fn completed_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.completed.iter().map(|e| *e.key()).collect();
        indices.sort_unstable();
        indices
    }

    /// Remove and return the buffer of block `index`.
    pub fn take_block(&self, index: usize) -> Option<Vec<u8>> {
        self.completed.remove(&index).map(|(_, buffer)| buffer)
    }
}
