//! Progress counters shared between a transfer thread and whoever tracks it.
//! All fields are atomic so readers never block the transfer.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::error::TransferError;

pub const STATE_IDLE: u8 = 0;
pub const STATE_RUNNING: u8 = 1;
pub const STATE_COMPLETE: u8 = 2;
pub const STATE_FAILED: u8 = 3;
pub const STATE_CANCELLED: u8 = 4;

pub struct TransferProgress {
    pub session_id: u32,
    pub bytes_done: AtomicU64,
    pub bytes_total: AtomicU64,
    pub chunks_done: AtomicU64,
    pub retransmits: AtomicU64,
    pub state: AtomicU8,
    cancelled: AtomicBool,
}

impl TransferProgress {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            bytes_done: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            chunks_done: AtomicU64::new(0),
            retransmits: AtomicU64::new(0),
            state: AtomicU8::new(STATE_IDLE),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn start(&self, bytes_total: u64) {
        self.bytes_total.store(bytes_total, Ordering::Relaxed);
        self.state.store(STATE_RUNNING, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.bytes_done.fetch_add(bytes as u64, Ordering::Relaxed);
        self.chunks_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmit(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    /// Store the terminal state matching `result`.
    pub fn finish<T>(&self, result: &Result<T, TransferError>) {
        let state = match result {
            Ok(_) => STATE_COMPLETE,
            Err(TransferError::Cancelled) => STATE_CANCELLED,
            Err(_) => STATE_FAILED,
        };
        self.state.store(state, Ordering::Relaxed);
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.state() >= STATE_COMPLETE
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Progress as a fraction 0.0 - 1.0. An empty file counts as done once
    /// the transfer completes.
    pub fn fraction(&self) -> f64 {
        let total = self.bytes_total.load(Ordering::Relaxed);
        if total == 0 {
            return if self.state() == STATE_COMPLETE { 1.0 } else { 0.0 };
        }
        let done = self.bytes_done.load(Ordering::Relaxed);
        (done as f64 / total as f64).min(1.0)
    }
}
