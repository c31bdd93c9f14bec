//! Joinable set of transfer threads.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::TransferError;
use crate::progress::TransferProgress;

struct Tracked<R> {
    session_id: u32,
    progress: Arc<TransferProgress>,
    handle: JoinHandle<Result<R, TransferError>>,
}

/// Owns one thread per running transfer so they can be cancelled and joined
/// instead of being left detached.
pub struct TransferSet<R> {
    tracked: Mutex<Vec<Tracked<R>>>,
}

impl<R: Send + 'static> TransferSet<R> {
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Run `f` on a new thread named after the session.
    pub fn spawn<F>(&self, session_id: u32, progress: Arc<TransferProgress>, f: F) -> io::Result<()>
    where
        F: FnOnce() -> Result<R, TransferError> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("transfer-{}", session_id))
            .spawn(f)?;
        self.tracked.lock().push(Tracked {
            session_id,
            progress,
            handle,
        });
        Ok(())
    }

    /// Join threads that have already exited and return their results.
    pub fn reap_finished(&self) -> Vec<(u32, Result<R, TransferError>)> {
        let finished: Vec<Tracked<R>> = {
            let mut tracked = self.tracked.lock();
            let (done, running): (Vec<_>, Vec<_>) =
                tracked.drain(..).partition(|t| t.handle.is_finished());
            *tracked = running;
            done
        };
        finished.into_iter().map(join).collect()
    }

    /// Number of transfers not yet joined.
    pub fn active(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Ask every running transfer to stop at its next poll.
    pub fn cancel_all(&self) {
        for t in self.tracked.lock().iter() {
            t.progress.cancel();
        }
    }

    /// Wait for every transfer, in spawn order.
    pub fn join_all(&self) -> Vec<(u32, Result<R, TransferError>)> {
        let tracked = std::mem::take(&mut *self.tracked.lock());
        tracked.into_iter().map(join).collect()
    }
}

impl<R: Send + 'static> Default for TransferSet<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn join<R>(t: Tracked<R>) -> (u32, Result<R, TransferError>) {
    let result = t.handle.join().unwrap_or_else(|_| {
        warn!(session_id = t.session_id, "transfer thread panicked");
        Err(TransferError::Panicked)
    });
    (t.session_id, result)
}
