//! Session registry keyed by session id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

/// Maps session ids to per-transfer state and issues new ids.
///
/// Ids start at 1 and increase by one per call to [`issue_id`]. The counter
/// wraps after `u32::MAX` issues; it is owned by one server context, so
/// reaching that in a single process lifetime is not expected.
///
/// [`issue_id`]: SessionRegistry::issue_id
pub struct SessionRegistry<T> {
    next_id: AtomicU32,
    sessions: Mutex<HashMap<u32, Arc<T>>>,
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh session id.
    pub fn issue_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, session_id: u32) -> Option<Arc<T>> {
        self.sessions.lock().get(&session_id).cloned()
    }

    /// Return the state for `session_id`, creating it with `make` if absent.
    pub fn get_or_insert_with(&self, session_id: u32, make: impl FnOnce() -> T) -> Arc<T> {
        self.sessions
            .lock()
            .entry(session_id)
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }

    pub fn remove(&self, session_id: u32) -> Option<Arc<T>> {
        self.sessions.lock().remove(&session_id)
    }

    /// Snapshot of all live entries.
    pub fn entries(&self) -> Vec<(u32, Arc<T>)> {
        self.sessions
            .lock()
            .iter()
            .map(|(id, state)| (*id, state.clone()))
            .collect()
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
