//! Bounded producer/consumer queue served by a fixed pool of worker threads.
//!
//! ```text
//! produce() --[slots]--> VecDeque --> worker 0..N: consume() -> action(item)
//!    blocks while full                        action false -> on_disconnect (once)
//! ```
//!
//! A panicking action is logged and the worker moves on to the next item.
//!
//! Once draining, `consume` hands out what is still queued and then returns
//! `None`, which ends the workers.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

struct State<T> {
    items: VecDeque<T>,
    draining: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    slots: usize,
    /// Signalled when an item is queued or draining starts.
    consumers: Condvar,
    /// Signalled when a slot frees up or draining starts.
    producers: Condvar,
    on_disconnect: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T> Shared<T> {
    fn consume(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.producers.notify_one();
                return Some(item);
            }
            if state.draining {
                return None;
            }
            self.consumers.wait(&mut state);
        }
    }

    /// Enter draining mode and run the disconnect callback the first time.
    fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            state.draining = true;
        }
        self.consumers.notify_all();
        self.producers.notify_all();
        if let Some(callback) = self.on_disconnect.lock().take() {
            callback();
        }
    }
}

pub struct TaskQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Start `workers` threads that run `action` on each consumed item. An
    /// action returning `false` puts the queue into draining mode and calls
    /// `on_disconnect`; the callback runs at most once, including the call
    /// made when the queue is dropped.
    pub fn new<A, D>(workers: usize, slots: usize, action: A, on_disconnect: D) -> io::Result<Self>
    where
        A: Fn(T) -> bool + Send + Sync + 'static,
        D: FnOnce() + Send + 'static,
    {
        assert!(slots > 0, "task queue needs at least one slot");
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(slots),
                draining: false,
            }),
            slots,
            consumers: Condvar::new(),
            producers: Condvar::new(),
            on_disconnect: Mutex::new(Some(Box::new(on_disconnect))),
        });
        let action = Arc::new(action);

        let mut queue = Self {
            shared,
            workers: Vec::with_capacity(workers),
        };
        for i in 0..workers {
            let shared = queue.shared.clone();
            let action = action.clone();
            // On failure, dropping `queue` drains and joins the workers started so far.
            let handle = thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || work(&shared, &*action))?;
            queue.workers.push(handle);
        }
        Ok(queue)
    }

    /// Queue `item`, blocking while every slot is taken. Hands the item back
    /// if the queue is draining.
    pub fn produce(&self, item: T) -> Result<(), T> {
        let mut state = self.shared.state.lock();
        while state.items.len() >= self.shared.slots && !state.draining {
            self.shared.producers.wait(&mut state);
        }
        if state.draining {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.shared.consumers.notify_one();
        Ok(())
    }

    /// Take the next item, blocking until one is queued. `None` once the
    /// queue is draining and empty.
    pub fn consume(&self) -> Option<T> {
        self.shared.consume()
    }

    /// Stop accepting work. Queued items are still handed to workers.
    pub fn drain(&self) {
        self.shared.disconnect();
    }

    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().draining
    }

    /// Items queued but not yet consumed.
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        self.shared.disconnect();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("task queue worker panicked");
            }
        }
    }
}

fn work<T>(shared: &Shared<T>, action: &(dyn Fn(T) -> bool + Send + Sync)) {
    let name = thread::current().name().unwrap_or("worker").to_string();
    loop {
        debug!(worker = %name, "waiting for a task");
        let Some(item) = shared.consume() else {
            break;
        };
        debug!(worker = %name, "executing a task");
        match panic::catch_unwind(AssertUnwindSafe(|| action(item))) {
            Ok(true) => {}
            Ok(false) => shared.disconnect(),
            Err(_) => warn!(worker = %name, "task panicked, worker continues"),
        }
    }
    debug!(worker = %name, "exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn workers_run_every_item() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let queue = TaskQueue::new(
            3,
            4,
            move |n: usize| {
                s.fetch_add(n, Ordering::SeqCst);
                true
            },
            || {},
        )
        .unwrap();
        for n in 1..=10 {
            queue.produce(n).unwrap();
        }
        drop(queue);
        assert_eq!(seen.load(Ordering::SeqCst), 55);
    }

    #[test]
    fn produce_blocks_when_slots_are_full() {
        // One worker parked on a gate, so queued items stay queued.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let queue = Arc::new(
            TaskQueue::new(
                1,
                2,
                move |_: u32| {
                    let _ = gate_rx.lock().recv();
                    true
                },
                || {},
            )
            .unwrap(),
        );

        queue.produce(0).unwrap(); // taken by the worker
        while !queue.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        queue.produce(1).unwrap();
        queue.produce(2).unwrap();
        assert_eq!(queue.len(), 2);

        let (done_tx, done_rx) = mpsc::channel();
        let q = queue.clone();
        let producer = thread::spawn(move || {
            q.produce(3).unwrap();
            done_tx.send(()).unwrap();
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        // Release item 0; the worker consumes item 1 and frees a slot.
        gate_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        producer.join().unwrap();

        drop(gate_tx);
        drop(Arc::into_inner(queue));
    }

    #[test]
    fn false_action_disconnects_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let queue = TaskQueue::new(
            2,
            4,
            |stop: bool| !stop,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        queue.produce(true).unwrap();
        while !queue.is_draining() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(queue.produce(false), Err(false));
        drop(queue);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_action_keeps_the_worker() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let queue = TaskQueue::new(
            1,
            4,
            move |n: usize| {
                if n == 0 {
                    panic!("bad item");
                }
                s.fetch_add(n, Ordering::SeqCst);
                true
            },
            || {},
        )
        .unwrap();
        queue.produce(0).unwrap();
        queue.produce(5).unwrap();
        queue.produce(7).unwrap();
        drop(queue);
        assert_eq!(seen.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn consume_returns_none_when_drained() {
        let queue = TaskQueue::new(0, 2, |_: u8| true, || {}).unwrap();
        queue.produce(1).unwrap();
        queue.drain();
        assert_eq!(queue.consume(), Some(1));
        assert_eq!(queue.consume(), None);
    }
}
