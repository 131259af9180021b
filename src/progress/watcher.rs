//! Result Watcher
//!
//! Runs one fallible computation on a worker thread and lets the owner
//! observe its lifecycle: `started` fires on spawn, `finished` fires on the
//! worker thread when the result is in, and [`ResultWatcher::result`]
//! harvests the outcome. Dropping the watcher joins the worker, so an
//! abandoned watcher never leaks a running thread.

use crate::result::{Error, Result};
use crate::signal::Signal;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct WatchState<T> {
    result: Result<T>,
    waiting: bool,
}

struct WatcherShared<T> {
    finished: Signal<()>,
    state: Mutex<WatchState<T>>,
}

/// Watches one background computation of a `Result<T>`.
pub struct ResultWatcher<T: Clone + Send + 'static> {
    started: Signal<()>,
    shared: Arc<WatcherShared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> ResultWatcher<T> {
    /// Idle watcher; [`ResultWatcher::result`] reports "no data" until a
    /// computation is spawned.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Signal::new(),
            shared: Arc::new(WatcherShared {
                finished: Signal::new(),
                state: Mutex::new(WatchState {
                    result: Err(Error::with_detail("No data!", "no computation spawned")),
                    waiting: false,
                }),
            }),
            worker: None,
        }
    }

    /// Signal emitted on the spawning thread once the worker is launched.
    #[must_use]
    pub fn started(&self) -> &Signal<()> {
        &self.started
    }

    /// Signal emitted on the worker thread when the result is available.
    #[must_use]
    pub fn finished(&self) -> &Signal<()> {
        &self.shared.finished
    }

    /// Launch `work` on a worker thread.
    ///
    /// Fails if a previous computation is still running.
    pub fn spawn(&mut self, work: impl FnOnce() -> Result<T> + Send + 'static) -> Result<()> {
        {
            let mut state = self.shared.state.lock().expect("watcher poisoned");
            if state.waiting {
                return Err(Error::with_detail("Watcher busy!", "previous computation not finished"));
            }
            state.waiting = true;
            state.result = Err(Error::with_detail("Data not finished!", "waiting for worker"));
        }
        // A finished previous worker is joined here so handles do not pile up.
        if let Some(previous) = self.worker.take() {
            let _ = previous.join();
        }

        let shared = Arc::clone(&self.shared);
        self.worker = Some(std::thread::spawn(move || {
            let result = work();
            {
                let mut state = shared.state.lock().expect("watcher poisoned");
                state.result = result;
                state.waiting = false;
            }
            shared.finished.emit(&());
        }));

        self.started.emit(&());
        Ok(())
    }

    /// Whether a computation is still running.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.shared.state.lock().expect("watcher poisoned").waiting
    }

    /// The current outcome: "no data" before any spawn, "not finished"
    /// while waiting, then the computed result.
    #[must_use]
    pub fn result(&self) -> Result<T> {
        self.shared.state.lock().expect("watcher poisoned").result.clone()
    }
}

impl<T: Clone + Send + 'static> Default for ResultWatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Drop for ResultWatcher<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for ResultWatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultWatcher")
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn fresh_watcher_reports_no_data() {
        let watcher: ResultWatcher<u32> = ResultWatcher::new();
        assert!(!watcher.is_waiting());
        assert_eq!(watcher.result().unwrap_err().general(), "No data!");
    }

    #[test]
    fn computation_publishes_result_and_signals() {
        let mut watcher: ResultWatcher<u32> = ResultWatcher::new();
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = channel::bounded(1);

        let counter = Arc::clone(&started);
        watcher.started().connect(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&finished);
        watcher.finished().connect(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
            done_tx.send(()).unwrap();
        });

        watcher.spawn(|| Ok(40 + 2)).unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.result().unwrap(), 42);
        assert!(!watcher.is_waiting());
    }

    #[test]
    fn waiting_state_while_worker_runs() {
        let mut watcher: ResultWatcher<()> = ResultWatcher::new();
        let (release_tx, release_rx) = channel::bounded::<()>(0);

        watcher
            .spawn(move || {
                release_rx.recv().ok();
                Ok(())
            })
            .unwrap();
        assert!(watcher.is_waiting());
        assert_eq!(watcher.result().unwrap_err().general(), "Data not finished!");

        // A second spawn while busy is refused.
        assert!(watcher.spawn(|| Ok(())).is_err());

        release_tx.send(()).unwrap();
        drop(watcher); // joins the worker
    }

    #[test]
    fn drop_joins_the_worker() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);

        let mut watcher: ResultWatcher<()> = ResultWatcher::new();
        watcher
            .spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        drop(watcher);

        // Join-on-drop means the work completed before drop returned.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_results_pass_through() {
        let mut watcher: ResultWatcher<u32> = ResultWatcher::new();
        watcher
            .spawn(|| Err(Error::with_detail("Read error!", "boom")))
            .unwrap();
        drop_join(&mut watcher);
        assert_eq!(watcher.result().unwrap_err().general(), "Read error!");
    }

    fn drop_join<T: Clone + Send + 'static>(watcher: &mut ResultWatcher<T>) {
        while watcher.is_waiting() {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
