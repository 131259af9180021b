//! Progress Reporting and Cooperative Cancellation
//!
//! A process-shared [`ProgressNotifier`] publishes progress signals to the
//! embedding application (UI, logs). Work is organized as *sequences* -
//! one logical user operation - each owning at most one active *task* at a
//! time. Tasks count steps; cancellation is a flag on the sequence that
//! workers poll at convenient boundaries (the device interface polls at
//! every packet).
//!
//! Signals are emitted synchronously on the advancing thread; subscribers
//! must not block.
//!
//! # Lifecycle
//!
//! - The first `get_or_create_controller` of an idle notifier starts a
//!   sequence (`sequence_started`); dropping the last handle to it emits
//!   `sequence_finished`.
//! - Creating a task publishes `task_started_*`; starting another while
//!   one is active implicitly finishes the prior task after the new one
//!   is published. A finished task's late messages are dropped.

mod watcher;

pub use watcher::ResultWatcher;

use crate::signal::Signal;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

// =============================================================================
// Signal payloads
// =============================================================================

/// Payload of the `task_advanced_to` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    /// Steps completed so far.
    pub steps_done: u64,
    /// Task display name.
    pub name: String,
    /// Total step count, or 0 for an unbound task.
    pub total_steps: u64,
    /// Whether the task advertises cancellation.
    pub cancellable: bool,
}

/// Signals published by a [`ProgressNotifier`].
#[derive(Debug, Default)]
pub struct ProgressSignals {
    /// A new sequence of tasks has started.
    pub sequence_started: Signal<()>,
    /// The current sequence has finished (all handles dropped).
    pub sequence_finished: Signal<()>,
    /// A task with a known total step count has started.
    pub task_started_bound: Signal<(String, u64, bool)>,
    /// A task with an unknown total has started.
    pub task_started_unbound: Signal<(String, bool)>,
    /// The active task advanced.
    pub task_advanced_to: Signal<TaskProgress>,
    /// The active task finished.
    pub task_finished: Signal<()>,
    /// Informational message from the active task.
    pub progress_message: Signal<String>,
    /// Final result message of the sequence.
    pub result_message: Signal<String>,
    /// Error message from the sequence or its active task.
    pub error_message: Signal<String>,
}

// =============================================================================
// Notifier
// =============================================================================

struct NotifierInner {
    signals: ProgressSignals,
    current_sequence: Mutex<Weak<SequenceInner>>,
}

/// Process-shared publisher of progress signals.
#[derive(Clone)]
pub struct ProgressNotifier {
    inner: Arc<NotifierInner>,
}

impl ProgressNotifier {
    /// Fresh notifier with no active sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                signals: ProgressSignals::default(),
                current_sequence: Mutex::new(Weak::new()),
            }),
        }
    }

    /// The signal set to subscribe to.
    #[must_use]
    pub fn signals(&self) -> &ProgressSignals {
        &self.inner.signals
    }

    /// Controller for the active sequence, starting a new sequence if the
    /// notifier is idle.
    #[must_use]
    pub fn get_or_create_controller(&self) -> ProgressController {
        let new_sequence;
        {
            let mut current = self.inner.current_sequence.lock().expect("notifier poisoned");
            if let Some(sequence) = current.upgrade() {
                return ProgressController { sequence };
            }
            new_sequence = Arc::new(SequenceInner {
                notifier: Arc::downgrade(&self.inner),
                current_task_id: AtomicU64::new(0),
                state: Mutex::new(SequenceState {
                    current_task: Weak::new(),
                    cancelled: false,
                }),
            });
            *current = Arc::downgrade(&new_sequence);
        }

        self.inner.signals.sequence_started.emit(&());
        ProgressController { sequence: new_sequence }
    }

    /// Controller for the active sequence, if one is running.
    #[must_use]
    pub fn controller(&self) -> Option<ProgressController> {
        let current = self.inner.current_sequence.lock().expect("notifier poisoned");
        current.upgrade().map(|sequence| ProgressController { sequence })
    }

    /// Whether a sequence is currently alive.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.inner
            .current_sequence
            .lock()
            .expect("notifier poisoned")
            .upgrade()
            .is_some()
    }

    /// Request cancellation of the active sequence, if any.
    pub fn cancel(&self) {
        let sequence = self
            .inner
            .current_sequence
            .lock()
            .expect("notifier poisoned")
            .upgrade();
        if let Some(sequence) = sequence {
            sequence.state.lock().expect("sequence poisoned").cancelled = true;
        }
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressNotifier")
            .field("in_progress", &self.is_in_progress())
            .finish()
    }
}

// =============================================================================
// Sequence
// =============================================================================

struct SequenceState {
    current_task: Weak<TaskInner>,
    cancelled: bool,
}

struct SequenceInner {
    notifier: Weak<NotifierInner>,
    current_task_id: AtomicU64,
    state: Mutex<SequenceState>,
}

impl SequenceInner {
    fn is_cancelled(&self) -> bool {
        self.state.lock().expect("sequence poisoned").cancelled
    }

    fn with_signals(&self, publish: impl FnOnce(&ProgressSignals)) {
        if let Some(notifier) = self.notifier.upgrade() {
            publish(&notifier.signals);
        }
    }

    /// Forward a task-scoped event only while the task is still current.
    fn with_signals_for_task(&self, task_id: u64, publish: impl FnOnce(&ProgressSignals)) {
        if self.current_task_id.load(Ordering::SeqCst) != task_id {
            return;
        }
        self.with_signals(publish);
    }
}

impl Drop for SequenceInner {
    fn drop(&mut self) {
        self.with_signals(|signals| signals.sequence_finished.emit(&()));
    }
}

/// Handle to the active sequence; creates tasks and reports outcomes.
#[derive(Clone)]
pub struct ProgressController {
    sequence: Arc<SequenceInner>,
}

impl ProgressController {
    /// Whether cancellation has been requested for the sequence.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.sequence.is_cancelled()
    }

    /// Publish a sequence-level error message.
    pub fn send_error_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.sequence.with_signals(|signals| signals.error_message.emit(&message));
    }

    /// Publish the sequence's result message.
    pub fn send_result_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.sequence.with_signals(|signals| signals.result_message.emit(&message));
    }

    /// Start a task with an unknown total step count.
    #[must_use]
    pub fn create_task_unbound(&self, name: impl Into<String>, cancellable: bool) -> ProgressTask {
        self.create_task(name.into(), None, cancellable)
    }

    /// Start a task with `total_steps` known up front.
    #[must_use]
    pub fn create_task_bound(
        &self,
        name: impl Into<String>,
        total_steps: u64,
        cancellable: bool,
    ) -> ProgressTask {
        self.create_task(name.into(), Some(total_steps), cancellable)
    }

    fn create_task(&self, name: String, total_steps: Option<u64>, cancellable: bool) -> ProgressTask {
        let task_id = self.sequence.current_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        let task = Arc::new(TaskInner {
            sequence: Arc::clone(&self.sequence),
            task_id,
            name,
            total_steps,
            cancellable,
            steps_done: Mutex::new(0),
        });

        let had_previous_task;
        {
            let mut state = self.sequence.state.lock().expect("sequence poisoned");
            had_previous_task = state.current_task.upgrade().is_some();
            state.current_task = Arc::downgrade(&task);
            // A new task starts with a clean cancellation slate.
            state.cancelled = false;
        }

        self.sequence.with_signals(|signals| match task.total_steps {
            Some(total) => signals
                .task_started_bound
                .emit(&(task.name.clone(), total, task.cancellable)),
            None => signals.task_started_unbound.emit(&(task.name.clone(), task.cancellable)),
        });

        // The prior task is finished implicitly, after the new one is
        // published. Its own drop stays silent because the id moved on.
        if had_previous_task {
            self.sequence.with_signals(|signals| signals.task_finished.emit(&()));
        }

        ProgressTask { inner: Some(task) }
    }
}

impl std::fmt::Debug for ProgressController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressController")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Task
// =============================================================================

struct TaskInner {
    sequence: Arc<SequenceInner>,
    task_id: u64,
    name: String,
    total_steps: Option<u64>,
    cancellable: bool,
    steps_done: Mutex<u64>,
}

impl TaskInner {
    fn advance_by(&self, steps: u64) {
        let steps_done = {
            let mut counter = self.steps_done.lock().expect("task poisoned");
            *counter += steps;
            *counter
        };

        self.sequence.with_signals_for_task(self.task_id, |signals| {
            signals.task_advanced_to.emit(&TaskProgress {
                steps_done,
                name: self.name.clone(),
                total_steps: self.total_steps.unwrap_or(0),
                cancellable: self.cancellable,
            });
        });
    }
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        self.sequence
            .with_signals_for_task(self.task_id, |signals| signals.task_finished.emit(&()));
    }
}

/// Handle to one unit of work within a sequence.
///
/// The default value is a detached no-op task: advancing it does nothing
/// and it never reports cancellation. Long-running loops take a
/// `ProgressTask` parameter and callers without progress reporting pass
/// the default.
#[derive(Clone, Default)]
pub struct ProgressTask {
    inner: Option<Arc<TaskInner>>,
}

impl ProgressTask {
    /// A detached task that reports nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|task| task.sequence.is_cancelled())
    }

    /// Advance the step counter, ignoring cancellation.
    pub fn advance_by(&self, steps: u64) {
        if let Some(task) = &self.inner {
            task.advance_by(steps);
        }
    }

    /// Advance the step counter, then poll the cancellation flag.
    #[must_use]
    pub fn advance_by_is_cancelled(&self, steps: u64) -> bool {
        self.advance_by(steps);
        self.is_cancelled()
    }

    /// Publish a task-scoped progress message (dropped once superseded).
    pub fn send_progress_message(&self, message: impl Into<String>) {
        if let Some(task) = &self.inner {
            let message = message.into();
            task.sequence
                .with_signals_for_task(task.task_id, |signals| signals.progress_message.emit(&message));
        }
    }

    /// Publish a task-scoped error message (dropped once superseded).
    pub fn send_error_message(&self, message: impl Into<String>) {
        if let Some(task) = &self.inner {
            let message = message.into();
            task.sequence
                .with_signals_for_task(task.task_id, |signals| signals.error_message.emit(&message));
        }
    }

    /// Read-only cancellation handle derived from this task.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for ProgressTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTask")
            .field("attached", &self.inner.is_some())
            .finish()
    }
}

/// Read-only view of a task's cancellation flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Option<Arc<TaskInner>>,
}

impl CancelToken {
    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|task| task.sequence.is_cancelled())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        sequence_started: AtomicUsize,
        sequence_finished: AtomicUsize,
        task_started: AtomicUsize,
        task_finished: AtomicUsize,
        advances: Mutex<Vec<TaskProgress>>,
        messages: Mutex<Vec<String>>,
    }

    fn subscribe(notifier: &ProgressNotifier) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        let signals = notifier.signals();

        let r = Arc::clone(&recorder);
        signals.sequence_started.connect(move |()| {
            r.sequence_started.fetch_add(1, Ordering::SeqCst);
        });
        let r = Arc::clone(&recorder);
        signals.sequence_finished.connect(move |()| {
            r.sequence_finished.fetch_add(1, Ordering::SeqCst);
        });
        let r = Arc::clone(&recorder);
        signals.task_started_bound.connect(move |_| {
            r.task_started.fetch_add(1, Ordering::SeqCst);
        });
        let r = Arc::clone(&recorder);
        signals.task_started_unbound.connect(move |_| {
            r.task_started.fetch_add(1, Ordering::SeqCst);
        });
        let r = Arc::clone(&recorder);
        signals.task_finished.connect(move |()| {
            r.task_finished.fetch_add(1, Ordering::SeqCst);
        });
        let r = Arc::clone(&recorder);
        signals.task_advanced_to.connect(move |progress| {
            r.advances.lock().unwrap().push(progress.clone());
        });
        let r = Arc::clone(&recorder);
        signals.progress_message.connect(move |message| {
            r.messages.lock().unwrap().push(message.clone());
        });

        recorder
    }

    // =========================================================================
    // Sequence Lifecycle Tests
    // =========================================================================

    #[test]
    fn sequence_starts_once_and_finishes_on_last_drop() {
        let notifier = ProgressNotifier::new();
        let recorder = subscribe(&notifier);

        let controller = notifier.get_or_create_controller();
        let controller2 = notifier.get_or_create_controller();
        assert_eq!(recorder.sequence_started.load(Ordering::SeqCst), 1);
        assert!(notifier.is_in_progress());

        drop(controller);
        assert_eq!(recorder.sequence_finished.load(Ordering::SeqCst), 0);
        drop(controller2);
        assert_eq!(recorder.sequence_finished.load(Ordering::SeqCst), 1);
        assert!(!notifier.is_in_progress());
    }

    #[test]
    fn new_sequence_after_previous_finished() {
        let notifier = ProgressNotifier::new();
        let recorder = subscribe(&notifier);

        drop(notifier.get_or_create_controller());
        drop(notifier.get_or_create_controller());
        assert_eq!(recorder.sequence_started.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.sequence_finished.load(Ordering::SeqCst), 2);
    }

    // =========================================================================
    // Task Lifecycle Tests
    // =========================================================================

    #[test]
    fn task_advances_and_finishes() {
        let notifier = ProgressNotifier::new();
        let recorder = subscribe(&notifier);
        let controller = notifier.get_or_create_controller();

        let task = controller.create_task_bound("Reading settings", 100, true);
        task.advance_by(30);
        task.advance_by(20);
        drop(task);

        assert_eq!(recorder.task_started.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.task_finished.load(Ordering::SeqCst), 1);
        let advances = recorder.advances.lock().unwrap();
        assert_eq!(advances.len(), 2);
        assert_eq!(advances[1].steps_done, 50);
        assert_eq!(advances[1].total_steps, 100);
    }

    #[test]
    fn starting_a_task_finishes_the_previous_one() {
        let notifier = ProgressNotifier::new();
        let recorder = subscribe(&notifier);
        let controller = notifier.get_or_create_controller();

        let first = controller.create_task_unbound("First", false);
        let second = controller.create_task_bound("Second", 10, false);
        assert_eq!(recorder.task_started.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.task_finished.load(Ordering::SeqCst), 1);

        // The superseded task no longer reports.
        first.advance_by(5);
        assert!(recorder.advances.lock().unwrap().is_empty());
        first.send_progress_message("late");
        assert!(recorder.messages.lock().unwrap().is_empty());

        // Dropping the stale task emits nothing further.
        drop(first);
        assert_eq!(recorder.task_finished.load(Ordering::SeqCst), 1);

        drop(second);
        assert_eq!(recorder.task_finished.load(Ordering::SeqCst), 2);
    }

    // =========================================================================
    // Cancellation Tests
    // =========================================================================

    #[test]
    fn cancellation_is_visible_to_task_and_token() {
        let notifier = ProgressNotifier::new();
        let controller = notifier.get_or_create_controller();
        let task = controller.create_task_unbound("Flashing", true);
        let token = task.cancel_token();

        assert!(!task.is_cancelled());
        assert!(!token.is_cancelled());

        notifier.cancel();
        assert!(task.is_cancelled());
        assert!(token.is_cancelled());
        assert!(task.advance_by_is_cancelled(1));
    }

    #[test]
    fn new_task_resets_cancellation() {
        let notifier = ProgressNotifier::new();
        let controller = notifier.get_or_create_controller();
        let first = controller.create_task_unbound("First", true);
        notifier.cancel();
        assert!(first.is_cancelled());

        let second = controller.create_task_unbound("Second", true);
        assert!(!second.is_cancelled());
    }

    #[test]
    fn detached_task_is_inert() {
        let task = ProgressTask::none();
        assert!(!task.is_cancelled());
        task.advance_by(100);
        assert!(!task.advance_by_is_cancelled(100));
        assert!(!task.cancel_token().is_cancelled());
    }
}
