//! Synchronous Signals
//!
//! Multicast callback lists used at the notification seams of the core:
//! value/status/validity changes, transaction summaries and progress
//! events. Emission is synchronous on the emitting thread; subscribers
//! must not block and must not call back into the emitting component.

use std::sync::Mutex;

type Slot<A> = Box<dyn Fn(&A) + Send + Sync>;

/// A list of subscribers invoked in connection order on every emit.
pub struct Signal<A> {
    slots: Mutex<Vec<Slot<A>>>,
}

impl<A> Signal<A> {
    /// Empty signal with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Append a subscriber. There is no disconnect; subscribers live as
    /// long as the owning component.
    pub fn connect(&self, slot: impl Fn(&A) + Send + Sync + 'static) {
        self.slots.lock().expect("signal poisoned").push(Box::new(slot));
    }

    /// Invoke every subscriber with `args`.
    pub fn emit(&self, args: &A) {
        let slots = self.slots.lock().expect("signal poisoned");
        for slot in slots.iter() {
            slot(args);
        }
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().expect("signal poisoned").len()
    }

    /// Whether nothing is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("slots", &self.len()).finish()
    }
}
