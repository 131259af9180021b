//! Property Store and Transactions
//!
//! The store owns every property's value holder and adapter and arbitrates
//! access through a shared/exclusive transaction lock:
//!
//! - *Shared* transactions are the everyday handle: reads, touches and
//!   writes, many holders at a time. The video thread uses the timed
//!   try-acquire so it never starves behind a reconfiguration.
//! - *Exclusive* transactions serialize multi-step sequences; the owning
//!   thread may re-enter, everyone else blocks.
//!
//! Every value mutation is captured in the transaction that caused it;
//! dropping the transaction releases the lock and publishes a
//! [`TransactionSummary`] with exactly that transaction's deltas. Value
//! changes cascade synchronously under the store's inner data lock:
//! dependency validators re-evaluate, derived (subsidiary) properties
//! recompute, and value-constrained access statuses update.
//!
//! In [`StoreMode::AsyncQueued`] writes are not performed inline: they are
//! appended to a FIFO drained by a single worker thread that acquires
//! exclusive transactions, so the write results surface in the drain
//! transaction's summary.

use crate::device::DeviceInterface;
use crate::progress::ProgressTask;
use crate::properties::adapter::{AccessStatus, AdapterBinding, PropertyAdapter};
use crate::properties::id::{DeviceType, PropertyId, PropertyRegistry};
use crate::properties::validator::{DependencyValidator, RankedValidation, ValueAccess};
use crate::properties::value::{PropertyValue, Scalar, Value, ValueType};
use crate::result::{Error, ErrorKind, OptionalResult, Result};
use crate::signal::Signal;

use crossbeam::channel::{Receiver, Sender, TryRecvError};

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

// =============================================================================
// Summary
// =============================================================================

/// Everything one closed transaction changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSummary {
    /// Properties whose access status moved.
    pub status_changed: BTreeSet<PropertyId>,
    /// Properties whose value moved (including resets and cascades).
    pub value_changed: BTreeSet<PropertyId>,
    /// Properties a write was attempted on.
    pub value_written: BTreeSet<PropertyId>,
    /// Failed writes, by property.
    pub last_write_errors: BTreeMap<PropertyId, Error>,
    /// Whether the connection-lost state moved during the transaction.
    pub connection_changed: bool,
}

impl TransactionSummary {
    /// Whether nothing at all happened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status_changed.is_empty()
            && self.value_changed.is_empty()
            && self.value_written.is_empty()
            && self.last_write_errors.is_empty()
            && !self.connection_changed
    }

    /// Whether `id`'s value moved.
    #[must_use]
    pub fn has_value_changed(&self, id: PropertyId) -> bool {
        self.value_changed.contains(&id)
    }

    /// Whether `id`'s status moved.
    #[must_use]
    pub fn has_status_changed(&self, id: PropertyId) -> bool {
        self.status_changed.contains(&id)
    }

    /// Whether a write on `id` was attempted.
    #[must_use]
    pub fn has_value_written(&self, id: PropertyId) -> bool {
        self.value_written.contains(&id)
    }

    /// Whether any of `ids` had its value moved.
    #[must_use]
    pub fn any_value_changed<'a>(&self, ids: impl IntoIterator<Item = &'a PropertyId>) -> bool {
        ids.into_iter().any(|id| self.has_value_changed(*id))
    }

    /// Log-friendly rendering with id-strings resolved through `registry`.
    #[must_use]
    pub fn describe(&self, registry: &PropertyRegistry) -> String {
        let list = |ids: &BTreeSet<PropertyId>| {
            ids.iter().map(|id| registry.id_string(*id)).collect::<Vec<_>>().join(", ")
        };
        let mut lines = Vec::new();
        if !self.status_changed.is_empty() {
            lines.push(format!("Status: [{}]", list(&self.status_changed)));
        }
        if !self.value_changed.is_empty() {
            lines.push(format!("Value: [{}]", list(&self.value_changed)));
        }
        if !self.value_written.is_empty() {
            lines.push(format!("Written: [{}]", list(&self.value_written)));
        }
        lines.push(format!(
            "writeErrors: {}, connectionChanged: {}",
            self.last_write_errors.len(),
            if self.connection_changed { "Y" } else { "N" }
        ));
        lines.join("\n")
    }
}

/// Signals published by a [`PropertyStore`].
#[derive(Debug, Default)]
pub struct StoreSignals {
    /// A property's cached value moved.
    pub value_changed: Signal<PropertyId>,
    /// A property's access status moved.
    pub status_changed: Signal<(PropertyId, AccessStatus)>,
    /// A dependency validator's outcome moved for this property.
    pub validity_changed: Signal<PropertyId>,
    /// A transaction closed.
    pub transaction_finished: Signal<TransactionSummary>,
}

// =============================================================================
// Transaction Lock
// =============================================================================

#[derive(Default)]
struct LockState {
    exclusive_owner: Option<ThreadId>,
    exclusive_depth: usize,
    shared_count: usize,
}

/// Shared/exclusive lock with a timed shared try-acquire and exclusive
/// re-entrancy for the owning thread.
struct TransactionLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl TransactionLock {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    fn shared_blocked_by_other(state: &LockState) -> bool {
        state
            .exclusive_owner
            .is_some_and(|owner| owner != std::thread::current().id())
    }

    fn acquire_shared(&self) {
        let mut state = self.state.lock().expect("transaction lock poisoned");
        while Self::shared_blocked_by_other(&state) {
            state = self.released.wait(state).expect("transaction lock poisoned");
        }
        state.shared_count += 1;
    }

    fn try_acquire_shared(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("transaction lock poisoned");
        while Self::shared_blocked_by_other(&state) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .released
                .wait_timeout(state, deadline - now)
                .expect("transaction lock poisoned");
            state = guard;
        }
        state.shared_count += 1;
        true
    }

    fn acquire_exclusive(&self) {
        let me = std::thread::current().id();
        let mut state = self.state.lock().expect("transaction lock poisoned");
        if state.exclusive_owner == Some(me) {
            state.exclusive_depth += 1;
            return;
        }
        while state.exclusive_owner.is_some() || state.shared_count > 0 {
            state = self.released.wait(state).expect("transaction lock poisoned");
        }
        state.exclusive_owner = Some(me);
        state.exclusive_depth = 1;
    }

    fn release_shared(&self) {
        let mut state = self.state.lock().expect("transaction lock poisoned");
        debug_assert!(state.shared_count > 0);
        state.shared_count -= 1;
        drop(state);
        self.released.notify_all();
    }

    fn release_exclusive(&self) {
        let mut state = self.state.lock().expect("transaction lock poisoned");
        debug_assert_eq!(state.exclusive_owner, Some(std::thread::current().id()));
        state.exclusive_depth -= 1;
        if state.exclusive_depth == 0 {
            state.exclusive_owner = None;
        }
        drop(state);
        self.released.notify_all();
    }
}

// =============================================================================
// Store Internals
// =============================================================================

struct StoreData {
    values: BTreeMap<PropertyId, PropertyValue>,
    adapters: BTreeMap<PropertyId, PropertyAdapter>,
    validators: Vec<Arc<DependencyValidator>>,
    device_type: Option<DeviceType>,
}

/// Read view over the value map; what validator and constraint closures
/// see while the store's data lock is held.
struct DataView<'a> {
    values: &'a BTreeMap<PropertyId, PropertyValue>,
}

impl ValueAccess for DataView<'_> {
    fn value_of(&self, id: PropertyId) -> OptionalResult<Value> {
        self.values.get(&id).and_then(|holder| holder.current().clone())
    }

    fn value_type_of(&self, id: PropertyId) -> Option<ValueType> {
        self.values.get(&id).map(PropertyValue::value_type)
    }
}

#[derive(Default)]
struct Deltas {
    status_changed: BTreeSet<PropertyId>,
    value_changed: BTreeSet<PropertyId>,
    value_written: BTreeSet<PropertyId>,
    last_write_errors: BTreeMap<PropertyId, Error>,
}

enum Event {
    ValueChanged(PropertyId),
    StatusChanged(PropertyId, AccessStatus),
    ValidityChanged(PropertyId),
}

/// Mutation scratchpad: deltas to merge into the transaction, signals to
/// emit after the data lock drops, and the cascade work list.
#[derive(Default)]
struct Changes {
    deltas: Deltas,
    events: Vec<Event>,
    dirty: VecDeque<PropertyId>,
}

impl Changes {
    fn record_value_changed(&mut self, id: PropertyId) {
        self.deltas.value_changed.insert(id);
        self.events.push(Event::ValueChanged(id));
        self.dirty.push_back(id);
    }

    fn record_status_changed(&mut self, id: PropertyId, status: AccessStatus) {
        self.deltas.status_changed.insert(id);
        self.events.push(Event::StatusChanged(id, status));
    }
}

enum QueueCommand {
    Write { id: PropertyId, value: Value },
    Shutdown,
}

struct StoreShared {
    registry: PropertyRegistry,
    mode: StoreMode,
    lock: TransactionLock,
    data: Mutex<StoreData>,
    signals: StoreSignals,
    device: Mutex<Option<Arc<DeviceInterface>>>,
    queue_sender: Mutex<Option<Sender<QueueCommand>>>,
}

impl StoreShared {
    fn is_connection_lost(&self) -> bool {
        self.device
            .lock()
            .expect("device slot poisoned")
            .as_ref()
            .is_some_and(|device| device.is_connection_lost())
    }
}

// =============================================================================
// Store
// =============================================================================

/// How write operations are performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    /// Writes go to the device inline, inside the calling transaction.
    #[default]
    Direct,
    /// Writes are queued and drained by a worker under exclusive
    /// transactions.
    AsyncQueued,
}

/// The property store.
pub struct PropertyStore {
    shared: Arc<StoreShared>,
    worker: Option<JoinHandle<()>>,
}

impl PropertyStore {
    /// Store over a finished registry.
    #[must_use]
    pub fn new(registry: PropertyRegistry, mode: StoreMode) -> Self {
        let shared = Arc::new(StoreShared {
            registry,
            mode,
            lock: TransactionLock::new(),
            data: Mutex::new(StoreData {
                values: BTreeMap::new(),
                adapters: BTreeMap::new(),
                validators: Vec::new(),
                device_type: None,
            }),
            signals: StoreSignals::default(),
            device: Mutex::new(None),
            queue_sender: Mutex::new(None),
        });

        let worker = match mode {
            StoreMode::Direct => None,
            StoreMode::AsyncQueued => {
                let (sender, receiver) = crossbeam::channel::unbounded();
                *shared.queue_sender.lock().expect("queue sender poisoned") = Some(sender);
                let weak = Arc::downgrade(&shared);
                Some(
                    std::thread::Builder::new()
                        .name("property-write-queue".into())
                        .spawn(move || write_queue_worker(&weak, &receiver))
                        .expect("failed to spawn write-queue worker"),
                )
            }
        };

        Self { shared, worker }
    }

    /// The id registry this store was built over.
    #[must_use]
    pub fn registry(&self) -> &PropertyRegistry {
        &self.shared.registry
    }

    /// The signal set to subscribe to.
    #[must_use]
    pub fn signals(&self) -> &StoreSignals {
        &self.shared.signals
    }

    /// The configured write mode.
    #[must_use]
    pub fn mode(&self) -> StoreMode {
        self.shared.mode
    }

    /// Install a property's value holder (store construction phase).
    pub fn add_property(&self, value: PropertyValue) {
        let mut data = self.shared.data.lock().expect("store data poisoned");
        let id = value.id();
        let previous = data.values.insert(id, value);
        debug_assert!(previous.is_none(), "property value already installed");
    }

    /// Install a property's adapter; its dependency validators join the
    /// store's re-evaluation list.
    pub fn add_adapter(&self, adapter: PropertyAdapter) {
        let mut data = self.shared.data.lock().expect("store data poisoned");
        for validator in adapter.validators() {
            let already_known = data
                .validators
                .iter()
                .any(|known| Arc::ptr_eq(known, validator));
            if !already_known {
                data.validators.push(Arc::clone(validator));
            }
        }
        let id = adapter.id();
        let previous = data.adapters.insert(id, adapter);
        debug_assert!(previous.is_none(), "adapter already installed");
    }

    /// Attach (or detach) the device interface used by touches and writes.
    pub fn attach_device(&self, device: Option<Arc<DeviceInterface>>) {
        *self.shared.device.lock().expect("device slot poisoned") = device;
    }

    /// The attached device interface, if any.
    #[must_use]
    pub fn device(&self) -> Option<Arc<DeviceInterface>> {
        self.shared.device.lock().expect("device slot poisoned").clone()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open a shared transaction, blocking behind an exclusive holder.
    #[must_use]
    pub fn create_transaction(&self) -> Transaction<'_> {
        self.shared.lock.acquire_shared();
        Transaction::new(&self.shared, TransactionMode::Shared)
    }

    /// Try to open a shared transaction within `timeout`; `None` when an
    /// exclusive holder on another thread does not release in time.
    #[must_use]
    pub fn try_create_transaction(&self, timeout: Duration) -> Option<Transaction<'_>> {
        if !self.shared.lock.try_acquire_shared(timeout) {
            return None;
        }
        Some(Transaction::new(&self.shared, TransactionMode::Shared))
    }

    /// Open an exclusive transaction. Re-entrant on the owning thread.
    #[must_use]
    pub fn create_exclusive_transaction(&self) -> Transaction<'_> {
        self.shared.lock.acquire_exclusive();
        Transaction::new(&self.shared, TransactionMode::Exclusive)
    }
}

impl Drop for PropertyStore {
    fn drop(&mut self) {
        let sender = self.shared.queue_sender.lock().expect("queue sender poisoned").take();
        if let Some(sender) = sender {
            let _ = sender.send(QueueCommand::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("mode", &self.shared.mode)
            .field("registry", &self.shared.registry)
            .finish_non_exhaustive()
    }
}

fn write_queue_worker(shared: &Weak<StoreShared>, receiver: &Receiver<QueueCommand>) {
    while let Ok(command) = receiver.recv() {
        let QueueCommand::Write { id, value } = command else {
            break;
        };

        let Some(shared) = shared.upgrade() else {
            break;
        };

        // Drain whatever else is already queued into the same exclusive
        // transaction, preserving FIFO order.
        let mut batch = vec![(id, value)];
        let mut shutdown = false;
        loop {
            match receiver.try_recv() {
                Ok(QueueCommand::Write { id, value }) => batch.push((id, value)),
                Ok(QueueCommand::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        {
            shared.lock.acquire_exclusive();
            let transaction = Transaction::new(&shared, TransactionMode::Exclusive);
            for (id, value) in batch {
                if let Err(err) = transaction.write_value_direct(id, value) {
                    log::warn!(
                        "queued write failed for {}: {}",
                        shared.registry.id_string(id),
                        err.to_detailed_string()
                    );
                }
            }
        }

        if shutdown {
            break;
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Lock flavor of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Shared holder.
    Shared,
    /// Exclusive holder.
    Exclusive,
}

/// A scoped handle pinning the store for one logical operation.
///
/// Dropping the transaction releases the lock and publishes the summary.
/// The handle is thread-bound (the lock tracks its owning thread) and
/// must not outlive the store - both enforced by the type.
pub struct Transaction<'store> {
    shared: &'store Arc<StoreShared>,
    mode: TransactionMode,
    deltas: Mutex<Deltas>,
    connection_lost_at_open: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'store> Transaction<'store> {
    fn new(shared: &'store Arc<StoreShared>, mode: TransactionMode) -> Self {
        Self {
            shared,
            mode,
            deltas: Mutex::new(Deltas::default()),
            connection_lost_at_open: shared.is_connection_lost(),
            _not_send: PhantomData,
        }
    }

    /// This transaction's lock flavor.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Whether this is an exclusive transaction.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.mode == TransactionMode::Exclusive
    }

    /// The current device type.
    #[must_use]
    pub fn device_type(&self) -> Option<DeviceType> {
        self.shared.data.lock().expect("store data poisoned").device_type
    }

    /// Property ids whose values changed so far in this transaction.
    #[must_use]
    pub fn properties_changed(&self) -> BTreeSet<PropertyId> {
        self.deltas.lock().expect("deltas poisoned").value_changed.clone()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Typed value of a property; `None` when absent or on tag mismatch.
    #[must_use]
    pub fn get<T: Scalar>(&self, id: PropertyId) -> OptionalResult<T> {
        match self.get_value(id)? {
            Ok(value) => {
                let typed = T::from_value(&value);
                debug_assert!(typed.is_some(), "property value of different type requested");
                typed.map(Ok)
            }
            Err(err) => Some(Err(err)),
        }
    }

    /// Untyped three-state value of a property.
    #[must_use]
    pub fn get_value(&self, id: PropertyId) -> OptionalResult<Value> {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.values.get(&id).and_then(|holder| holder.current().clone())
    }

    /// Whether a value result (success or failure) is present.
    #[must_use]
    pub fn has_value_result(&self, id: PropertyId) -> bool {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.values.get(&id).is_some_and(PropertyValue::has_value_result)
    }

    /// Ok unless the stored state is a read failure.
    pub fn property_validation_result(&self, id: PropertyId) -> Result<()> {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.values
            .get(&id)
            .map_or(Ok(()), PropertyValue::validation_result)
    }

    /// Rendered current value (empty when absent or failed).
    #[must_use]
    pub fn value_as_string(&self, id: PropertyId) -> String {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.values.get(&id).map(PropertyValue::value_as_string).unwrap_or_default()
    }

    /// Render a candidate value with the property's formatter.
    #[must_use]
    pub fn convert_to_string<T: Scalar>(&self, id: PropertyId, value: T) -> String {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.values
            .get(&id)
            .map(|holder| holder.convert_to_string(&value.into_value()))
            .unwrap_or_default()
    }

    /// Validate a candidate against the property's kind and custom
    /// validator.
    pub fn validate_value<T: Scalar>(&self, id: PropertyId, value: T) -> Result<()> {
        let data = self.shared.data.lock().expect("store data poisoned");
        let Some(holder) = data.values.get(&id) else {
            return Err(Error::with_detail("Unknown property!", format!("handle {}", id.index())));
        };
        holder.validate_value(&value.into_value())
    }

    /// `[min, max]` of an arithmetic property.
    #[must_use]
    pub fn min_max<T: Scalar>(&self, id: PropertyId) -> Option<(T, T)> {
        let data = self.shared.data.lock().expect("store data poisoned");
        let (min, max) = data.values.get(&id)?.min_max()?;
        Some((T::from_value(&min)?, T::from_value(&max)?))
    }

    /// Raw-value→name map of an enumerated property.
    #[must_use]
    pub fn enum_names(&self, id: PropertyId) -> Option<BTreeMap<u32, String>> {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.values.get(&id)?.enum_names().cloned()
    }

    /// Current access status of a property (Disabled when it has no
    /// adapter).
    #[must_use]
    pub fn status(&self, id: PropertyId) -> AccessStatus {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.adapters.get(&id).map(PropertyAdapter::status).unwrap_or_default()
    }

    /// Whether the property is currently readable.
    #[must_use]
    pub fn is_readable(&self, id: PropertyId) -> bool {
        self.status(id).is_readable()
    }

    /// Whether the property is currently writable.
    #[must_use]
    pub fn is_writable(&self, id: PropertyId) -> bool {
        self.status(id).is_writable()
    }

    /// The not-OK outcomes among the property's dependency validators.
    #[must_use]
    pub fn dependency_validation_results(&self, id: PropertyId) -> Vec<RankedValidation> {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.adapters
            .get(&id)
            .map(PropertyAdapter::value_dependency_validation_results)
            .unwrap_or_default()
    }

    /// Other properties involved in the property's validators.
    #[must_use]
    pub fn validation_dependency_ids(&self, id: PropertyId) -> BTreeSet<PropertyId> {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.adapters
            .get(&id)
            .map(|adapter| adapter.validation_dependency_ids().clone())
            .unwrap_or_default()
    }

    /// Outcome of the property's most recent write attempt.
    pub fn last_write_result(&self, id: PropertyId) -> Result<()> {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.adapters
            .get(&id)
            .map_or(Ok(()), |adapter| adapter.last_write_result().clone())
    }

    /// Probe the property's validators with `candidate` substituted for
    /// its current value; worst outcome wins.
    #[must_use]
    pub fn validate_what_if<T: Scalar>(&self, id: PropertyId, candidate: T) -> RankedValidation {
        let data = self.shared.data.lock().expect("store data poisoned");
        let Some(adapter) = data.adapters.get(&id) else {
            return RankedValidation::ok();
        };
        let view = DataView { values: &data.values };
        let candidate = candidate.into_value();
        adapter
            .validators()
            .iter()
            .filter(|validator| validator.concerns(id))
            .map(|validator| validator.validate_what_if(id, candidate.clone(), &view))
            .fold(RankedValidation::ok(), RankedValidation::worst)
    }

    // =========================================================================
    // Device Type
    // =========================================================================

    /// Switch the device type and recompute every adapter's status.
    pub fn set_device_type(&self, device_type: Option<DeviceType>) {
        self.mutate(|data, changes| {
            data.device_type = device_type;
            let ids: Vec<PropertyId> = data.adapters.keys().copied().collect();
            for id in ids {
                Self::refresh_adapter_status(data, id, changes, |adapter| {
                    adapter.update_status_for_device(device_type);
                });
            }
        });
    }

    // =========================================================================
    // Touch / Refresh / Invalidate
    // =========================================================================

    /// Ensure a readable property's value is present, reading it from the
    /// device if absent.
    pub fn touch(&self, id: PropertyId) -> Result<()> {
        enum Plan {
            Nothing,
            ReadMemory(crate::memory::AddressRange),
            Derive,
        }

        let plan = {
            let data = self.shared.data.lock().expect("store data poisoned");
            let Some(holder) = data.values.get(&id) else {
                return Err(Error::with_detail("Unknown property!", format!("handle {}", id.index())));
            };
            if holder.has_value_result() {
                Plan::Nothing
            } else {
                match data.adapters.get(&id) {
                    Some(adapter) if adapter.status().is_readable() => match adapter.binding() {
                        AdapterBinding::Memory { range, .. } => Plan::ReadMemory(*range),
                        AdapterBinding::Derived { .. } => Plan::Derive,
                    },
                    _ => Plan::Nothing,
                }
            }
        };

        match plan {
            Plan::Nothing => Ok(()),
            Plan::Derive => {
                self.mutate(|data, changes| {
                    Self::recompute_derived(data, id, changes);
                });
                Ok(())
            }
            Plan::ReadMemory(range) => {
                let Some(device) = self.shared.device.lock().expect("device slot poisoned").clone()
                else {
                    return Err(Error::tagged(
                        "Read error!",
                        "no device attached",
                        ErrorKind::NoConnection,
                    ));
                };

                // Device I/O happens outside the data lock; decoding happens
                // back under it.
                let bytes = device.read_range(&range, &ProgressTask::none());
                self.mutate(|data, changes| {
                    let new_state = match &bytes {
                        Ok(bytes) => Some(data.adapters[&id].decode_bytes(bytes)),
                        Err(err) => Some(Err(err.clone())),
                    };
                    Self::apply_value_state(data, id, new_state, changes);
                });
                bytes.map(|_| ())
            }
        }
    }

    /// Drop the cached value and read it again.
    pub fn refresh(&self, id: PropertyId) -> Result<()> {
        self.invalidate(id);
        self.touch(id)
    }

    /// Drop the cached value.
    pub fn invalidate(&self, id: PropertyId) {
        self.mutate(|data, changes| {
            Self::apply_value_state(data, id, None, changes);
        });
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a typed value through the property's adapter.
    ///
    /// Validates locally first; in [`StoreMode::AsyncQueued`] the write is
    /// enqueued and the result surfaces in the drain transaction's
    /// summary instead.
    pub fn set<T: Scalar>(&self, id: PropertyId, value: T) -> Result<()> {
        let value = value.into_value();

        {
            let data = self.shared.data.lock().expect("store data poisoned");
            let Some(holder) = data.values.get(&id) else {
                return Err(Error::with_detail("Unknown property!", format!("handle {}", id.index())));
            };
            holder.validate_value(&value)?;

            let Some(adapter) = data.adapters.get(&id) else {
                return Err(Error::with_detail("Write error!", "property has no adapter"));
            };
            if !adapter.status().is_writable() {
                return Err(Error::with_detail("Write error!", "property is not writable"));
            }
        }

        if self.shared.mode == StoreMode::AsyncQueued {
            let sender = self.shared.queue_sender.lock().expect("queue sender poisoned").clone();
            let Some(sender) = sender else {
                return Err(Error::with_detail("Write error!", "write queue is shut down"));
            };
            sender
                .send(QueueCommand::Write { id, value })
                .map_err(|_| Error::with_detail("Write error!", "write queue is shut down"))?;
            return Ok(());
        }

        self.write_value_direct(id, value)
    }

    /// Perform one device write inline and record its outcome.
    fn write_value_direct(&self, id: PropertyId, value: Value) -> Result<()> {
        let encoded = {
            let data = self.shared.data.lock().expect("store data poisoned");
            let Some(adapter) = data.adapters.get(&id) else {
                return Err(Error::with_detail("Write error!", "property has no adapter"));
            };
            if !adapter.status().is_writable() {
                return Err(Error::with_detail("Write error!", "property is not writable"));
            }
            adapter
                .encode_value(&value)
                .map(|bytes| (bytes, adapter.memory_range()))
        };

        let write_result = match encoded {
            Ok((bytes, Some(range))) => {
                let device = self.shared.device.lock().expect("device slot poisoned").clone();
                match device {
                    Some(device) => device.write(&bytes, range.first(), &ProgressTask::none()),
                    None => Err(Error::tagged(
                        "Write error!",
                        "no device attached",
                        ErrorKind::NoConnection,
                    )),
                }
            }
            Ok((_, None)) => Err(Error::with_detail("Write error!", "property has no memory range")),
            Err(err) => Err(err),
        };

        self.mutate(|data, changes| {
            if let Some(adapter) = data.adapters.get_mut(&id) {
                adapter.set_last_write_result(write_result.clone());
            }
            changes.deltas.value_written.insert(id);
            match &write_result {
                Ok(()) => {
                    Self::apply_value_state(data, id, Some(Ok(value.clone())), changes);
                }
                Err(err) => {
                    changes.deltas.last_write_errors.insert(id, err.clone());
                }
            }
        });

        write_result
    }

    // =========================================================================
    // Mutation Engine
    // =========================================================================

    /// Run a mutation under the data lock, cascade its consequences, then
    /// merge deltas and emit signals outside the lock.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreData, &mut Changes) -> R) -> R {
        let mut changes = Changes::default();
        let result = {
            let mut data = self.shared.data.lock().expect("store data poisoned");
            let result = f(&mut data, &mut changes);
            Self::cascade(&mut data, &mut changes);
            result
        };

        {
            let mut deltas = self.deltas.lock().expect("deltas poisoned");
            deltas.status_changed.extend(changes.deltas.status_changed.iter().copied());
            deltas.value_changed.extend(changes.deltas.value_changed.iter().copied());
            deltas.value_written.extend(changes.deltas.value_written.iter().copied());
            deltas.last_write_errors.extend(
                changes
                    .deltas
                    .last_write_errors
                    .iter()
                    .map(|(id, err)| (*id, err.clone())),
            );
        }

        for event in &changes.events {
            match event {
                Event::ValueChanged(id) => self.shared.signals.value_changed.emit(id),
                Event::StatusChanged(id, status) => {
                    self.shared.signals.status_changed.emit(&(*id, *status));
                }
                Event::ValidityChanged(id) => self.shared.signals.validity_changed.emit(id),
            }
        }

        result
    }

    /// Set one holder's state and record the change.
    fn apply_value_state(
        data: &mut StoreData,
        id: PropertyId,
        new_state: OptionalResult<Value>,
        changes: &mut Changes,
    ) {
        if let Some(holder) = data.values.get_mut(&id)
            && holder.set_current(new_state)
        {
            changes.record_value_changed(id);
        }
    }

    /// Process the dirty queue: validators re-evaluate, derived properties
    /// recompute, value-constrained statuses move.
    fn cascade(data: &mut StoreData, changes: &mut Changes) {
        while let Some(changed_id) = changes.dirty.pop_front() {
            // Dependency validators concerned by the change.
            let validators: Vec<Arc<DependencyValidator>> = data
                .validators
                .iter()
                .filter(|validator| validator.concerns(changed_id))
                .cloned()
                .collect();
            for validator in validators {
                let view = DataView { values: &data.values };
                if validator.reevaluate(&view).is_some() {
                    for member in validator.property_ids() {
                        changes.events.push(Event::ValidityChanged(*member));
                    }
                }
            }

            // Derived (subsidiary) properties sourcing the changed value.
            let derived_ids: Vec<PropertyId> = data
                .adapters
                .values()
                .filter(|adapter| adapter.source_property_ids().contains(&changed_id))
                .map(PropertyAdapter::id)
                .collect();
            for derived_id in derived_ids {
                Self::recompute_derived(data, derived_id, changes);
            }

            // Adapters whose status is constrained by the changed value.
            let constrained_ids: Vec<PropertyId> = data
                .adapters
                .values()
                .filter(|adapter| adapter.constraint_ids().contains(&changed_id))
                .map(PropertyAdapter::id)
                .collect();
            for constrained_id in constrained_ids {
                Self::refresh_adapter_status(data, constrained_id, changes, |_| {});
            }
        }
    }

    fn recompute_derived(data: &mut StoreData, id: PropertyId, changes: &mut Changes) {
        let StoreData { values, adapters, .. } = &mut *data;
        let new_state = {
            let view = DataView { values };
            adapters.get(&id).map(|adapter| adapter.derive_value(&view))
        };
        if let Some(new_state) = new_state {
            Self::apply_value_state(data, id, new_state, changes);
        }
    }

    /// Recompute one adapter's combined status, resetting the value when
    /// the property stops being readable.
    fn refresh_adapter_status(
        data: &mut StoreData,
        id: PropertyId,
        changes: &mut Changes,
        prepare: impl FnOnce(&mut PropertyAdapter),
    ) {
        let StoreData { values, adapters, .. } = &mut *data;
        let Some(adapter) = adapters.get_mut(&id) else {
            return;
        };
        prepare(adapter);
        let view = DataView { values };
        let Some(new_status) = adapter.recompute_status(&view) else {
            return;
        };

        changes.record_status_changed(id, new_status);
        if !new_status.is_readable() {
            Self::apply_value_state(data, id, None, changes);
        }
    }
}

impl ValueAccess for Transaction<'_> {
    fn value_of(&self, id: PropertyId) -> OptionalResult<Value> {
        self.get_value(id)
    }

    fn value_type_of(&self, id: PropertyId) -> Option<ValueType> {
        let data = self.shared.data.lock().expect("store data poisoned");
        data.values.get(&id).map(PropertyValue::value_type)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let deltas = std::mem::take(&mut *self.deltas.lock().expect("deltas poisoned"));
        let connection_changed = self.connection_lost_at_open != self.shared.is_connection_lost();

        match self.mode {
            TransactionMode::Shared => self.shared.lock.release_shared(),
            TransactionMode::Exclusive => self.shared.lock.release_exclusive(),
        }

        let summary = TransactionSummary {
            status_changed: deltas.status_changed,
            value_changed: deltas.value_changed,
            value_written: deltas.value_written,
            last_write_errors: deltas.last_write_errors,
            connection_changed,
        };
        self.shared.signals.transaction_finished.emit(&summary);
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("mode", &self.mode).finish_non_exhaustive()
    }
}
