//! WTC640 Control Core
//!
//! Host-side device controller for WTC640-class thermal-imaging camera
//! cores. The crate speaks the proprietary TCSI request/response protocol
//! over an abstract byte channel, addresses the enumerated device memory
//! space (registers, SRAM-backed settings, flash sectors, palette banks,
//! dead-pixel tables), and exposes that memory as a transactional property
//! model with typed values, dependency validation and access arbitration
//! between a video-reader thread and control threads.
//!
//! # Architecture
//!
//! The crate is organized as a layered stack, leaves first:
//!
//! 1. **Data link** ([`link`]): blocking byte-channel contract implemented
//!    by concrete transports (serial UART, vendor GigE/USB bulk) outside
//!    this crate.
//! 2. **Protocol** ([`protocol`]): the TCSI frame codec and the
//!    single-in-flight request/response engine with stale-response resync
//!    and connection-liveness accounting.
//! 3. **Device interface** ([`device`]): alignment and segmentation over
//!    the memory-space map ([`memory`]), transient-error retry windows,
//!    busy back-off, sector-aware flash burst writes and STATUS
//!    accumulation.
//! 4. **Properties** ([`properties`]): typed property values, adapters
//!    binding them to memory ranges, ranked dependency validation and the
//!    shared/exclusive transaction manager.
//!
//! Progress reporting and cooperative cancellation ([`progress`]) thread
//! through layers 3 and 4. The WTC640 device tables live in [`wtc640`].
//!
//! # Concurrency model
//!
//! Preemptive OS threads with blocking I/O; there is no async runtime.
//! The protocol engine serializes exchanges, the device interface guards
//! flash with a reader/writer lock, and the property store arbitrates
//! through shared/exclusive transactions. Cancellation is cooperative:
//! workers poll a progress task's cancel flag at packet boundaries.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wtc_core::properties::StoreMode;
//! use wtc_core::protocol::ProtocolTcsi;
//! use wtc_core::protocol::stats::StatsRecorder;
//! use wtc_core::wtc640;
//!
//! // The transport comes from outside the core.
//! let uart: Arc<dyn wtc_core::link::DataLink> = open_serial_port("/dev/ttyUSB0")?;
//!
//! let engine = Arc::new(ProtocolTcsi::new(Arc::new(StatsRecorder::new())));
//! engine.set_data_link(Some(uart));
//!
//! let properties = wtc640::create_store(StoreMode::Direct);
//! properties.store.attach_device(Some(Arc::new(wtc640::create_device(engine))));
//! {
//!     let transaction = properties.store.create_exclusive_transaction();
//!     transaction.set_device_type(Some(properties.device_type));
//! }
//!
//! // Control thread: coordinated reconfiguration under an exclusive lock.
//! {
//!     let transaction = properties.store.create_exclusive_transaction();
//!     transaction.set(properties.ids.palette_index_current, 3u32)?;
//! }
//!
//! // Video thread: never starves behind an exclusive holder.
//! if let Some(transaction) = properties.store.try_create_transaction(Duration::from_millis(1)) {
//!     transaction.touch(properties.ids.shutter_temperature)?;
//! }
//! ```

// =============================================================================
// Modules
// =============================================================================

pub mod constants;
pub mod device;
pub mod link;
pub mod memory;
pub mod progress;
pub mod properties;
pub mod protocol;
pub mod result;
pub mod signal;
pub mod timer;
pub mod wtc640;

// Test utilities (only available during testing)
#[cfg(test)]
pub mod test_utils;

// =============================================================================
// Re-exports
// =============================================================================

pub use device::{DeviceEndianness, DeviceInterface, Word};
pub use link::{Baudrate, DataLink, DataLinkBaudrate};
pub use memory::{AddressRange, MemoryDescriptor, MemoryKind, MemorySpace};
pub use progress::{CancelToken, ProgressController, ProgressNotifier, ProgressTask, ResultWatcher};
pub use properties::{
    AccessStatus, DependencyValidator, DeviceType, PropertyAdapter, PropertyId, PropertyRegistry,
    PropertyStore, PropertyValue, RankedValidation, StoreMode, Transaction, TransactionSummary,
    Value, ValueType,
};
pub use protocol::{Packet, ProtocolTcsi, Stats, StatsRecorder};
pub use result::{Error, ErrorKind, OptionalResult, Result};
