//! Transactional Property Model
//!
//! The top layer of the core: device state exposed as typed properties.
//!
//! - [`id`]: dense property handles and device-type handles, owned by a
//!   per-store registry.
//! - [`value`]: typed value holders with kind strategies (plain,
//!   arithmetic-ranged, enumerated) over a closed [`value::Value`] set.
//! - [`validator`]: ranked cross-property dependency validation with
//!   what-if probing.
//! - [`adapter`]: binds a property to a device memory range (or derives it
//!   from other properties), with per-device-type access status.
//! - [`store`]: the property store, shared/exclusive transactions, change
//!   capture and the async write queue.

pub mod adapter;
pub mod id;
pub mod store;
pub mod validator;
pub mod value;

pub use adapter::{AccessStatus, AdapterBinding, PropertyAdapter};
pub use id::{DeviceType, PropertyId, PropertyRegistry};
pub use store::{PropertyStore, StoreMode, StoreSignals, Transaction, TransactionSummary};
pub use validator::{DependencyValidator, RankedValidation, ValidationRank, ValueAccess};
pub use value::{PropertyValue, Scalar, Value, ValueKind, ValueType};
