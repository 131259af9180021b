//! Property Adapters
//!
//! An adapter binds one property to the outside world: usually a device
//! memory range with an endian-aware codec, sometimes a value derived
//! from other properties (a "subsidiary", e.g. one 16-bit half of a
//! packed register). It also carries the access policy:
//!
//! - a per-device-type status function (which device models expose the
//!   property, and how);
//! - an optional constraint over other property values that can downgrade
//!   the status but never upgrade it;
//! - the dependency validators the property participates in;
//! - the outcome of the last write attempt.
//!
//! The store owns the adapters and drives status recomputation, touch,
//! refresh and writes; the adapter holds the policy and the codec.

use crate::memory::AddressRange;
use crate::properties::id::{DeviceType, PropertyId};
use crate::properties::validator::{DependencyValidator, RankedValidation, ValueAccess};
use crate::properties::value::Value;
use crate::result::{Error, OptionalResult, Result};

use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Access Status
// =============================================================================

/// How a property may be accessed in the current device/value state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessStatus {
    /// Not available at all
    #[default]
    Disabled,
    /// Value can be read, never written
    ReadOnly,
    /// Value can be written, never read back (trigger-style registers)
    WriteOnly,
    /// Full access
    ReadWrite,
}

impl AccessStatus {
    /// Whether reads are allowed.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, AccessStatus::ReadOnly | AccessStatus::ReadWrite)
    }

    /// Whether writes are allowed.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, AccessStatus::WriteOnly | AccessStatus::ReadWrite)
    }

    /// Combine the device-side status with a value-constraint status.
    ///
    /// The constraint can only take capabilities away: a side the
    /// constraint blocks is removed, and a constraint allowing nothing
    /// disables the property outright.
    #[must_use]
    pub fn constrained_by(self, constraint: AccessStatus) -> AccessStatus {
        if !constraint.is_readable() && !constraint.is_writable() {
            return AccessStatus::Disabled;
        }
        match self {
            AccessStatus::Disabled => AccessStatus::Disabled,
            AccessStatus::ReadOnly => {
                if constraint.is_readable() {
                    AccessStatus::ReadOnly
                } else {
                    AccessStatus::Disabled
                }
            }
            AccessStatus::WriteOnly => {
                if constraint.is_writable() {
                    AccessStatus::WriteOnly
                } else {
                    AccessStatus::Disabled
                }
            }
            AccessStatus::ReadWrite => {
                if !constraint.is_readable() {
                    AccessStatus::WriteOnly
                } else if !constraint.is_writable() {
                    AccessStatus::ReadOnly
                } else {
                    AccessStatus::ReadWrite
                }
            }
        }
    }
}

// =============================================================================
// Bindings
// =============================================================================

/// Decodes device bytes into a property value.
pub type DecodeFn = Box<dyn Fn(&[u8]) -> Result<Value> + Send + Sync>;
/// Encodes a property value into device bytes.
pub type EncodeFn = Box<dyn Fn(&Value) -> Result<Vec<u8>> + Send + Sync>;
/// Computes a derived value from other properties.
pub type DeriveFn = Box<dyn Fn(&dyn ValueAccess) -> OptionalResult<Value> + Send + Sync>;
/// Maps the current device type to an access status.
pub type StatusForDeviceFn = Box<dyn Fn(Option<DeviceType>) -> AccessStatus + Send + Sync>;
/// Downgrades the status based on other property values.
pub type StatusConstraintFn = Box<dyn Fn(&dyn ValueAccess) -> AccessStatus + Send + Sync>;

/// What an adapter is bound to.
pub enum AdapterBinding {
    /// A device memory range with a byte codec.
    Memory {
        /// Addresses backing the property.
        range: AddressRange,
        /// Bytes → value.
        decode: DecodeFn,
        /// Value → bytes.
        encode: EncodeFn,
    },
    /// A value computed from other properties (read-only projection).
    Derived {
        /// Properties the derivation reads.
        sources: BTreeSet<PropertyId>,
        /// The derivation itself; `None` leaves the value absent.
        derive: DeriveFn,
    },
}

impl std::fmt::Debug for AdapterBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterBinding::Memory { range, .. } => {
                f.debug_struct("Memory").field("range", range).finish_non_exhaustive()
            }
            AdapterBinding::Derived { sources, .. } => {
                f.debug_struct("Derived").field("sources", sources).finish_non_exhaustive()
            }
        }
    }
}

// =============================================================================
// Property Adapter
// =============================================================================

/// Policy and codec binding one property to the device.
pub struct PropertyAdapter {
    id: PropertyId,
    binding: AdapterBinding,
    status_for_device_fn: StatusForDeviceFn,
    status_for_device: AccessStatus,
    constraint_fn: Option<StatusConstraintFn>,
    constraint_ids: BTreeSet<PropertyId>,
    status: AccessStatus,
    validators: Vec<Arc<DependencyValidator>>,
    validation_dependency_ids: BTreeSet<PropertyId>,
    subsidiary_ids: BTreeSet<PropertyId>,
    last_write_result: Result<()>,
}

impl PropertyAdapter {
    /// Adapter bound to a device memory range.
    #[must_use]
    pub fn memory(
        id: PropertyId,
        range: AddressRange,
        decode: impl Fn(&[u8]) -> Result<Value> + Send + Sync + 'static,
        encode: impl Fn(&Value) -> Result<Vec<u8>> + Send + Sync + 'static,
        status_for_device: impl Fn(Option<DeviceType>) -> AccessStatus + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            id,
            AdapterBinding::Memory {
                range,
                decode: Box::new(decode),
                encode: Box::new(encode),
            },
            Box::new(status_for_device),
        )
    }

    /// Adapter publishing a value derived from other properties.
    #[must_use]
    pub fn derived(
        id: PropertyId,
        sources: BTreeSet<PropertyId>,
        derive: impl Fn(&dyn ValueAccess) -> OptionalResult<Value> + Send + Sync + 'static,
        status_for_device: impl Fn(Option<DeviceType>) -> AccessStatus + Send + Sync + 'static,
    ) -> Self {
        debug_assert!(!sources.is_empty(), "derived adapter without sources");
        Self::new(
            id,
            AdapterBinding::Derived {
                sources,
                derive: Box::new(derive),
            },
            Box::new(status_for_device),
        )
    }

    fn new(id: PropertyId, binding: AdapterBinding, status_for_device_fn: StatusForDeviceFn) -> Self {
        Self {
            id,
            binding,
            status_for_device_fn,
            status_for_device: AccessStatus::Disabled,
            constraint_fn: None,
            constraint_ids: BTreeSet::new(),
            status: AccessStatus::Disabled,
            validators: Vec::new(),
            validation_dependency_ids: BTreeSet::new(),
            subsidiary_ids: BTreeSet::new(),
            last_write_result: Ok(()),
        }
    }

    /// Attach a value constraint; `constraint_ids` are the properties
    /// whose changes require recomputing the status.
    #[must_use]
    pub fn with_status_constraint(
        mut self,
        constraint_ids: BTreeSet<PropertyId>,
        constraint: impl Fn(&dyn ValueAccess) -> AccessStatus + Send + Sync + 'static,
    ) -> Self {
        debug_assert!(self.constraint_fn.is_none(), "constraint already set");
        self.constraint_fn = Some(Box::new(constraint));
        self.constraint_ids = constraint_ids;
        self
    }

    /// Attach a dependency validator the property participates in.
    #[must_use]
    pub fn with_dependency_validator(mut self, validator: Arc<DependencyValidator>) -> Self {
        debug_assert!(validator.concerns(self.id), "validator does not involve this property");
        for other in validator.property_ids() {
            if *other != self.id {
                self.validation_dependency_ids.insert(*other);
            }
        }
        self.validators.push(validator);
        self
    }

    /// Declare a subsidiary property published from this adapter's value.
    #[must_use]
    pub fn with_subsidiary(mut self, id: PropertyId) -> Self {
        let inserted = self.subsidiary_ids.insert(id);
        debug_assert!(inserted, "duplicate subsidiary");
        self
    }

    // =========================================================================
    // Identity and Binding
    // =========================================================================

    /// The bound property.
    #[must_use]
    pub fn id(&self) -> PropertyId {
        self.id
    }

    /// The binding (memory or derived).
    #[must_use]
    pub fn binding(&self) -> &AdapterBinding {
        &self.binding
    }

    /// The backing memory range, for memory bindings.
    #[must_use]
    pub fn memory_range(&self) -> Option<AddressRange> {
        match &self.binding {
            AdapterBinding::Memory { range, .. } => Some(*range),
            AdapterBinding::Derived { .. } => None,
        }
    }

    /// Device address ranges backing this property (for caching and
    /// prefetch planning).
    #[must_use]
    pub fn address_ranges(&self) -> Vec<AddressRange> {
        self.memory_range().into_iter().collect()
    }

    /// Properties a derived binding reads from.
    #[must_use]
    pub fn source_property_ids(&self) -> BTreeSet<PropertyId> {
        match &self.binding {
            AdapterBinding::Memory { .. } => BTreeSet::new(),
            AdapterBinding::Derived { sources, .. } => sources.clone(),
        }
    }

    /// Decode device bytes through the memory binding.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Value> {
        match &self.binding {
            AdapterBinding::Memory { decode, .. } => decode(bytes),
            AdapterBinding::Derived { .. } => Err(Error::with_detail(
                "Read error!",
                "derived property has no byte representation",
            )),
        }
    }

    /// Encode a value through the memory binding.
    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        match &self.binding {
            AdapterBinding::Memory { encode, .. } => encode(value),
            AdapterBinding::Derived { .. } => Err(Error::with_detail(
                "Write error!",
                "derived property is read-only",
            )),
        }
    }

    /// Compute a derived binding's value over a view.
    #[must_use]
    pub fn derive_value(&self, access: &dyn ValueAccess) -> OptionalResult<Value> {
        match &self.binding {
            AdapterBinding::Memory { .. } => None,
            AdapterBinding::Derived { derive, .. } => derive(access),
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Current combined access status.
    #[must_use]
    pub fn status(&self) -> AccessStatus {
        self.status
    }

    /// Whether the property is active (not disabled) for a device type,
    /// regardless of value constraints.
    #[must_use]
    pub fn is_active_for_device(&self, device_type: Option<DeviceType>) -> bool {
        (self.status_for_device_fn)(device_type) != AccessStatus::Disabled
    }

    /// Recompute the device-side status for a (possibly changed) device
    /// type.
    pub fn update_status_for_device(&mut self, device_type: Option<DeviceType>) {
        self.status_for_device = (self.status_for_device_fn)(device_type);
    }

    /// Recompute the combined status over the current values. Returns the
    /// new status when it changed; the caller resets the value if the new
    /// status is not readable and broadcasts the change.
    #[must_use]
    pub fn recompute_status(&mut self, access: &dyn ValueAccess) -> Option<AccessStatus> {
        let mut new_status = self.status_for_device;
        if let Some(constraint) = &self.constraint_fn {
            new_status = new_status.constrained_by(constraint(access));
        }

        if new_status == self.status {
            return None;
        }
        self.status = new_status;
        Some(new_status)
    }

    /// Properties whose value changes can move this adapter's status.
    #[must_use]
    pub fn constraint_ids(&self) -> &BTreeSet<PropertyId> {
        &self.constraint_ids
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validators this property participates in.
    #[must_use]
    pub fn validators(&self) -> &[Arc<DependencyValidator>] {
        &self.validators
    }

    /// Union of the other properties involved in this property's
    /// validators.
    #[must_use]
    pub fn validation_dependency_ids(&self) -> &BTreeSet<PropertyId> {
        &self.validation_dependency_ids
    }

    /// The not-OK outcomes among this property's validators.
    #[must_use]
    pub fn value_dependency_validation_results(&self) -> Vec<RankedValidation> {
        self.validators
            .iter()
            .map(|validator| validator.current_result())
            .filter(|outcome| outcome.result().is_err())
            .collect()
    }

    // =========================================================================
    // Subsidiaries and Writes
    // =========================================================================

    /// Subsidiary properties published from this adapter's value.
    #[must_use]
    pub fn subsidiary_ids(&self) -> &BTreeSet<PropertyId> {
        &self.subsidiary_ids
    }

    /// Outcome of the most recent write attempt.
    #[must_use]
    pub fn last_write_result(&self) -> &Result<()> {
        &self.last_write_result
    }

    /// Record a write attempt's outcome.
    pub fn set_last_write_result(&mut self, result: Result<()>) {
        self.last_write_result = result;
    }
}

impl std::fmt::Debug for PropertyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyAdapter")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::id::PropertyRegistry;
    use crate::properties::value::ValueType;

    // =========================================================================
    // Status Lattice Tests
    // =========================================================================

    #[test]
    fn readability_and_writability() {
        assert!(!AccessStatus::Disabled.is_readable());
        assert!(!AccessStatus::Disabled.is_writable());
        assert!(AccessStatus::ReadOnly.is_readable());
        assert!(!AccessStatus::ReadOnly.is_writable());
        assert!(!AccessStatus::WriteOnly.is_readable());
        assert!(AccessStatus::WriteOnly.is_writable());
        assert!(AccessStatus::ReadWrite.is_readable());
        assert!(AccessStatus::ReadWrite.is_writable());
    }

    #[test]
    fn constraint_never_upgrades() {
        use AccessStatus::*;

        // A fully-permissive constraint leaves the device status alone.
        for device in [Disabled, ReadOnly, WriteOnly, ReadWrite] {
            assert_eq!(device.constrained_by(ReadWrite), device);
        }

        // A dead constraint disables everything.
        for device in [Disabled, ReadOnly, WriteOnly, ReadWrite] {
            assert_eq!(device.constrained_by(Disabled), Disabled);
        }

        // One-sided constraints strip the blocked side.
        assert_eq!(ReadWrite.constrained_by(ReadOnly), ReadOnly);
        assert_eq!(ReadWrite.constrained_by(WriteOnly), WriteOnly);
        assert_eq!(ReadOnly.constrained_by(WriteOnly), Disabled);
        assert_eq!(WriteOnly.constrained_by(ReadOnly), Disabled);
        assert_eq!(ReadOnly.constrained_by(ReadOnly), ReadOnly);
        assert_eq!(WriteOnly.constrained_by(WriteOnly), WriteOnly);
    }

    // =========================================================================
    // Adapter Wiring Tests
    // =========================================================================

    struct EmptyAccess;

    impl ValueAccess for EmptyAccess {
        fn value_of(&self, _id: PropertyId) -> OptionalResult<Value> {
            None
        }

        fn value_type_of(&self, _id: PropertyId) -> Option<ValueType> {
            None
        }
    }

    fn u32_codec_adapter(id: PropertyId, range: AddressRange) -> PropertyAdapter {
        PropertyAdapter::memory(
            id,
            range,
            |bytes| {
                let bytes: [u8; 4] = bytes.try_into().map_err(|_| {
                    Error::with_detail("Read error!", format!("expected 4 bytes, got {}", bytes.len()))
                })?;
                Ok(Value::U32(u32::from_le_bytes(bytes)))
            },
            |value| match value {
                Value::U32(raw) => Ok(raw.to_le_bytes().to_vec()),
                _ => Err(Error::with_detail("Write error!", "expected a u32 value")),
            },
            |device_type| match device_type {
                Some(_) => AccessStatus::ReadWrite,
                None => AccessStatus::Disabled,
            },
        )
    }

    #[test]
    fn memory_adapter_codec_round_trip() {
        let mut registry = PropertyRegistry::new();
        let id = registry.register("PALETTE_INDEX_CURRENT", "");
        let adapter = u32_codec_adapter(id, AddressRange::first_and_size(0x20, 4));

        let encoded = adapter.encode_value(&Value::U32(0x0102_0304)).unwrap();
        assert_eq!(encoded, vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(adapter.decode_bytes(&encoded).unwrap(), Value::U32(0x0102_0304));
        assert_eq!(adapter.address_ranges(), vec![AddressRange::first_and_size(0x20, 4)]);
        assert!(adapter.source_property_ids().is_empty());
    }

    #[test]
    fn device_type_drives_status() {
        let mut registry = PropertyRegistry::new();
        let id = registry.register("FRAMERATE_CURRENT", "");
        let wtc640 = registry.register_device_type("WTC640");
        let mut adapter = u32_codec_adapter(id, AddressRange::first_and_size(0x24, 4));

        assert_eq!(adapter.status(), AccessStatus::Disabled);
        assert!(adapter.is_active_for_device(Some(wtc640)));
        assert!(!adapter.is_active_for_device(None));

        adapter.update_status_for_device(Some(wtc640));
        assert_eq!(adapter.recompute_status(&EmptyAccess), Some(AccessStatus::ReadWrite));
        // Unchanged recomputation reports nothing.
        assert_eq!(adapter.recompute_status(&EmptyAccess), None);

        adapter.update_status_for_device(None);
        assert_eq!(adapter.recompute_status(&EmptyAccess), Some(AccessStatus::Disabled));
    }

    #[test]
    fn constraint_downgrades_through_recompute() {
        let mut registry = PropertyRegistry::new();
        let id = registry.register("NUC_MAX_PERIOD_CURRENT", "");
        let mode = registry.register("NUC_UPDATE_MODE_CURRENT", "");
        let wtc640 = registry.register_device_type("WTC640");

        let mut adapter = u32_codec_adapter(id, AddressRange::first_and_size(0x30, 4))
            .with_status_constraint([mode].into_iter().collect(), move |access| {
                match access.value_of(mode) {
                    // Manual update mode: the period is display-only.
                    Some(Ok(Value::U32(0))) => AccessStatus::ReadOnly,
                    _ => AccessStatus::ReadWrite,
                }
            });
        adapter.update_status_for_device(Some(wtc640));

        struct ModeAccess(PropertyId, u32);
        impl ValueAccess for ModeAccess {
            fn value_of(&self, id: PropertyId) -> OptionalResult<Value> {
                (id == self.0).then(|| Ok(Value::U32(self.1)))
            }
            fn value_type_of(&self, _id: PropertyId) -> Option<ValueType> {
                Some(ValueType::U32)
            }
        }

        assert_eq!(
            adapter.recompute_status(&ModeAccess(mode, 0)),
            Some(AccessStatus::ReadOnly)
        );
        assert_eq!(
            adapter.recompute_status(&ModeAccess(mode, 1)),
            Some(AccessStatus::ReadWrite)
        );
        assert_eq!(adapter.constraint_ids().len(), 1);
    }

    #[test]
    fn validator_dependencies_exclude_self() {
        let mut registry = PropertyRegistry::new();
        let framerate = registry.register("FRAMERATE_CURRENT", "");
        let format = registry.register("VIDEO_FORMAT_CURRENT", "");

        let validator = Arc::new(DependencyValidator::new(
            [framerate, format].into_iter().collect(),
            |_access| RankedValidation::ok(),
        ));

        let adapter = u32_codec_adapter(framerate, AddressRange::first_and_size(0x24, 4))
            .with_dependency_validator(validator);
        assert_eq!(
            adapter.validation_dependency_ids().iter().copied().collect::<Vec<_>>(),
            vec![format]
        );
        assert!(adapter.value_dependency_validation_results().is_empty());
    }

    #[test]
    fn derived_adapter_projects_sources() {
        let mut registry = PropertyRegistry::new();
        let packed = registry.register("MGC_CONTRAST_BRIGHTNESS_CURRENT", "");
        let contrast = registry.register("MGC_CONTRAST_CURRENT", "");

        let adapter = PropertyAdapter::derived(
            contrast,
            [packed].into_iter().collect(),
            move |access| match access.value_of(packed) {
                Some(Ok(Value::U32(raw))) => Some(Ok(Value::U32(raw & 0xFFFF))),
                Some(Err(err)) => Some(Err(err)),
                _ => None,
            },
            |device_type| match device_type {
                Some(_) => AccessStatus::ReadOnly,
                None => AccessStatus::Disabled,
            },
        );

        struct PackedAccess(PropertyId);
        impl ValueAccess for PackedAccess {
            fn value_of(&self, id: PropertyId) -> OptionalResult<Value> {
                (id == self.0).then(|| Ok(Value::U32(0x0012_0034)))
            }
            fn value_type_of(&self, _id: PropertyId) -> Option<ValueType> {
                Some(ValueType::U32)
            }
        }

        assert_eq!(adapter.derive_value(&PackedAccess(packed)), Some(Ok(Value::U32(0x34))));
        assert_eq!(adapter.source_property_ids().len(), 1);
        assert!(adapter.memory_range().is_none());
        assert!(adapter.encode_value(&Value::U32(1)).is_err());
    }

    #[test]
    fn last_write_result_is_recorded() {
        let mut registry = PropertyRegistry::new();
        let id = registry.register("IMAGE_FREEZE", "");
        let mut adapter = u32_codec_adapter(id, AddressRange::first_and_size(0x38, 4));

        assert!(adapter.last_write_result().is_ok());
        adapter.set_last_write_result(Err(Error::with_detail("Write error!", "device busy")));
        assert!(adapter.last_write_result().is_err());
    }
}
