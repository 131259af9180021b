//! Property and Device-Type Handles
//!
//! Each property has a dense integer handle and a unique, stable
//! id-string (id-strings end up in persisted artifacts such as exported
//! pixel CSVs, so they never change meaning). Handles are allocated by a
//! [`PropertyRegistry`] during store construction; the registry is
//! append-only and effectively immutable afterwards. Tests build a fresh
//! registry per run instead of sharing process globals.

use std::collections::BTreeMap;

/// Dense handle of a registered property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyId(usize);

impl PropertyId {
    /// The dense index backing this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Handle of a registered device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceType(usize);

impl DeviceType {
    /// The dense index backing this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

struct PropertyRecord {
    id_string: String,
    info: String,
}

/// Append-only table of property ids and device types.
#[derive(Default)]
pub struct PropertyRegistry {
    properties: Vec<PropertyRecord>,
    by_id_string: BTreeMap<String, usize>,
    device_types: Vec<String>,
}

impl PropertyRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property under a unique id-string.
    ///
    /// # Panics
    ///
    /// Panics on an empty or duplicate id-string - both are wiring bugs in
    /// the device-model table.
    pub fn register(&mut self, id_string: impl Into<String>, info: impl Into<String>) -> PropertyId {
        let id_string = id_string.into();
        assert!(!id_string.is_empty(), "property id-string must not be empty");

        let index = self.properties.len();
        let previous = self.by_id_string.insert(id_string.clone(), index);
        assert!(previous.is_none(), "duplicate property id-string: {id_string}");

        self.properties.push(PropertyRecord {
            id_string,
            info: info.into(),
        });
        PropertyId(index)
    }

    /// Register a device model.
    pub fn register_device_type(&mut self, name: impl Into<String>) -> DeviceType {
        let index = self.device_types.len();
        self.device_types.push(name.into());
        DeviceType(index)
    }

    /// Number of registered properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether no property has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Every registered property handle, in registration order.
    #[must_use]
    pub fn all_ids(&self) -> Vec<PropertyId> {
        (0..self.properties.len()).map(PropertyId).collect()
    }

    /// Handle for a dense index, if registered.
    #[must_use]
    pub fn id_by_index(&self, index: usize) -> Option<PropertyId> {
        (index < self.properties.len()).then_some(PropertyId(index))
    }

    /// Handle for an id-string, if registered.
    #[must_use]
    pub fn id_by_string(&self, id_string: &str) -> Option<PropertyId> {
        self.by_id_string.get(id_string).map(|index| PropertyId(*index))
    }

    /// The stable id-string of a handle.
    #[must_use]
    pub fn id_string(&self, id: PropertyId) -> &str {
        &self.properties[id.0].id_string
    }

    /// Free-form info attached at registration.
    #[must_use]
    pub fn info(&self, id: PropertyId) -> &str {
        &self.properties[id.0].info
    }

    /// Display name of a device type.
    #[must_use]
    pub fn device_type_name(&self, device_type: DeviceType) -> &str {
        &self.device_types[device_type.0]
    }

    /// Every registered device type.
    #[must_use]
    pub fn all_device_types(&self) -> Vec<DeviceType> {
        (0..self.device_types.len()).map(DeviceType).collect()
    }
}

impl std::fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyRegistry")
            .field("properties", &self.properties.len())
            .field("device_types", &self.device_types.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_dense_in_registration_order() {
        let mut registry = PropertyRegistry::new();
        let status = registry.register("STATUS", "");
        let palette = registry.register("PALETTE_INDEX_CURRENT", "active palette slot");

        assert_eq!(status.index(), 0);
        assert_eq!(palette.index(), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.all_ids(), vec![status, palette]);
    }

    #[test]
    fn lookup_by_string_and_index() {
        let mut registry = PropertyRegistry::new();
        let framerate = registry.register("FRAMERATE_CURRENT", "");

        assert_eq!(registry.id_by_string("FRAMERATE_CURRENT"), Some(framerate));
        assert_eq!(registry.id_by_string("FRAMERATE"), None);
        assert_eq!(registry.id_by_index(0), Some(framerate));
        assert_eq!(registry.id_by_index(1), None);
        assert_eq!(registry.id_string(framerate), "FRAMERATE_CURRENT");
    }

    #[test]
    #[should_panic(expected = "duplicate property id-string")]
    fn duplicate_id_string_panics() {
        let mut registry = PropertyRegistry::new();
        registry.register("STATUS", "");
        registry.register("STATUS", "");
    }

    #[test]
    fn device_types_are_independent_handles() {
        let mut registry = PropertyRegistry::new();
        let uart = registry.register_device_type("WTC640 (UART)");
        let gige = registry.register_device_type("WTC640 (GigE)");

        assert_ne!(uart, gige);
        assert_eq!(registry.device_type_name(uart), "WTC640 (UART)");
        assert_eq!(registry.all_device_types(), vec![uart, gige]);
    }

    #[test]
    fn fresh_registries_are_isolated() {
        let mut first = PropertyRegistry::new();
        let mut second = PropertyRegistry::new();
        first.register("A", "");
        assert!(second.is_empty());
        second.register("B", "");
        assert_eq!(second.id_by_string("A"), None);
    }
}
