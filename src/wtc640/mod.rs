//! WTC640 Device Model
//!
//! The concrete table the core consumes for a WTC640-class camera core:
//! the device memory-space map, the canonical STATUS register, and a
//! property table wiring ids, typed value holders, adapters and
//! dependency validators into a ready [`PropertyStore`].

use crate::device::{DeviceEndianness, DeviceInterface};
use crate::link::Baudrate;
use crate::memory::{AddressRange, MemoryDescriptor, MemoryKind, MemorySpace};
use crate::properties::{
    AccessStatus, DependencyValidator, DeviceType, PropertyAdapter, PropertyId, PropertyRegistry,
    PropertyStore, PropertyValue, RankedValidation, StoreMode, Value, ValueType,
};
use crate::protocol::ProtocolTcsi;
use crate::result::{Error, Result};

use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Memory Map
// =============================================================================

/// Register addresses of the properties modelled here.
pub mod reg {
    /// Packed firmware version (major.minor.patch in three bytes)
    pub const MAIN_FIRMWARE_VERSION: u32 = 0x0000;
    /// Event/status bit register, accumulated by the device interface
    pub const STATUS: u32 = 0x0010;
    /// Serial number, eight ASCII bytes
    pub const SERIAL_NUMBER: u32 = 0x0020;
    /// Active palette slot
    pub const PALETTE_INDEX: u32 = 0x0030;
    /// Sensor framerate in Hz
    pub const FRAMERATE: u32 = 0x0034;
    /// Video output format selector
    pub const VIDEO_FORMAT: u32 = 0x0038;
    /// Shutter temperature, signed centi-degrees Celsius
    pub const SHUTTER_TEMPERATURE: u32 = 0x003C;
    /// UART line rate in bits per second
    pub const UART_BAUDRATE: u32 = 0x0040;
    /// Packed manual-gain-control contrast (low half) and brightness
    /// (high half)
    pub const MGC_CONTRAST_BRIGHTNESS: u32 = 0x0044;
    /// Test pattern generator on/off
    pub const TEST_PATTERN: u32 = 0x0048;
    /// Image freeze on/off
    pub const IMAGE_FREEZE: u32 = 0x004C;
}

/// The STATUS register slot whose reads feed the accumulated bitmask.
pub const STATUS_REGISTER: AddressRange = AddressRange::first_to_last(reg::STATUS, reg::STATUS + 3);

/// The WTC640 device memory space.
#[must_use]
pub fn memory_space() -> MemorySpace {
    MemorySpace::new(vec![
        MemoryDescriptor::new(
            AddressRange::first_to_last(0x0000_0000, 0x0000_0FFF),
            MemoryKind::Register,
            4,
            256,
        ),
        MemoryDescriptor::new(
            AddressRange::first_to_last(0x0000_1000, 0x0001_FFFF),
            MemoryKind::Sram,
            1,
            256,
        ),
        // Palette banks, 256 entries of RGB888 per bank.
        MemoryDescriptor::new(
            AddressRange::first_to_last(0x0010_0000, 0x0010_FFFF),
            MemoryKind::Sram,
            2,
            256,
        ),
        // Dead-pixel coordinate table.
        MemoryDescriptor::new(
            AddressRange::first_to_last(0x0011_0000, 0x0011_FFFF),
            MemoryKind::Sram,
            2,
            256,
        ),
        MemoryDescriptor::new(
            AddressRange::first_to_last(0x0100_0000, 0x01FF_FFFF),
            MemoryKind::Flash,
            4,
            192,
        ),
    ])
}

/// Device interface preconfigured for a WTC640 core.
#[must_use]
pub fn create_device(protocol: Arc<ProtocolTcsi>) -> DeviceInterface {
    DeviceInterface::new(protocol, DeviceEndianness::Little, memory_space(), STATUS_REGISTER)
}

// =============================================================================
// Codecs
// =============================================================================

fn decode_u32(bytes: &[u8]) -> Result<Value> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::with_detail("Read error!", format!("expected 4 bytes, got {}", bytes.len())))?;
    Ok(Value::U32(u32::from_le_bytes(bytes)))
}

fn encode_u32(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::U32(raw) => Ok(raw.to_le_bytes().to_vec()),
        _ => Err(Error::with_detail("Write error!", "expected a u32 value")),
    }
}

fn decode_bool(bytes: &[u8]) -> Result<Value> {
    match decode_u32(bytes)? {
        Value::U32(0) => Ok(Value::Bool(false)),
        Value::U32(1) => Ok(Value::Bool(true)),
        Value::U32(raw) => Err(Error::with_detail(
            "Read error!",
            format!("flag register holds {raw}, expected 0 or 1"),
        )),
        _ => unreachable!(),
    }
}

fn encode_bool(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bool(flag) => Ok(u32::from(*flag).to_le_bytes().to_vec()),
        _ => Err(Error::with_detail("Write error!", "expected a bool value")),
    }
}

fn decode_text(bytes: &[u8]) -> Result<Value> {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());
    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|_| Error::with_detail("Read error!", "serial number is not valid ASCII"))?;
    Ok(Value::Text(text.trim_end().to_string()))
}

fn decode_centi_celsius(bytes: &[u8]) -> Result<Value> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::with_detail("Read error!", format!("expected 4 bytes, got {}", bytes.len())))?;
    Ok(Value::F64(f64::from(i32::from_le_bytes(bytes)) / 100.0))
}

fn version_string(raw: u32) -> String {
    format!("{}.{}.{}", (raw >> 16) & 0xFF, (raw >> 8) & 0xFF, raw & 0xFF)
}

// =============================================================================
// Property Table
// =============================================================================

/// Handles of the modelled WTC640 properties.
#[allow(missing_docs)]
pub struct Wtc640Ids {
    pub status: PropertyId,
    pub main_firmware_version: PropertyId,
    pub serial_number_current: PropertyId,
    pub palette_index_current: PropertyId,
    pub framerate_current: PropertyId,
    pub video_format_current: PropertyId,
    pub shutter_temperature: PropertyId,
    pub uart_baudrate_current: PropertyId,
    pub mgc_contrast_brightness_current: PropertyId,
    pub mgc_contrast_current: PropertyId,
    pub mgc_brightness_current: PropertyId,
    pub test_pattern: PropertyId,
    pub image_freeze: PropertyId,
}

/// A ready WTC640 property store.
pub struct Wtc640Properties {
    /// The wired store.
    pub store: PropertyStore,
    /// The registered WTC640 device type.
    pub device_type: DeviceType,
    /// Handles of the modelled properties.
    pub ids: Wtc640Ids,
}

/// Video format raw values.
const VIDEO_FORMAT_BT656: u32 = 0;
const VIDEO_FORMAT_CMOS16: u32 = 1;

/// Build the WTC640 property store: fresh registry, value holders,
/// memory adapters, subsidiary projections and dependency validators.
#[must_use]
pub fn create_store(mode: StoreMode) -> Wtc640Properties {
    let mut registry = PropertyRegistry::new();
    let ids = Wtc640Ids {
        status: registry.register("STATUS", ""),
        main_firmware_version: registry.register("MAIN_FIRMWARE_VERSION", ""),
        serial_number_current: registry.register("SERIAL_NUMBER_CURRENT", ""),
        palette_index_current: registry.register("PALETTE_INDEX_CURRENT", "active palette slot"),
        framerate_current: registry.register("FRAMERATE_CURRENT", ""),
        video_format_current: registry.register("VIDEO_FORMAT_CURRENT", ""),
        shutter_temperature: registry.register("SHUTTER_TEMPERATURE", ""),
        uart_baudrate_current: registry.register("UART_BAUDRATE_CURRENT", ""),
        mgc_contrast_brightness_current: registry.register("MGC_CONTRAST_BRIGHTNESS_CURRENT", ""),
        mgc_contrast_current: registry.register("MGC_CONTRAST_CURRENT", ""),
        mgc_brightness_current: registry.register("MGC_BRIGHTNESS_CURRENT", ""),
        test_pattern: registry.register("TEST_PATTERN", ""),
        image_freeze: registry.register("IMAGE_FREEZE", ""),
    };
    let device_type = registry.register_device_type("WTC640");

    let store = PropertyStore::new(registry, mode);

    let read_only = |device_type: Option<DeviceType>| match device_type {
        Some(_) => AccessStatus::ReadOnly,
        None => AccessStatus::Disabled,
    };
    let read_write = |device_type: Option<DeviceType>| match device_type {
        Some(_) => AccessStatus::ReadWrite,
        None => AccessStatus::Disabled,
    };

    // Value holders.
    store.add_property(PropertyValue::plain(ids.status, ValueType::U32));
    store.add_property(
        PropertyValue::plain(ids.main_firmware_version, ValueType::U32).with_formatter(|value| {
            match value {
                Value::U32(raw) => version_string(*raw),
                _ => String::new(),
            }
        }),
    );
    store.add_property(PropertyValue::plain(ids.serial_number_current, ValueType::Text));
    store.add_property(PropertyValue::arithmetic(
        ids.palette_index_current,
        Value::U32(0),
        Value::U32(15),
    ));
    store.add_property(PropertyValue::enumerated(
        ids.framerate_current,
        [(30u32, "30 Hz".to_string()), (60, "60 Hz".to_string())].into_iter().collect(),
    ));
    store.add_property(PropertyValue::enumerated(
        ids.video_format_current,
        [
            (VIDEO_FORMAT_BT656, "BT.656".to_string()),
            (VIDEO_FORMAT_CMOS16, "CMOS 16-bit".to_string()),
        ]
        .into_iter()
        .collect(),
    ));
    store.add_property(
        PropertyValue::plain(ids.shutter_temperature, ValueType::F64)
            .with_formatter(|value| format!("{} °C", value.to_display_string())),
    );
    store.add_property(PropertyValue::enumerated(
        ids.uart_baudrate_current,
        Baudrate::ALL
            .iter()
            .map(|rate| (rate.bits_per_second(), format!("{} Bd", rate.bits_per_second())))
            .collect::<BTreeMap<u32, String>>(),
    ));
    store.add_property(PropertyValue::plain(ids.mgc_contrast_brightness_current, ValueType::U32));
    store.add_property(PropertyValue::arithmetic(
        ids.mgc_contrast_current,
        Value::U32(0),
        Value::U32(0xFFFF),
    ));
    store.add_property(PropertyValue::arithmetic(
        ids.mgc_brightness_current,
        Value::U32(0),
        Value::U32(0xFFFF),
    ));
    store.add_property(PropertyValue::plain(ids.test_pattern, ValueType::Bool));
    store.add_property(PropertyValue::plain(ids.image_freeze, ValueType::Bool));

    // Cross-property relation: 60 Hz is not available on the 16-bit CMOS
    // output path.
    let framerate_id = ids.framerate_current;
    let format_id = ids.video_format_current;
    let framerate_format = Arc::new(DependencyValidator::new(
        [framerate_id, format_id].into_iter().collect(),
        move |access| {
            let (Some(Ok(Value::U32(framerate))), Some(Ok(Value::U32(format)))) =
                (access.value_of(framerate_id), access.value_of(format_id))
            else {
                return RankedValidation::data_not_ready("framerate or video format not read");
            };
            if framerate == 60 && format == VIDEO_FORMAT_CMOS16 {
                return RankedValidation::error(
                    "Unsupported combination!",
                    "60 Hz is not available in CMOS 16-bit format",
                );
            }
            RankedValidation::ok()
        },
    ));

    // Adapters.
    store.add_adapter(PropertyAdapter::memory(
        ids.status,
        STATUS_REGISTER,
        decode_u32,
        encode_u32,
        read_only,
    ));
    store.add_adapter(PropertyAdapter::memory(
        ids.main_firmware_version,
        AddressRange::first_and_size(reg::MAIN_FIRMWARE_VERSION, 4),
        decode_u32,
        encode_u32,
        read_only,
    ));
    store.add_adapter(PropertyAdapter::memory(
        ids.serial_number_current,
        AddressRange::first_and_size(reg::SERIAL_NUMBER, 8),
        decode_text,
        |_value| Err(Error::with_detail("Write error!", "serial number is factory-set")),
        read_only,
    ));
    store.add_adapter(PropertyAdapter::memory(
        ids.palette_index_current,
        AddressRange::first_and_size(reg::PALETTE_INDEX, 4),
        decode_u32,
        encode_u32,
        read_write,
    ));
    store.add_adapter(
        PropertyAdapter::memory(
            ids.framerate_current,
            AddressRange::first_and_size(reg::FRAMERATE, 4),
            decode_u32,
            encode_u32,
            read_write,
        )
        .with_dependency_validator(Arc::clone(&framerate_format)),
    );
    store.add_adapter(
        PropertyAdapter::memory(
            ids.video_format_current,
            AddressRange::first_and_size(reg::VIDEO_FORMAT, 4),
            decode_u32,
            encode_u32,
            read_write,
        )
        .with_dependency_validator(framerate_format),
    );
    store.add_adapter(PropertyAdapter::memory(
        ids.shutter_temperature,
        AddressRange::first_and_size(reg::SHUTTER_TEMPERATURE, 4),
        decode_centi_celsius,
        |_value| Err(Error::with_detail("Write error!", "temperature is sensor-driven")),
        read_only,
    ));
    store.add_adapter(PropertyAdapter::memory(
        ids.uart_baudrate_current,
        AddressRange::first_and_size(reg::UART_BAUDRATE, 4),
        decode_u32,
        encode_u32,
        read_write,
    ));
    store.add_adapter(
        PropertyAdapter::memory(
            ids.mgc_contrast_brightness_current,
            AddressRange::first_and_size(reg::MGC_CONTRAST_BRIGHTNESS, 4),
            decode_u32,
            encode_u32,
            read_write,
        )
        .with_subsidiary(ids.mgc_contrast_current)
        .with_subsidiary(ids.mgc_brightness_current),
    );

    let packed_id = ids.mgc_contrast_brightness_current;
    store.add_adapter(PropertyAdapter::derived(
        ids.mgc_contrast_current,
        [packed_id].into_iter().collect(),
        move |access| match access.value_of(packed_id) {
            Some(Ok(Value::U32(raw))) => Some(Ok(Value::U32(raw & 0xFFFF))),
            Some(Err(err)) => Some(Err(err)),
            _ => None,
        },
        read_only,
    ));
    store.add_adapter(PropertyAdapter::derived(
        ids.mgc_brightness_current,
        [packed_id].into_iter().collect(),
        move |access| match access.value_of(packed_id) {
            Some(Ok(Value::U32(raw))) => Some(Ok(Value::U32(raw >> 16))),
            Some(Err(err)) => Some(Err(err)),
            _ => None,
        },
        read_only,
    ));

    // Test pattern cannot be toggled while the image is frozen.
    let image_freeze_id = ids.image_freeze;
    store.add_adapter(
        PropertyAdapter::memory(
            ids.test_pattern,
            AddressRange::first_and_size(reg::TEST_PATTERN, 4),
            decode_bool,
            encode_bool,
            read_write,
        )
        .with_status_constraint([image_freeze_id].into_iter().collect(), move |access| {
            match access.value_of(image_freeze_id) {
                Some(Ok(Value::Bool(true))) => AccessStatus::ReadOnly,
                _ => AccessStatus::ReadWrite,
            }
        }),
    );
    store.add_adapter(PropertyAdapter::memory(
        ids.image_freeze,
        AddressRange::first_and_size(reg::IMAGE_FREEZE, 4),
        decode_bool,
        encode_bool,
        read_write,
    ));

    Wtc640Properties {
        store,
        device_type,
        ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressTask;
    use crate::protocol::packet::Packet;
    use crate::protocol::stats::StatsRecorder;
    use crate::result::ErrorKind;
    use crate::test_utils::MockLink;

    fn connected_fixture(mode: StoreMode) -> (Wtc640Properties, Arc<MockLink>) {
        let link = Arc::new(MockLink::new(4096));
        let engine = ProtocolTcsi::new(Arc::new(StatsRecorder::new()));
        engine.set_data_link(Some(link.clone()));

        let properties = create_store(mode);
        properties.store.attach_device(Some(Arc::new(create_device(Arc::new(engine)))));
        {
            let transaction = properties.store.create_exclusive_transaction();
            transaction.set_device_type(Some(properties.device_type));
        }
        (properties, link)
    }

    // =========================================================================
    // Memory Map Tests
    // =========================================================================

    #[test]
    fn map_covers_the_modelled_registers() {
        let space = memory_space();
        for address in [
            reg::MAIN_FIRMWARE_VERSION,
            reg::STATUS,
            reg::SERIAL_NUMBER,
            reg::PALETTE_INDEX,
            reg::UART_BAUDRATE,
            reg::IMAGE_FREEZE,
        ] {
            let descriptor = space
                .descriptor_for(&AddressRange::first_and_size(address, 4))
                .unwrap();
            assert_eq!(descriptor.kind, MemoryKind::Register);
            assert_eq!(descriptor.minimum_data_size, 4);
        }
    }

    #[test]
    fn firmware_region_is_flash() {
        let space = memory_space();
        let descriptor = space
            .descriptor_for(&AddressRange::first_and_size(0x0100_0000, 64))
            .unwrap();
        assert_eq!(descriptor.kind, MemoryKind::Flash);
        assert_eq!(descriptor.maximum_data_size, 192);
    }

    #[test]
    fn status_register_is_one_aligned_slot() {
        assert_eq!(STATUS_REGISTER.size(), 4);
        assert_eq!(STATUS_REGISTER.first() % 4, 0);
    }

    // =========================================================================
    // Table Wiring Tests
    // =========================================================================

    #[test]
    fn registry_resolves_stable_id_strings() {
        let properties = create_store(StoreMode::Direct);
        let registry = properties.store.registry();
        assert_eq!(
            registry.id_by_string("PALETTE_INDEX_CURRENT"),
            Some(properties.ids.palette_index_current)
        );
        assert_eq!(
            registry.id_string(properties.ids.shutter_temperature),
            "SHUTTER_TEMPERATURE"
        );
        assert_eq!(registry.len(), 13);
    }

    #[test]
    fn statuses_follow_device_attachment() {
        let properties = create_store(StoreMode::Direct);
        {
            let transaction = properties.store.create_transaction();
            assert_eq!(transaction.status(properties.ids.palette_index_current), AccessStatus::Disabled);
        }
        {
            let transaction = properties.store.create_exclusive_transaction();
            transaction.set_device_type(Some(properties.device_type));
            assert_eq!(
                transaction.status(properties.ids.palette_index_current),
                AccessStatus::ReadWrite
            );
            assert_eq!(
                transaction.status(properties.ids.shutter_temperature),
                AccessStatus::ReadOnly
            );
        }
    }

    // =========================================================================
    // End-to-End Tests
    // =========================================================================

    #[test]
    fn firmware_version_reads_and_renders() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        // Version 2.5.11 packed as 0x00_02_05_0B.
        link.push_frame(Packet::ok_response(1, reg::MAIN_FIRMWARE_VERSION, &0x0002_050Bu32.to_le_bytes()).bytes());

        let transaction = properties.store.create_transaction();
        transaction.touch(properties.ids.main_firmware_version).unwrap();
        assert_eq!(transaction.value_as_string(properties.ids.main_firmware_version), "2.5.11");
    }

    #[test]
    fn shutter_temperature_decodes_centi_celsius() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        link.push_frame(Packet::ok_response(1, reg::SHUTTER_TEMPERATURE, &(-1250i32).to_le_bytes()).bytes());

        let transaction = properties.store.create_transaction();
        transaction.touch(properties.ids.shutter_temperature).unwrap();
        assert_eq!(transaction.get::<f64>(properties.ids.shutter_temperature), Some(Ok(-12.5)));
        assert_eq!(transaction.value_as_string(properties.ids.shutter_temperature), "-12.5 °C");
    }

    #[test]
    fn palette_write_round_trip() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        link.push_frame(Packet::ok_response(1, reg::PALETTE_INDEX, &[]).bytes());

        let transaction = properties.store.create_transaction();
        transaction.set(properties.ids.palette_index_current, 11u32).unwrap();
        assert_eq!(transaction.get::<u32>(properties.ids.palette_index_current), Some(Ok(11)));

        let written = link.written_frames();
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0][7..11], &11u32.to_le_bytes());
        // Out-of-range palette slots never reach the wire.
        assert!(transaction.set(properties.ids.palette_index_current, 16u32).is_err());
        assert_eq!(link.written_frames().len(), 1);
    }

    #[test]
    fn mgc_halves_follow_the_packed_register() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        link.push_frame(Packet::ok_response(1, reg::MGC_CONTRAST_BRIGHTNESS, &0x0140_0080u32.to_le_bytes()).bytes());

        let transaction = properties.store.create_transaction();
        transaction.touch(properties.ids.mgc_contrast_brightness_current).unwrap();
        assert_eq!(transaction.get::<u32>(properties.ids.mgc_contrast_current), Some(Ok(0x0080)));
        assert_eq!(transaction.get::<u32>(properties.ids.mgc_brightness_current), Some(Ok(0x0140)));
    }

    #[test]
    fn freeze_locks_the_test_pattern() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        link.push_frame(Packet::ok_response(1, reg::IMAGE_FREEZE, &[]).bytes());

        let transaction = properties.store.create_transaction();
        assert!(transaction.is_writable(properties.ids.test_pattern));

        transaction.set(properties.ids.image_freeze, true).unwrap();
        assert_eq!(transaction.status(properties.ids.test_pattern), AccessStatus::ReadOnly);
        assert!(transaction.set(properties.ids.test_pattern, true).is_err());

        // Unfreezing restores write access.
        link.push_frame(Packet::ok_response(2, reg::IMAGE_FREEZE, &[]).bytes());
        transaction.set(properties.ids.image_freeze, false).unwrap();
        assert!(transaction.is_writable(properties.ids.test_pattern));
    }

    #[test]
    fn framerate_format_relation_is_enforced() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        link.push_frame(Packet::ok_response(1, reg::VIDEO_FORMAT, &[]).bytes());
        link.push_frame(Packet::ok_response(2, reg::FRAMERATE, &[]).bytes());

        let transaction = properties.store.create_transaction();
        transaction.set(properties.ids.video_format_current, VIDEO_FORMAT_CMOS16).unwrap();
        transaction.set(properties.ids.framerate_current, 30u32).unwrap();

        let probe = transaction.validate_what_if(properties.ids.framerate_current, 60u32);
        assert!(!probe.is_acceptable());

        let results = transaction.dependency_validation_results(properties.ids.framerate_current);
        assert!(results.is_empty(), "30 Hz in CMOS 16-bit is a valid configuration");
    }

    #[test]
    fn serial_number_is_read_only_text() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        link.push_frame(Packet::ok_response(1, reg::SERIAL_NUMBER, b"WTC41973").bytes());

        let transaction = properties.store.create_transaction();
        transaction.touch(properties.ids.serial_number_current).unwrap();
        assert_eq!(
            transaction.get::<String>(properties.ids.serial_number_current),
            Some(Ok("WTC41973".to_string()))
        );
        assert!(!transaction.is_writable(properties.ids.serial_number_current));
    }

    #[test]
    fn status_property_and_accumulator_share_the_slot() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        link.push_frame(Packet::ok_response(1, reg::STATUS, &0x0000_0209u32.to_le_bytes()).bytes());

        let transaction = properties.store.create_transaction();
        transaction.touch(properties.ids.status).unwrap();
        assert_eq!(transaction.get::<u32>(properties.ids.status), Some(Ok(0x209)));

        let device = properties.store.device().unwrap();
        assert_eq!(device.accumulated_status_and_reset(), Some(0x209));
        assert_eq!(device.accumulated_status_and_reset(), None);
    }

    #[test]
    fn baudrate_enum_lists_the_supported_rates() {
        let properties = create_store(StoreMode::Direct);
        let transaction = properties.store.create_transaction();
        let names = transaction.enum_names(properties.ids.uart_baudrate_current).unwrap();
        assert_eq!(names.len(), 10);
        assert_eq!(names[&115_200], "115200 Bd");
        assert!(transaction.validate_value(properties.ids.uart_baudrate_current, 14_400u32).is_err());
    }

    #[test]
    fn flash_write_goes_through_burst_envelopes() {
        let (properties, link) = connected_fixture(StoreMode::Direct);
        let device = properties.store.device().unwrap();

        // 256 bytes of firmware: start, two 192/64-byte packets, end.
        link.push_frame(Packet::ok_response(1, 0x0100_0000, &[]).bytes());
        link.push_frame(Packet::ok_response(2, 0x0100_0000, &[]).bytes());
        link.push_frame(Packet::ok_response(3, 0x0100_00C0, &[]).bytes());
        link.push_frame(Packet::ok_response(4, 0x0100_0000, &[]).bytes());

        device
            .write(&vec![0x5A; 256], 0x0100_0000, &ProgressTask::none())
            .unwrap();
        let commands: Vec<u8> = link.written_frames().iter().map(|frame| frame[1]).collect();
        assert_eq!(commands, vec![0x82, 0x81, 0x81, 0x83]);
    }

    #[test]
    fn writes_fail_cleanly_without_a_device() {
        let properties = create_store(StoreMode::Direct);
        {
            let transaction = properties.store.create_exclusive_transaction();
            transaction.set_device_type(Some(properties.device_type));
        }

        let transaction = properties.store.create_transaction();
        let err = transaction.set(properties.ids.palette_index_current, 1u32).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoConnection));
    }
}
