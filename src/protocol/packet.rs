//! TCSI Frame Codec
//!
//! Byte layout, exactly:
//!
//! | offset | field |
//! |--------|-------|
//! | 0      | sync nibble `0xA` (hi) \| packet id (lo, 4-bit cyclic) |
//! | 1      | command (requests) or status (responses) |
//! | 2..=5  | address, little-endian u32 |
//! | 6      | payload byte count |
//! | 7..    | payload |
//! | last   | 8-bit sum checksum over all preceding bytes |
//!
//! The codec is pure: it owns no link and no retry policy. Validation is
//! layered - frame shape, then response-for-address, then ok-response of an
//! expected size - so the engine can report precisely what went wrong.

use crate::constants::{HEADER_SIZE, MINIMUM_PACKET_SIZE};
use crate::memory::AddressRange;
use crate::result::{Error, ErrorKind, Result};

// =============================================================================
// Field Positions
// =============================================================================

const SYNC_AND_ID_POSITION: usize = 0;
const STATUS_OR_COMMAND_POSITION: usize = 1;
const ADDRESS_POSITION: usize = 2;
const COUNT_POSITION: usize = 6;
const DATA_POSITION: usize = 7;

const SYNCHRONIZATION_VALUE: u8 = 0xA0;
const SYNCHRONIZATION_MASK: u8 = 0xF0;
const PACKET_ID_MASK: u8 = 0x0F;

// =============================================================================
// Commands and Statuses
// =============================================================================

/// Request commands carried in byte 1 of a request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Read `payload[0]` bytes starting at the address
    Read = 0x80,
    /// Write the payload starting at the address
    Write = 0x81,
    /// Open a flash burst; payload is the word count, big-endian u32
    FlashBurstStart = 0x82,
    /// Close the current flash burst; empty payload
    FlashBurstEnd = 0x83,
}

impl Command {
    fn from_byte(byte: u8) -> Option<Command> {
        match byte {
            0x80 => Some(Command::Read),
            0x81 => Some(Command::Write),
            0x82 => Some(Command::FlashBurstStart),
            0x83 => Some(Command::FlashBurstEnd),
            _ => None,
        }
    }
}

/// Device statuses carried in byte 1 of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceStatus {
    /// Request accepted
    Ok = 0x00,
    /// Device cannot serve the request right now
    CameraNotReady = 0x01,
    /// Command byte not understood
    UnknownCommand = 0x02,
    /// Request checksum mismatch on the device side
    WrongChecksum = 0x03,
    /// Address outside the accessible space for the current credentials
    WrongAddress = 0x04,
    /// Payload count inconsistent with the command
    WrongArgumentCount = 0x05,
    /// Burst sequencing violated
    FlashBurstError = 0x06,
    /// A current setting prevents the operation
    InvalidSettings = 0x07,
    /// Payload value rejected
    IncorrectValue = 0x08,
}

impl DeviceStatus {
    fn from_byte(byte: u8) -> Option<DeviceStatus> {
        match byte {
            0x00 => Some(DeviceStatus::Ok),
            0x01 => Some(DeviceStatus::CameraNotReady),
            0x02 => Some(DeviceStatus::UnknownCommand),
            0x03 => Some(DeviceStatus::WrongChecksum),
            0x04 => Some(DeviceStatus::WrongAddress),
            0x05 => Some(DeviceStatus::WrongArgumentCount),
            0x06 => Some(DeviceStatus::FlashBurstError),
            0x07 => Some(DeviceStatus::InvalidSettings),
            0x08 => Some(DeviceStatus::IncorrectValue),
            _ => None,
        }
    }

    /// Wire name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Ok => "OK",
            DeviceStatus::CameraNotReady => "CAMERA NOT READY",
            DeviceStatus::UnknownCommand => "UNKNOWN COMMAND",
            DeviceStatus::WrongChecksum => "WRONG CHECKSUM",
            DeviceStatus::WrongAddress => "WRONG ADDRESS",
            DeviceStatus::WrongArgumentCount => "WRONG ARGUMENT COUNT",
            DeviceStatus::FlashBurstError => "FLASH BURST ERROR",
            DeviceStatus::InvalidSettings => "INVALID SETTINGS",
            DeviceStatus::IncorrectValue => "INCORRECT VALUE",
        }
    }

    /// The error classification a non-OK status maps to.
    #[must_use]
    pub const fn error_kind(self) -> Option<ErrorKind> {
        match self {
            DeviceStatus::Ok => None,
            DeviceStatus::CameraNotReady => Some(ErrorKind::DeviceBusy),
            DeviceStatus::WrongAddress => Some(ErrorKind::AccessDenied),
            DeviceStatus::UnknownCommand
            | DeviceStatus::WrongChecksum
            | DeviceStatus::WrongArgumentCount
            | DeviceStatus::FlashBurstError => Some(ErrorKind::TransmissionFailed),
            DeviceStatus::InvalidSettings => Some(ErrorKind::InvalidSettings),
            DeviceStatus::IncorrectValue => Some(ErrorKind::InvalidData),
        }
    }
}

// =============================================================================
// Packet
// =============================================================================

/// A TCSI frame, owned as raw bytes.
///
/// Constructors always produce well-formed frames; frames received from
/// the wire are wrapped with [`Packet::from_bytes`] and checked through the
/// `validate_*` family before any accessor other than
/// [`Packet::expected_data_size`] is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    /// Wrap received bytes without validating them.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Request to read `payload_size` bytes from `address`.
    #[must_use]
    pub fn read_request(packet_id: u8, address: u32, payload_size: u8) -> Self {
        let packet = Self::build(Command::Read as u8, packet_id, address, &[payload_size]);
        debug_assert!(packet.validate_as_request().is_ok());
        packet
    }

    /// Request to write `payload` at `address`.
    #[must_use]
    pub fn write_request(packet_id: u8, address: u32, payload: &[u8]) -> Self {
        let packet = Self::build(Command::Write as u8, packet_id, address, payload);
        debug_assert!(packet.validate_as_request().is_ok());
        packet
    }

    /// Request to open a flash burst of `size_in_words` words at `address`.
    ///
    /// The word count is the single big-endian field of the protocol, kept
    /// for device compatibility.
    #[must_use]
    pub fn flash_burst_start_request(packet_id: u8, address: u32, size_in_words: u32) -> Self {
        let packet = Self::build(
            Command::FlashBurstStart as u8,
            packet_id,
            address,
            &size_in_words.to_be_bytes(),
        );
        debug_assert!(packet.validate_as_request().is_ok());
        packet
    }

    /// Request to close the flash burst at `address`.
    #[must_use]
    pub fn flash_burst_end_request(packet_id: u8, address: u32) -> Self {
        let packet = Self::build(Command::FlashBurstEnd as u8, packet_id, address, &[]);
        debug_assert!(packet.validate_as_request().is_ok());
        packet
    }

    /// Successful response carrying `payload`.
    #[must_use]
    pub fn ok_response(packet_id: u8, address: u32, payload: &[u8]) -> Self {
        let packet = Self::build(DeviceStatus::Ok as u8, packet_id, address, payload);
        debug_assert!(packet.validate_as_ok_response(address, payload.len()).is_ok());
        packet
    }

    /// Error response with the given status and no payload.
    #[must_use]
    pub fn error_response(packet_id: u8, address: u32, status: DeviceStatus) -> Self {
        let packet = Self::build(status as u8, packet_id, address, &[]);
        debug_assert!(packet.validate_as_response(address).is_ok());
        packet
    }

    fn build(status_or_command: u8, packet_id: u8, address: u32, payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= u8::MAX as usize, "payload too large for one frame");

        let mut data = vec![0u8; MINIMUM_PACKET_SIZE + payload.len()];
        data[SYNC_AND_ID_POSITION] =
            (SYNCHRONIZATION_VALUE & SYNCHRONIZATION_MASK) | (packet_id & PACKET_ID_MASK);
        data[STATUS_OR_COMMAND_POSITION] = status_or_command;
        data[ADDRESS_POSITION..ADDRESS_POSITION + 4].copy_from_slice(&address.to_le_bytes());
        data[COUNT_POSITION] = payload.len() as u8;
        data[DATA_POSITION..DATA_POSITION + payload.len()].copy_from_slice(payload);

        let checksum = Self::calculate_checksum(&data);
        *data.last_mut().expect("frame is never empty") = checksum;

        Self { data }
    }

    fn calculate_checksum(data: &[u8]) -> u8 {
        debug_assert!(!data.is_empty());
        data[..data.len() - 1]
            .iter()
            .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check the frame shape: size, sync nibble, known command/status,
    /// declared count vs. actual trailing length, checksum.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |detail: String| Error::tagged("Invalid packet!", detail, ErrorKind::TransmissionFailed);

        if self.data.len() < MINIMUM_PACKET_SIZE {
            return Err(invalid(format!("invalid size: {}", self.data.len())));
        }

        let sync = self.data[SYNC_AND_ID_POSITION] & SYNCHRONIZATION_MASK;
        if sync != SYNCHRONIZATION_VALUE & SYNCHRONIZATION_MASK {
            return Err(invalid(format!(
                "invalid synchronization value: 0x{sync:02X} expected: 0x{SYNCHRONIZATION_VALUE:02X}"
            )));
        }

        let status_or_command = self.status_or_command();
        if Command::from_byte(status_or_command).is_none()
            && DeviceStatus::from_byte(status_or_command).is_none()
        {
            return Err(invalid(format!("invalid command/status: 0x{status_or_command:02X}")));
        }

        let actual_payload = self.data.len() - MINIMUM_PACKET_SIZE;
        if usize::from(self.data[COUNT_POSITION]) != actual_payload {
            return Err(invalid(format!(
                "invalid count value: {} current data size: {actual_payload}",
                self.data[COUNT_POSITION]
            )));
        }

        let calculated = Self::calculate_checksum(&self.data);
        let stored = *self.data.last().expect("length checked above");
        if stored != calculated {
            return Err(invalid(format!("invalid checksum: {stored} calculated: {calculated}")));
        }

        Ok(())
    }

    /// Check the frame as a response to a request for `address`.
    pub fn validate_as_response(&self, address: u32) -> Result<()> {
        if let Err(err) = self.validate() {
            return Err(err.rewrap("Response error!"));
        }

        if DeviceStatus::from_byte(self.status_or_command()).is_none() {
            return Err(Error::tagged(
                "Response error!",
                format!(
                    "invalid TCSI - invalid response status: 0x{:02X} address: {}",
                    self.status_or_command(),
                    AddressRange::address_to_hex(self.address())
                ),
                ErrorKind::TransmissionFailed,
            ));
        }

        if self.address() != address {
            return Err(Error::tagged(
                "Response error!",
                format!(
                    "invalid TCSI - response address: {} expected: {}",
                    AddressRange::address_to_hex(self.address()),
                    AddressRange::address_to_hex(address)
                ),
                ErrorKind::TransmissionFailed,
            ));
        }

        Ok(())
    }

    /// Check the frame as an OK response for `address` carrying exactly
    /// `payload_size` bytes. A non-OK status fails with its mapped kind.
    pub fn validate_as_ok_response(&self, address: u32, payload_size: usize) -> Result<()> {
        self.validate_as_response(address)?;

        let status = DeviceStatus::from_byte(self.status_or_command())
            .expect("validated as response above");
        if status != DeviceStatus::Ok {
            return Err(Error::tagged(
                "Response error!",
                format!(
                    "TCSI response error code: 0x{:02X} - {} address: {}",
                    status as u8,
                    status.as_str(),
                    AddressRange::address_to_hex(self.address())
                ),
                status.error_kind().expect("non-OK status always maps to a kind"),
            ));
        }

        if self.payload_unchecked().len() != payload_size {
            return Err(Error::tagged(
                "Response error!",
                format!(
                    "TCSI response data size: {} expected: {payload_size} address: {}",
                    self.payload_unchecked().len(),
                    AddressRange::address_to_hex(self.address())
                ),
                ErrorKind::TransmissionFailed,
            ));
        }

        Ok(())
    }

    /// Check the frame as an outbound request: read carries exactly the
    /// one-byte requested length, write at least one byte, burst start the
    /// four-byte word count and burst end nothing.
    pub fn validate_as_request(&self) -> Result<()> {
        let request_error = |detail: String| Error::with_detail("Request error!", detail);

        if let Err(err) = self.validate() {
            return Err(request_error(err.detail().to_string()));
        }

        let payload_len = self.payload_unchecked().len();
        let Some(command) = Command::from_byte(self.status_or_command()) else {
            return Err(request_error(format!(
                "invalid TCSI - invalid request command: 0x{:02X} address: {}",
                self.status_or_command(),
                AddressRange::address_to_hex(self.address())
            )));
        };

        let expected = match command {
            Command::Read => (payload_len == 1, "read"),
            Command::Write => (payload_len >= 1, "write"),
            Command::FlashBurstStart => (payload_len == 4, "flash burst start"),
            Command::FlashBurstEnd => (payload_len == 0, "flash burst end"),
        };
        if !expected.0 {
            return Err(request_error(format!(
                "invalid TCSI - invalid {} request data size: {payload_len} address: {}",
                expected.1,
                AddressRange::address_to_hex(self.address())
            )));
        }

        Ok(())
    }

    /// Declared trailing payload size, readable from the first seven bytes
    /// alone. Used by the engine to size the second read of a response.
    pub fn expected_data_size(&self) -> Result<u8> {
        let invalid = |detail: String| {
            Error::tagged("Invalid packet data!", detail, ErrorKind::TransmissionFailed)
        };

        if self.data.len() < HEADER_SIZE {
            return Err(invalid(format!("not enough data - size: {}", self.data.len())));
        }

        let sync = self.data[SYNC_AND_ID_POSITION] & SYNCHRONIZATION_MASK;
        if sync != SYNCHRONIZATION_VALUE & SYNCHRONIZATION_MASK {
            return Err(invalid(format!(
                "invalid synchronization value: 0x{sync:02X} expected: 0x{SYNCHRONIZATION_VALUE:02X}"
            )));
        }

        let status_or_command = self.status_or_command();
        if Command::from_byte(status_or_command).is_none()
            && DeviceStatus::from_byte(status_or_command).is_none()
        {
            return Err(invalid(format!("invalid command/status: 0x{status_or_command:02X}")));
        }

        Ok(self.data[COUNT_POSITION])
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The 4-bit cyclic packet id.
    #[must_use]
    pub fn packet_id(&self) -> u8 {
        debug_assert!(self.validate().is_ok());
        self.data[SYNC_AND_ID_POSITION] & PACKET_ID_MASK
    }

    /// The addressed device location.
    #[must_use]
    pub fn address(&self) -> u32 {
        let bytes: [u8; 4] = self.data[ADDRESS_POSITION..ADDRESS_POSITION + 4]
            .try_into()
            .expect("address field is four bytes");
        u32::from_le_bytes(bytes)
    }

    /// The payload of a validated frame.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        debug_assert!(self.validate().is_ok());
        self.payload_unchecked()
    }

    /// The whole frame as raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Space-separated hex dump for log lines.
    #[must_use]
    pub fn to_hex_string(&self) -> String {
        let rendered: Vec<String> = self.data.iter().map(|byte| format!("0x{byte:02X}")).collect();
        rendered.join(" ")
    }

    fn payload_unchecked(&self) -> &[u8] {
        &self.data[DATA_POSITION..self.data.len() - 1]
    }

    fn status_or_command(&self) -> u8 {
        self.data[STATUS_OR_COMMAND_POSITION]
    }
}
