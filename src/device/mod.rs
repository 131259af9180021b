//! Device Interface
//!
//! The layer between the protocol engine and the property adapters. It
//! turns "read/write N bytes at address A" into a sequence of TCSI
//! packets:
//!
//! - validates the request against the memory-space map (region bounds,
//!   address and size alignment);
//! - segments transfers into per-region maximum packet payloads, issued in
//!   ascending address order;
//! - retries transient failures inside a sliding 4-of-8 error window and
//!   backs off while the device reports busy (500 ms steps, 10 s budget);
//! - wraps flash writes in per-sector burst envelopes under an exclusive
//!   flash lock (everything else holds it shared);
//! - accumulates values read from the canonical STATUS register slot into
//!   a drain-and-reset bitmask;
//! - applies device endianness for typed word access.
//!
//! Cancellation is cooperative: the progress task is polled at every chunk
//! boundary.

mod word;

pub use word::Word;

use crate::constants::{
    BUSY_DEVICE_DELAY, BUSY_DEVICE_TIMEOUT, ERROR_WINDOW_SIZE, FLASH_BYTES_PER_SECTOR,
    MAX_ERRORS_IN_WINDOW, TIMEOUT_DEFAULT, TIMEOUT_WRITING_FLASH,
};
use crate::memory::{AddressRange, MemoryDescriptor, MemorySpace};
use crate::progress::ProgressTask;
use crate::protocol::ProtocolTcsi;
use crate::result::{Error, ErrorKind, Result};

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

const READ_ERROR: &str = "Read error!";
const WRITE_ERROR: &str = "Write error!";

// =============================================================================
// Device Endianness
// =============================================================================

/// Byte order of multi-byte words in the device memory.
///
/// Per-device configuration: payload bytes are opaque on the wire and the
/// interface converts at the typed boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceEndianness {
    /// Least significant byte first (WTC640 family)
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

// =============================================================================
// Error Window
// =============================================================================

/// Sliding record of the last [`ERROR_WINDOW_SIZE`] packet outcomes, one
/// bit per attempt.
#[derive(Debug, Default, Clone, Copy)]
struct ErrorWindow {
    bits: u8,
}

impl ErrorWindow {
    fn shift(&mut self) {
        self.bits <<= 1;
    }

    fn mark_failure(&mut self) {
        self.bits |= 1;
    }

    fn failure_count(self) -> usize {
        self.bits.count_ones() as usize
    }
}

// =============================================================================
// Device Interface
// =============================================================================

/// Memory-style access to the device through the TCSI protocol engine.
pub struct DeviceInterface {
    protocol: Arc<ProtocolTcsi>,
    memory_space: RwLock<MemorySpace>,
    status_register: AddressRange,
    endianness: DeviceEndianness,
    // Flash writes hold this exclusively for the whole multi-sector write;
    // all other traffic holds it shared.
    flash_lock: RwLock<()>,
    accumulated_status: Mutex<Option<u32>>,
}

impl DeviceInterface {
    /// Interface over `protocol` for a device with the given memory layout.
    ///
    /// `status_register` is the 32-bit STATUS slot whose reads feed the
    /// accumulated-status bitmask.
    #[must_use]
    pub fn new(
        protocol: Arc<ProtocolTcsi>,
        endianness: DeviceEndianness,
        memory_space: MemorySpace,
        status_register: AddressRange,
    ) -> Self {
        debug_assert_eq!(status_register.size(), 4, "STATUS is a single 32-bit slot");
        Self {
            protocol,
            memory_space: RwLock::new(memory_space),
            status_register,
            endianness,
            flash_lock: RwLock::new(()),
            accumulated_status: Mutex::new(None),
        }
    }

    /// The protocol engine underneath.
    #[must_use]
    pub fn protocol(&self) -> &Arc<ProtocolTcsi> {
        &self.protocol
    }

    /// The current memory-space map.
    #[must_use]
    pub fn memory_space(&self) -> MemorySpace {
        self.memory_space.read().expect("memory space poisoned").clone()
    }

    /// Replace the memory-space map (device model switch).
    pub fn set_memory_space(&self, memory_space: MemorySpace) {
        *self.memory_space.write().expect("memory space poisoned") = memory_space;
    }

    /// Configured device endianness.
    #[must_use]
    pub fn endianness(&self) -> DeviceEndianness {
        self.endianness
    }

    /// Whether the engine has latched the connection as lost.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        self.protocol.is_connection_lost()
    }

    // =========================================================================
    // Byte Access
    // =========================================================================

    /// Read exactly `data.len()` bytes starting at `address`.
    pub fn read(&self, data: &mut [u8], address: u32, progress: &ProgressTask) -> Result<()> {
        let descriptor = self.descriptor_with_checks(address, Some(data.len() as u64), READ_ERROR)?;

        let _shared = self.flash_lock.read().expect("flash lock poisoned");
        self.read_impl(data, address, self.max_chunk_size(&descriptor), progress)
    }

    /// Write `data` starting at `address`, using the flash burst protocol
    /// when the target region requires it.
    pub fn write(&self, data: &[u8], address: u32, progress: &ProgressTask) -> Result<()> {
        let descriptor = self.descriptor_with_checks(address, Some(data.len() as u64), WRITE_ERROR)?;

        let max_chunk = self.max_chunk_size(&descriptor);
        let mut busy_total = Duration::ZERO;
        let mut window = ErrorWindow::default();

        if !descriptor.is_flash() {
            let _shared = self.flash_lock.read().expect("flash lock poisoned");
            return self.write_impl(
                data,
                address,
                TIMEOUT_DEFAULT,
                max_chunk,
                &mut busy_total,
                &mut window,
                progress,
            );
        }

        let _exclusive = self.flash_lock.write().expect("flash lock poisoned");
        self.write_flash(data, address, &descriptor, max_chunk, &mut busy_total, &mut window, progress)
    }

    /// Read the largest single-packet payload available at `address`,
    /// bounded by the end of the containing region.
    ///
    /// Callers compose successive `read_some` calls to stream reads of
    /// unknown length.
    pub fn read_some(&self, address: u32, progress: &ProgressTask) -> Result<Vec<u8>> {
        let descriptor = self.descriptor_with_checks(address, None, READ_ERROR)?;

        let available = AddressRange::first_to_last(address, descriptor.range.last());
        let data_size = u64::from(self.max_chunk_size(&descriptor)).min(available.size());
        if data_size == 0 {
            return Err(Error::with_detail(READ_ERROR, "Unexpected end of memory"));
        }

        let mut data = vec![0u8; data_size as usize];

        let _shared = self.flash_lock.read().expect("flash lock poisoned");
        self.read_impl(&mut data, address, self.max_chunk_size(&descriptor), progress)?;
        Ok(data)
    }

    /// Read a whole address range into a fresh buffer.
    pub fn read_range(&self, range: &AddressRange, progress: &ProgressTask) -> Result<Vec<u8>> {
        let mut data = vec![0u8; range.size() as usize];
        self.read(&mut data, range.first(), progress)?;
        Ok(data)
    }

    /// Drain the bitwise OR of STATUS register values observed since the
    /// previous drain. `None` when STATUS was not read in between.
    #[must_use]
    pub fn accumulated_status_and_reset(&self) -> Option<u32> {
        self.accumulated_status
            .lock()
            .expect("status accumulator poisoned")
            .take()
    }

    // =========================================================================
    // Typed Access
    // =========================================================================

    /// Read words into `data`, applying device endianness.
    pub fn read_typed<W: Word>(
        &self,
        data: &mut [W],
        address: u32,
        progress: &ProgressTask,
    ) -> Result<()> {
        let mut bytes = vec![0u8; std::mem::size_of_val(data)];
        self.read(&mut bytes, address, progress)?;

        for (word, chunk) in data.iter_mut().zip(bytes.chunks_exact(W::SIZE)) {
            *word = W::from_device_bytes(chunk, self.endianness);
        }
        Ok(())
    }

    /// Read a whole range as typed words. The range size must be a
    /// multiple of the word size.
    pub fn read_typed_range<W: Word>(
        &self,
        range: &AddressRange,
        progress: &ProgressTask,
    ) -> Result<Vec<W>> {
        debug_assert_eq!(range.size() % W::SIZE as u64, 0, "range not word-aligned");
        let mut data = vec![W::default(); (range.size() / W::SIZE as u64) as usize];
        self.read_typed(&mut data, range.first(), progress)?;
        Ok(data)
    }

    /// Write words, applying device endianness.
    pub fn write_typed<W: Word>(
        &self,
        data: &[W],
        address: u32,
        progress: &ProgressTask,
    ) -> Result<()> {
        let mut bytes = vec![0u8; std::mem::size_of_val(data)];
        for (word, chunk) in data.iter().zip(bytes.chunks_exact_mut(W::SIZE)) {
            word.to_device_bytes(chunk, self.endianness);
        }
        self.write(&bytes, address, progress)
    }

    // =========================================================================
    // Segmentation
    // =========================================================================

    fn read_impl(
        &self,
        data: &mut [u8],
        address: u32,
        max_chunk: u32,
        progress: &ProgressTask,
    ) -> Result<()> {
        let mut busy_total = Duration::ZERO;
        let mut window = ErrorWindow::default();

        let mut offset = 0usize;
        let mut current_address = address;
        while offset < data.len() {
            let chunk_size = ((data.len() - offset) as u32).min(max_chunk) as usize;
            let chunk_range = AddressRange::first_and_size(current_address, chunk_size as u32);
            let chunk = &mut data[offset..offset + chunk_size];

            let read_result = self.protocol.read_data(chunk, current_address, TIMEOUT_DEFAULT);
            window.shift();
            match read_result {
                Ok(()) => {
                    if chunk_range.overlaps(&self.status_register) {
                        self.accumulate_status(&chunk_range, chunk);
                    }

                    offset += chunk_size;
                    current_address += chunk_size as u32;

                    if progress.advance_by_is_cancelled(chunk_size as u64) {
                        return Err(Error::with_detail(READ_ERROR, "User cancelled"));
                    }
                }
                Err(err) => {
                    self.handle_error_response(&err, &mut window, &mut busy_total, READ_ERROR)?;
                }
            }
        }

        Ok(())
    }

    fn write_impl(
        &self,
        data: &[u8],
        address: u32,
        timeout: Duration,
        max_chunk: u32,
        busy_total: &mut Duration,
        window: &mut ErrorWindow,
        progress: &ProgressTask,
    ) -> Result<()> {
        let mut offset = 0usize;
        let mut current_address = address;
        while offset < data.len() {
            let chunk_size = ((data.len() - offset) as u32).min(max_chunk) as usize;
            let chunk = &data[offset..offset + chunk_size];

            let write_result = self.protocol.write_data(chunk, current_address, timeout);
            window.shift();
            match write_result {
                Ok(()) => {
                    offset += chunk_size;
                    current_address += chunk_size as u32;

                    if progress.advance_by_is_cancelled(chunk_size as u64) {
                        return Err(Error::with_detail(WRITE_ERROR, "User cancelled"));
                    }
                }
                Err(err) => {
                    self.handle_error_response(&err, window, busy_total, WRITE_ERROR)?;
                }
            }
        }

        Ok(())
    }

    fn write_flash(
        &self,
        data: &[u8],
        address: u32,
        descriptor: &MemoryDescriptor,
        max_chunk: u32,
        busy_total: &mut Duration,
        window: &mut ErrorWindow,
        progress: &ProgressTask,
    ) -> Result<()> {
        let mut rest = data;
        let mut current_address = address;
        while !rest.is_empty() {
            if current_address > address {
                log::debug!("burst next sector");
            }
            let next_sector_start =
                u64::from(current_address / FLASH_BYTES_PER_SECTOR + 1) * u64::from(FLASH_BYTES_PER_SECTOR);
            let sector_size = (rest.len() as u64).min(next_sector_start - u64::from(current_address)) as usize;
            debug_assert!(sector_size > 0 && sector_size % descriptor.minimum_data_size as usize == 0);

            self.protocol.stats().increment_flash_burst_writes_count();
            let size_in_words = sector_size as u32 / descriptor.minimum_data_size;

            // The whole sector is retried on write failure; the burst-start
            // re-arms the device for the next attempt.
            let mut attempts = 0usize;
            loop {
                attempts += 1;

                loop {
                    match self.protocol.write_flash_burst_start(
                        current_address,
                        size_in_words,
                        TIMEOUT_WRITING_FLASH,
                    ) {
                        Ok(()) => break,
                        Err(err) => {
                            self.handle_error_response(&err, window, busy_total, WRITE_ERROR)?;
                        }
                    }
                }

                match self.write_impl(
                    &rest[..sector_size],
                    current_address,
                    TIMEOUT_WRITING_FLASH,
                    max_chunk,
                    busy_total,
                    window,
                    progress,
                ) {
                    Ok(()) => break,
                    Err(err) if attempts < MAX_ERRORS_IN_WINDOW => {
                        log::debug!(
                            "burst write failed in sector at {}, retry number: {attempts} ({})",
                            AddressRange::address_to_hex(current_address),
                            err.to_detailed_string(),
                        );
                    }
                    Err(err) => return Err(err),
                }
            }

            loop {
                match self.protocol.write_flash_burst_end(current_address, TIMEOUT_WRITING_FLASH) {
                    Ok(()) => break,
                    Err(err) => {
                        self.handle_error_response(&err, window, busy_total, WRITE_ERROR)?;
                    }
                }
            }

            rest = &rest[sector_size..];
            current_address += sector_size as u32;
        }

        Ok(())
    }

    // =========================================================================
    // Recovery Policy
    // =========================================================================

    /// Decide the fate of one failed packet: `Ok(())` means retry, an error
    /// surfaces to the caller.
    fn handle_error_response(
        &self,
        operation_error: &Error,
        window: &mut ErrorWindow,
        busy_total: &mut Duration,
        operation_name: &str,
    ) -> Result<()> {
        log::warn!("{}", operation_error.to_detailed_string());

        match operation_error.kind() {
            Some(ErrorKind::TransmissionFailed | ErrorKind::NoResponse) => {
                window.mark_failure();
                if window.failure_count() <= MAX_ERRORS_IN_WINDOW {
                    Ok(())
                } else {
                    Err(Error::tagged(
                        "Too many errors!",
                        format!(
                            "{} errors in last {ERROR_WINDOW_SIZE} packets",
                            window.failure_count()
                        ),
                        operation_error.kind().expect("matched above"),
                    ))
                }
            }
            Some(ErrorKind::DeviceBusy) => {
                *busy_total += BUSY_DEVICE_DELAY;
                if *busy_total < BUSY_DEVICE_TIMEOUT {
                    std::thread::sleep(BUSY_DEVICE_DELAY);
                    Ok(())
                } else {
                    Err(Error::tagged(
                        "Camera is busy!",
                        format!("busy delay total: {}ms", busy_total.as_millis()),
                        ErrorKind::DeviceBusy,
                    ))
                }
            }
            _ => Err(operation_error.rewrap(operation_name)),
        }
    }

    // =========================================================================
    // Checks
    // =========================================================================

    fn descriptor_with_checks(
        &self,
        address: u32,
        data_size: Option<u64>,
        operation_name: &str,
    ) -> Result<MemoryDescriptor> {
        if self.protocol.max_data_size() == 0 {
            return Err(Error::tagged(
                operation_name,
                "No connection! No data link attached or max packet size 0",
                ErrorKind::NoConnection,
            ));
        }

        if data_size == Some(0) {
            return Err(Error::with_detail(operation_name, "Data size = 0"));
        }

        if let Some(size) = data_size
            && size - 1 > u64::from(u32::MAX - address)
        {
            return Err(Error::with_detail(operation_name, "Memory overflow"));
        }

        let queried = AddressRange::first_and_size(address, data_size.unwrap_or(1) as u32);
        let descriptor = self
            .memory_space
            .read()
            .expect("memory space poisoned")
            .descriptor_for(&queried)
            .map_err(|err| Error::with_detail(operation_name, err.detail()))?;

        if address % descriptor.minimum_data_size != 0 {
            return Err(Error::with_detail(
                operation_name,
                format!(
                    "Invalid alignment - address: {} (must be multiple of {})",
                    AddressRange::address_to_hex(address),
                    descriptor.minimum_data_size
                ),
            ));
        }

        if let Some(size) = data_size
            && size % u64::from(descriptor.minimum_data_size) != 0
        {
            return Err(Error::with_detail(
                operation_name,
                format!(
                    "Invalid alignment - size: {size} (must be multiple of {})",
                    descriptor.minimum_data_size
                ),
            ));
        }

        Ok(descriptor)
    }

    /// Per-packet payload ceiling for a region: the smaller of the region's
    /// own limit and the link budget, rounded down to whole words.
    fn max_chunk_size(&self, descriptor: &MemoryDescriptor) -> u32 {
        let protocol_max =
            (self.protocol.max_data_size() / descriptor.minimum_data_size) * descriptor.minimum_data_size;
        debug_assert!(protocol_max > 0);
        descriptor.maximum_data_size.min(protocol_max)
    }

    fn accumulate_status(&self, chunk_range: &AddressRange, chunk: &[u8]) {
        debug_assert_eq!(
            chunk_range, &self.status_register,
            "STATUS is read as a whole aligned slot"
        );
        if !chunk_range.contains(&self.status_register) {
            return;
        }

        let offset = (self.status_register.first() - chunk_range.first()) as usize;
        let bytes: [u8; 4] = chunk[offset..offset + 4].try_into().expect("slot is four bytes");
        let value = u32::from_device_bytes(&bytes, self.endianness);

        let mut accumulated = self.accumulated_status.lock().expect("status accumulator poisoned");
        *accumulated = Some(accumulated.unwrap_or(0) | value);
    }
}

impl std::fmt::Debug for DeviceInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceInterface")
            .field("endianness", &self.endianness)
            .field("status_register", &self.status_register)
            .finish_non_exhaustive()
    }
}
