//! TCSI Request/Response Engine
//!
//! Owns exactly one in-flight exchange at a time. Every request gets a
//! fresh 4-bit cyclic packet id; responses are matched by id, and a
//! well-formed response carrying a stale id (a late answer to an earlier,
//! timed-out request) is discarded and the engine keeps listening within
//! the original deadline.
//!
//! # Liveness
//!
//! Empty reads ([`ErrorKind::NoResponse`]) are counted; more than
//! [`MAX_STRAIGHT_NO_RESPONSES`] in a row latch the connection-lost flag.
//! The flag is sticky until a data link is (re-)attached.
//!
//! # Recovery
//!
//! After a structurally invalid frame the engine waits out the remainder
//! of the deadline and drops whatever else arrived, so the next exchange
//! starts on a frame boundary. A stale-but-valid frame does not trigger
//! the drain; only garbage does.

use crate::constants::{MAX_STRAIGHT_NO_RESPONSES, MINIMUM_PACKET_SIZE};
use crate::link::DataLink;
use crate::protocol::packet::Packet;
use crate::protocol::stats::StatsRecorder;
use crate::result::{Error, ErrorKind, Result};
use crate::timer::Deadline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PACKET_ID_MASK: u8 = 0x0F;

struct EngineState {
    link: Option<Arc<dyn DataLink>>,
    last_packet_id: u8,
    straight_no_responses: usize,
}

/// The TCSI protocol engine.
pub struct ProtocolTcsi {
    state: Mutex<EngineState>,
    stats: Arc<StatsRecorder>,
    connection_lost: AtomicBool,
}

impl ProtocolTcsi {
    /// Engine without a data link; attach one with
    /// [`ProtocolTcsi::set_data_link`].
    #[must_use]
    pub fn new(stats: Arc<StatsRecorder>) -> Self {
        Self {
            state: Mutex::new(EngineState {
                link: None,
                last_packet_id: 0,
                straight_no_responses: 0,
            }),
            stats,
            connection_lost: AtomicBool::new(false),
        }
    }

    /// Attach (or detach) the data link. Resets the no-response streak and
    /// clears the sticky connection-lost flag.
    pub fn set_data_link(&self, link: Option<Arc<dyn DataLink>>) {
        let mut state = self.state.lock().expect("engine poisoned");
        state.link = link;
        state.straight_no_responses = 0;
        self.connection_lost.store(false, Ordering::SeqCst);
    }

    /// The currently attached data link.
    #[must_use]
    pub fn data_link(&self) -> Option<Arc<dyn DataLink>> {
        self.state.lock().expect("engine poisoned").link.clone()
    }

    /// Largest payload a single packet can carry on the attached link:
    /// `min(link budget - frame overhead, 255)`. Zero without a usable link.
    #[must_use]
    pub fn max_data_size(&self) -> u32 {
        let state = self.state.lock().expect("engine poisoned");
        let Some(link) = state.link.as_ref() else {
            return 0;
        };
        if link.max_data_size() < MINIMUM_PACKET_SIZE {
            return 0;
        }
        let link_budget = (link.max_data_size() - MINIMUM_PACKET_SIZE) as u32;
        link_budget.min(u32::from(u8::MAX))
    }

    /// Whether the no-response streak has latched the connection as lost.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::SeqCst)
    }

    /// The shared statistics accumulator.
    #[must_use]
    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Read exactly `data.len()` bytes from `address` into `data`.
    pub fn read_data(&self, data: &mut [u8], address: u32, timeout: Duration) -> Result<()> {
        if data.is_empty() {
            debug_assert!(false, "zero-length read");
            return Ok(());
        }
        debug_assert!(data.len() <= usize::from(u8::MAX), "read exceeds one packet");

        let mut state = self.state.lock().expect("engine poisoned");
        let link = Self::require_link(&state, "Unable to read - no connection!")?;

        self.stats.increment_operations_count();

        let packet_id = Self::next_packet_id(&mut state);
        let request = Packet::read_request(packet_id, address, data.len() as u8);
        log::debug!("Read sending: {}", request.to_hex_string());

        let deadline = Deadline::new(timeout);
        if let Err(err) = link.write(request.bytes(), timeout) {
            self.stats.add_write_error(&err);
            return Err(err);
        }

        let response =
            self.receive_response(&link, &mut state, packet_id, address, data.len(), &deadline, "Read")?;
        data.copy_from_slice(response.payload());
        Ok(())
    }

    /// Write `data` at `address`.
    pub fn write_data(&self, data: &[u8], address: u32, timeout: Duration) -> Result<()> {
        if data.is_empty() {
            debug_assert!(false, "zero-length write");
            return Ok(());
        }

        let mut state = self.state.lock().expect("engine poisoned");
        let link = Self::require_link(&state, "Unable to write - no connection!")?;

        let packet_id = Self::next_packet_id(&mut state);
        let request = Packet::write_request(packet_id, address, data);
        self.send_confirmed(&link, &mut state, request, address, timeout, "Write")
    }

    /// Open a flash burst of `size_in_words` words at `address`.
    pub fn write_flash_burst_start(
        &self,
        address: u32,
        size_in_words: u32,
        timeout: Duration,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("engine poisoned");
        let link = Self::require_link(&state, "Unable to write - no connection!")?;

        let packet_id = Self::next_packet_id(&mut state);
        let request = Packet::flash_burst_start_request(packet_id, address, size_in_words);
        self.send_confirmed(&link, &mut state, request, address, timeout, "Write")
    }

    /// Close the flash burst at `address`.
    pub fn write_flash_burst_end(&self, address: u32, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().expect("engine poisoned");
        let link = Self::require_link(&state, "Unable to write - no connection!")?;

        let packet_id = Self::next_packet_id(&mut state);
        let request = Packet::flash_burst_end_request(packet_id, address);
        self.send_confirmed(&link, &mut state, request, address, timeout, "Write")
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn require_link(state: &EngineState, message: &str) -> Result<Arc<dyn DataLink>> {
        state.link.clone().ok_or_else(|| {
            Error::tagged(message, "no data link attached", ErrorKind::NoConnection)
        })
    }

    fn next_packet_id(state: &mut EngineState) -> u8 {
        state.last_packet_id = (state.last_packet_id + 1) & PACKET_ID_MASK;
        state.last_packet_id
    }

    /// Transmit a write-class request and wait for its empty OK confirmation.
    fn send_confirmed(
        &self,
        link: &Arc<dyn DataLink>,
        state: &mut EngineState,
        request: Packet,
        address: u32,
        timeout: Duration,
        action: &str,
    ) -> Result<()> {
        self.stats.increment_operations_count();
        log::debug!("{action} sending: {}", request.to_hex_string());

        let deadline = Deadline::new(timeout);
        if let Err(err) = link.write(request.bytes(), timeout) {
            self.stats.add_write_error(&err);
            return Err(err);
        }

        self.receive_response(link, state, request.packet_id(), address, 0, &deadline, action)
            .map(|_| ())
    }

    /// Keep receiving until a response for `packet_id` arrives or the frame
    /// stream turns invalid. Stale ids are logged and skipped.
    fn receive_response(
        &self,
        link: &Arc<dyn DataLink>,
        state: &mut EngineState,
        packet_id: u8,
        address: u32,
        data_size: usize,
        deadline: &Deadline,
        action: &str,
    ) -> Result<Packet> {
        loop {
            let response = self.receive_response_packet(link, state, deadline, action)?;

            if let Err(err) = response.validate_as_response(address) {
                log::warn!(
                    "Invalid response: {} (expected packetId: {packet_id} address: {} dataSize: {data_size})",
                    response.to_hex_string(),
                    crate::memory::AddressRange::address_to_hex(address),
                );
                let err = err.rewrap(format!("{action} error!"));
                self.stats.add_response_error(&err);
                Self::drop_pending(link, deadline.remaining());
                return Err(err);
            }

            if response.packet_id() == packet_id {
                return match response.validate_as_ok_response(address, data_size) {
                    Ok(()) => Ok(response),
                    Err(err) => {
                        let err = err.rewrap(format!("{action} error!"));
                        self.stats.add_response_error(&err);
                        Err(err)
                    }
                };
            }

            log::warn!(
                "Response dropped: {} (expected packetId: {packet_id})",
                response.to_hex_string(),
            );
        }
    }

    /// Read one frame: the 8-byte minimum first, then the declared payload.
    fn receive_response_packet(
        &self,
        link: &Arc<dyn DataLink>,
        state: &mut EngineState,
        deadline: &Deadline,
        action: &str,
    ) -> Result<Packet> {
        let mut received = vec![0u8; MINIMUM_PACKET_SIZE];
        if let Err(err) = link.read(&mut received, deadline.remaining()) {
            self.stats.add_read_error(&err);

            if err.kind() == Some(ErrorKind::NoResponse) {
                state.straight_no_responses += 1;
                if state.straight_no_responses > MAX_STRAIGHT_NO_RESPONSES {
                    log::warn!(
                        "Straight no responses: {}x - connection lost",
                        state.straight_no_responses
                    );
                    self.connection_lost.store(true, Ordering::SeqCst);
                } else {
                    log::warn!("Straight no responses: {}x", state.straight_no_responses);
                }
            }

            Self::drop_pending(link, deadline.remaining());
            return Err(err.rewrap(format!("{action} error!")));
        }
        state.straight_no_responses = 0;

        let mut response = Packet::from_bytes(received);
        let expected_size = match response.expected_data_size() {
            Ok(size) => size,
            Err(err) => {
                log::warn!("{action} received: {} (undecodable header)", response.to_hex_string());
                let err = err.rewrap(format!("{action} error!"));
                self.stats.add_response_error(&err);
                Self::drop_pending(link, deadline.remaining());
                return Err(err);
            }
        };

        if expected_size > 0 {
            let mut rest = vec![0u8; usize::from(expected_size)];
            if let Err(err) = link.read(&mut rest, deadline.remaining()) {
                log::debug!("{action} received: {}", response.to_hex_string());

                // The header already arrived, so the device is present: a
                // timeout here is a truncated frame, not silence.
                let err = if err.kind() == Some(ErrorKind::NoResponse) {
                    Error::tagged(
                        format!("{action} error!"),
                        err.detail().to_string(),
                        ErrorKind::TransmissionFailed,
                    )
                } else {
                    err.rewrap(format!("{action} error!"))
                };
                self.stats.add_read_error(&err);
                Self::drop_pending(link, deadline.remaining());
                return Err(err);
            }

            let mut frame = response.bytes().to_vec();
            frame.extend_from_slice(&rest);
            response = Packet::from_bytes(frame);
        }
        log::debug!("{action} received: {}", response.to_hex_string());

        Ok(response)
    }

    /// Wait out the rest of the deadline, then discard whatever arrived.
    fn drop_pending(link: &Arc<dyn DataLink>, rest_of_timeout: Duration) {
        std::thread::sleep(rest_of_timeout);
        link.drop_pending();
    }
}

impl std::fmt::Debug for ProtocolTcsi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolTcsi")
            .field("connection_lost", &self.is_connection_lost())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::DeviceStatus;
    use crate::test_utils::MockLink;

    fn engine_with_link() -> (ProtocolTcsi, Arc<MockLink>) {
        let link = Arc::new(MockLink::new(4096));
        let engine = ProtocolTcsi::new(Arc::new(StatsRecorder::new()));
        engine.set_data_link(Some(link.clone()));
        (engine, link)
    }

    const TIMEOUT: Duration = Duration::from_millis(20);

    // =========================================================================
    // Read Exchange Tests
    // =========================================================================

    #[test]
    fn read_exchange_round_trip() {
        let (engine, link) = engine_with_link();
        // First request uses packet id 1.
        link.push_frame(Packet::ok_response(1, 0x0000_1000, &[0xDE, 0xAD, 0xBE, 0xEF]).bytes());

        let mut data = [0u8; 4];
        engine.read_data(&mut data, 0x0000_1000, TIMEOUT).unwrap();
        assert_eq!(data, [0xDE, 0xAD, 0xBE, 0xEF]);

        // The request on the wire: id 1, READ, little-endian address, count 1, size 4.
        let written = link.written_frames();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0], vec![0xA1, 0x80, 0x00, 0x10, 0x00, 0x00, 0x01, 0x04, 0x36]);

        let stats = engine.stats().snapshot();
        assert_eq!(stats.operations_count, 1);
        assert!(stats.read_errors.results().is_empty());
    }

    #[test]
    fn packet_id_increments_and_wraps() {
        let (engine, link) = engine_with_link();
        for exchange in 0..18u32 {
            let expected_id = ((exchange + 1) & 0x0F) as u8;
            link.push_frame(Packet::ok_response(expected_id, 0x10, &[0x00]).bytes());
            let mut byte = [0u8; 1];
            engine.read_data(&mut byte, 0x10, TIMEOUT).unwrap();
            assert_eq!(link.written_frames().last().unwrap()[0] & 0x0F, expected_id);
        }
    }

    #[test]
    fn write_exchange_round_trip() {
        let (engine, link) = engine_with_link();
        link.push_frame(Packet::ok_response(1, 0x2000, &[]).bytes());

        engine.write_data(&[0x01, 0x02], 0x2000, TIMEOUT).unwrap();

        let written = link.written_frames();
        assert_eq!(written[0][1], 0x81);
        assert_eq!(&written[0][7..9], &[0x01, 0x02]);
    }

    #[test]
    fn burst_frames_round_trip() {
        let (engine, link) = engine_with_link();
        link.push_frame(Packet::ok_response(1, 0x8000, &[]).bytes());
        link.push_frame(Packet::ok_response(2, 0x8000, &[]).bytes());

        engine.write_flash_burst_start(0x8000, 150, TIMEOUT).unwrap();
        engine.write_flash_burst_end(0x8000, TIMEOUT).unwrap();

        let written = link.written_frames();
        assert_eq!(written[0][1], 0x82);
        assert_eq!(&written[0][7..11], &150u32.to_be_bytes());
        assert_eq!(written[1][1], 0x83);
    }

    // =========================================================================
    // Error Mapping Tests
    // =========================================================================

    #[test]
    fn no_link_is_no_connection() {
        let engine = ProtocolTcsi::new(Arc::new(StatsRecorder::new()));
        let err = engine.read_data(&mut [0u8; 2], 0, TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoConnection));
    }

    #[test]
    fn device_error_status_propagates_mapped_kind() {
        let (engine, link) = engine_with_link();
        link.push_frame(Packet::error_response(1, 0x3000, DeviceStatus::CameraNotReady).bytes());

        let err = engine.write_data(&[0x00], 0x3000, TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::DeviceBusy));
        assert_eq!(err.general(), "Write error!");

        assert_eq!(engine.stats().snapshot().response_errors.results().len(), 1);
    }

    #[test]
    fn corrupted_response_is_transmission_failed_and_drains() {
        let (engine, link) = engine_with_link();
        let mut bad = Packet::ok_response(1, 0x10, &[0x77]).bytes().to_vec();
        *bad.last_mut().unwrap() ^= 0xFF;
        link.push_frame(&bad);

        let err = engine.read_data(&mut [0u8; 1], 0x10, TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::TransmissionFailed));
        assert_eq!(link.drop_pending_calls(), 1);
    }

    #[test]
    fn stale_packet_id_is_skipped_then_matched() {
        let (engine, link) = engine_with_link();
        // A late answer from a previous exchange arrives first.
        link.push_frame(Packet::ok_response(9, 0x10, &[0x55]).bytes());
        link.push_frame(Packet::ok_response(1, 0x10, &[0x66]).bytes());

        let mut data = [0u8; 1];
        engine.read_data(&mut data, 0x10, TIMEOUT).unwrap();
        assert_eq!(data, [0x66]);
        // Stale frames are discarded without draining the link.
        assert_eq!(link.drop_pending_calls(), 0);
    }

    #[test]
    fn truncated_payload_is_transmission_failed() {
        let (engine, link) = engine_with_link();
        // Header declares 4 payload bytes but only the 8-byte minimum arrives.
        let full = Packet::ok_response(1, 0x10, &[1, 2, 3, 4]);
        link.push_frame(&full.bytes()[..MINIMUM_PACKET_SIZE]);

        let err = engine.read_data(&mut [0u8; 4], 0x10, TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::TransmissionFailed));
        // The truncation does not count toward the no-response streak.
        assert!(!engine.is_connection_lost());
    }

    // =========================================================================
    // Liveness Tests
    // =========================================================================

    #[test]
    fn three_straight_no_responses_latch_connection_lost() {
        let (engine, _link) = engine_with_link();

        for attempt in 0..3 {
            let err = engine.read_data(&mut [0u8; 1], 0x10, TIMEOUT).unwrap_err();
            assert_eq!(err.kind(), Some(ErrorKind::NoResponse));
            let expected_lost = attempt == 2;
            assert_eq!(engine.is_connection_lost(), expected_lost, "attempt {attempt}");
        }
    }

    #[test]
    fn connection_lost_is_sticky_across_success() {
        let (engine, link) = engine_with_link();
        for _ in 0..3 {
            let _ = engine.read_data(&mut [0u8; 1], 0x10, TIMEOUT);
        }
        assert!(engine.is_connection_lost());

        // Packet ids 1..=3 were consumed by the failed attempts.
        link.push_frame(Packet::ok_response(4, 0x10, &[0x42]).bytes());
        let mut data = [0u8; 1];
        engine.read_data(&mut data, 0x10, TIMEOUT).unwrap();

        assert!(engine.is_connection_lost(), "lost flag is sticky until re-attach");
    }

    #[test]
    fn reattaching_the_link_clears_connection_lost() {
        let (engine, link) = engine_with_link();
        for _ in 0..3 {
            let _ = engine.read_data(&mut [0u8; 1], 0x10, TIMEOUT);
        }
        assert!(engine.is_connection_lost());

        engine.set_data_link(Some(link));
        assert!(!engine.is_connection_lost());
    }

    #[test]
    fn interleaved_failures_do_not_latch() {
        let (engine, link) = engine_with_link();

        for round in 0..4 {
            // Two empty reads...
            for _ in 0..2 {
                let _ = engine.read_data(&mut [0u8; 1], 0x10, TIMEOUT);
            }
            // ...then an answer resets the streak.
            let id = (round * 3 + 3) & 0x0F;
            link.push_frame(Packet::ok_response(id as u8, 0x10, &[0]).bytes());
            engine.read_data(&mut [0u8; 1], 0x10, TIMEOUT).unwrap();
            assert!(!engine.is_connection_lost());
        }
    }

    // =========================================================================
    // Capacity Tests
    // =========================================================================

    #[test]
    fn max_data_size_is_payload_budget() {
        let engine = ProtocolTcsi::new(Arc::new(StatsRecorder::new()));
        assert_eq!(engine.max_data_size(), 0);

        engine.set_data_link(Some(Arc::new(MockLink::new(64))));
        assert_eq!(engine.max_data_size(), 64 - MINIMUM_PACKET_SIZE as u32);

        engine.set_data_link(Some(Arc::new(MockLink::new(4096))));
        assert_eq!(engine.max_data_size(), 255);

        engine.set_data_link(Some(Arc::new(MockLink::new(4))));
        assert_eq!(engine.max_data_size(), 0);
    }
}
