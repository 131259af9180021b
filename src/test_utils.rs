//! Testing utilities and mock implementations
//!
//! Mock data link for exercising the protocol engine and device interface
//! on the host without hardware.
//!
//! Only available when running `cargo test`.

#![cfg(test)]
#![allow(missing_docs)]

use crate::link::{Baudrate, DataLink, DataLinkBaudrate};
use crate::result::{Error, ErrorKind, Result};

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

// =============================================================================
// Mock Data Link
// =============================================================================

enum InboundStep {
    Bytes(VecDeque<u8>),
    Fail(Error),
}

/// Scripted byte channel.
///
/// Reads are served from a queue of scripted steps: byte runs are consumed
/// across read boundaries (so one pushed frame satisfies the engine's
/// 8-byte header read plus the payload read), and failure steps are
/// returned once when the consuming read reaches them. An exhausted queue
/// reads as silence: `NoResponse` when nothing was copied, otherwise
/// `TransmissionFailed`.
///
/// # Example
///
/// ```ignore
/// let link = Arc::new(MockLink::new(4096));
/// link.push_frame(Packet::ok_response(1, 0x1000, &[0xDE, 0xAD]).bytes());
/// engine.set_data_link(Some(link.clone()));
/// ```
pub struct MockLink {
    inbound: Mutex<VecDeque<InboundStep>>,
    written: Mutex<Vec<Vec<u8>>>,
    write_failures: Mutex<VecDeque<Error>>,
    max_data_size: usize,
    open: AtomicBool,
    drop_pending_calls: AtomicUsize,
    baudrate: Mutex<Baudrate>,
}

impl MockLink {
    /// Open mock link honouring buffers up to `max_data_size` per call.
    pub fn new(max_data_size: usize) -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            write_failures: Mutex::new(VecDeque::new()),
            max_data_size,
            open: AtomicBool::new(true),
            drop_pending_calls: AtomicUsize::new(0),
            baudrate: Mutex::new(Baudrate::B115200),
        }
    }

    /// Queue raw bytes to be served to subsequent reads.
    pub fn push_frame(&self, bytes: &[u8]) {
        self.inbound
            .lock()
            .unwrap()
            .push_back(InboundStep::Bytes(bytes.iter().copied().collect()));
    }

    /// Queue a read failure; it fires when a read reaches this step.
    pub fn push_read_failure(&self, error: Error) {
        self.inbound.lock().unwrap().push_back(InboundStep::Fail(error));
    }

    /// Queue a failure for the next write call.
    pub fn push_write_failure(&self, error: Error) {
        self.write_failures.lock().unwrap().push_back(error);
    }

    /// Frames written by the code under test, in order.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// How many times `drop_pending` was invoked.
    pub fn drop_pending_calls(&self) -> usize {
        self.drop_pending_calls.load(Ordering::SeqCst)
    }

    /// Bytes still queued for reading.
    pub fn pending_read_bytes(&self) -> usize {
        self.inbound
            .lock()
            .unwrap()
            .iter()
            .map(|step| match step {
                InboundStep::Bytes(bytes) => bytes.len(),
                InboundStep::Fail(_) => 0,
            })
            .sum()
    }
}

impl DataLink for MockLink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn max_data_size(&self) -> usize {
        self.max_data_size
    }

    fn read(&self, buffer: &mut [u8], _timeout: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(Error::tagged("Read error!", "link closed", ErrorKind::NoConnection));
        }

        let mut inbound = self.inbound.lock().unwrap();
        let mut copied = 0usize;

        while copied < buffer.len() {
            match inbound.front_mut() {
                Some(InboundStep::Bytes(bytes)) => {
                    while copied < buffer.len() {
                        let Some(byte) = bytes.pop_front() else {
                            break;
                        };
                        buffer[copied] = byte;
                        copied += 1;
                    }
                    if bytes.is_empty() {
                        inbound.pop_front();
                    }
                }
                Some(InboundStep::Fail(_)) => {
                    let Some(InboundStep::Fail(error)) = inbound.pop_front() else {
                        unreachable!();
                    };
                    return Err(error);
                }
                None => {
                    return Err(if copied == 0 {
                        Error::tagged("Read error!", "timed out - nothing received", ErrorKind::NoResponse)
                    } else {
                        Error::tagged(
                            "Read error!",
                            format!("timed out - received {copied} of {}", buffer.len()),
                            ErrorKind::TransmissionFailed,
                        )
                    });
                }
            }
        }

        Ok(())
    }

    fn write(&self, buffer: &[u8], _timeout: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(Error::tagged("Write error!", "link closed", ErrorKind::NoConnection));
        }
        if let Some(error) = self.write_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.written.lock().unwrap().push(buffer.to_vec());
        Ok(())
    }

    fn drop_pending(&self) {
        self.drop_pending_calls.fetch_add(1, Ordering::SeqCst);
        self.inbound.lock().unwrap().clear();
    }

    fn is_connection_lost(&self) -> bool {
        !self.is_open()
    }
}

impl DataLinkBaudrate for MockLink {
    fn baudrate(&self) -> Result<Baudrate> {
        Ok(*self.baudrate.lock().unwrap())
    }

    fn set_baudrate(&self, baudrate: Baudrate) -> Result<()> {
        // The mock pretends to be a slow UART that cannot do 3 Mbaud.
        if baudrate == Baudrate::B3000000 {
            return Err(Error::tagged(
                "Unsupported baudrate!",
                format!("{} bps", baudrate.bits_per_second()),
                ErrorKind::InvalidSettings,
            ));
        }
        *self.baudrate.lock().unwrap() = baudrate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_cross_frame_boundaries() {
        let link = MockLink::new(256);
        link.push_frame(&[1, 2, 3, 4, 5]);

        let mut head = [0u8; 2];
        link.read(&mut head, Duration::ZERO).unwrap();
        assert_eq!(head, [1, 2]);

        let mut tail = [0u8; 3];
        link.read(&mut tail, Duration::ZERO).unwrap();
        assert_eq!(tail, [3, 4, 5]);
    }

    #[test]
    fn empty_queue_reads_as_no_response() {
        let link = MockLink::new(256);
        let err = link.read(&mut [0u8; 4], Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoResponse));
    }

    #[test]
    fn partial_data_reads_as_transmission_failed() {
        let link = MockLink::new(256);
        link.push_frame(&[1, 2]);
        let err = link.read(&mut [0u8; 4], Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::TransmissionFailed));
    }

    #[test]
    fn drop_pending_discards_queued_bytes() {
        let link = MockLink::new(256);
        link.push_frame(&[1, 2, 3]);
        link.drop_pending();
        assert_eq!(link.pending_read_bytes(), 0);
        assert_eq!(link.drop_pending_calls(), 1);
    }

    #[test]
    fn baudrate_refusal_is_invalid_settings() {
        let link = MockLink::new(256);
        link.set_baudrate(Baudrate::B921600).unwrap();
        assert_eq!(link.baudrate().unwrap(), Baudrate::B921600);
        let err = link.set_baudrate(Baudrate::B3000000).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidSettings));
    }
}
