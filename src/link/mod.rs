//! Data Link Layer
//!
//! The lowest communication seam of the core: a blocking byte channel with
//! a per-call duration budget. Concrete transports (serial UART, vendor
//! GigE/USB bulk) live outside this crate and implement [`DataLink`];
//! everything above talks only to the trait.
//!
//! # Failure classification
//!
//! Implementations classify failed reads by what was observed on the wire:
//!
//! - nothing at all arrived within the budget → `NoResponse`
//! - some bytes arrived but not the requested amount →
//!   `TransmissionFailed`
//! - the underlying handle is gone → `NoConnection`
//!
//! The protocol engine's liveness accounting depends on this split; the
//! kinds are defined in [`crate::result::ErrorKind`].

use crate::result::Result;

use std::time::Duration;

mod baudrate;

pub use baudrate::Baudrate;

// =============================================================================
// Data Link Trait
// =============================================================================

/// Blocking byte channel with a deadline on every call.
///
/// Calls are not required to be concurrent-safe; the protocol engine above
/// serializes all access to a link.
pub trait DataLink: Send + Sync {
    /// Whether the link is currently open.
    fn is_open(&self) -> bool;

    /// Close the link. Further calls fail with
    /// [`crate::result::ErrorKind::NoConnection`].
    fn close(&self);

    /// Upper bound on the buffer length honoured by a single read or write.
    fn max_data_size(&self) -> usize;

    /// Fill `buffer` exactly within `timeout`.
    fn read(&self, buffer: &mut [u8], timeout: Duration) -> Result<()>;

    /// Send `buffer` exactly within `timeout`.
    fn write(&self, buffer: &[u8], timeout: Duration) -> Result<()>;

    /// Discard any received bytes not yet consumed by a read.
    fn drop_pending(&self);

    /// Whether the transport has observed an unrecoverable loss.
    fn is_connection_lost(&self) -> bool;
}

/// Extension for links with a negotiable line rate (serial transports).
pub trait DataLinkBaudrate: DataLink {
    /// Currently configured rate.
    fn baudrate(&self) -> Result<Baudrate>;

    /// Reconfigure the line rate.
    ///
    /// A transport may refuse rates its hardware cannot do; the refusal is
    /// reported as [`crate::result::ErrorKind::InvalidSettings`].
    fn set_baudrate(&self, baudrate: Baudrate) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{Error, ErrorKind};

    // Object safety: the engine stores the link as `Arc<dyn DataLink>`.
    struct ClosedLink;

    impl DataLink for ClosedLink {
        fn is_open(&self) -> bool {
            false
        }

        fn close(&self) {}

        fn max_data_size(&self) -> usize {
            0
        }

        fn read(&self, _buffer: &mut [u8], _timeout: Duration) -> Result<()> {
            Err(Error::tagged("Read error!", "link closed", ErrorKind::NoConnection))
        }

        fn write(&self, _buffer: &[u8], _timeout: Duration) -> Result<()> {
            Err(Error::tagged("Write error!", "link closed", ErrorKind::NoConnection))
        }

        fn drop_pending(&self) {}

        fn is_connection_lost(&self) -> bool {
            true
        }
    }

    #[test]
    fn data_link_is_object_safe() {
        let link: Box<dyn DataLink> = Box::new(ClosedLink);
        assert!(!link.is_open());
        assert!(link.is_connection_lost());
        assert_eq!(
            link.read(&mut [0u8; 4], Duration::ZERO).unwrap_err().kind(),
            Some(ErrorKind::NoConnection)
        );
    }
}
