//! Operation Results
//!
//! Every fallible operation in the core returns [`Result`], whose error
//! side is [`Error`]: a short user-facing *general* message, a *detail*
//! message for diagnostics, and an optional [`ErrorKind`] tag drawn from a
//! closed taxonomy.
//!
//! # Propagation policy
//!
//! The layer that first observes a failure stamps the kind. Layers above
//! may rewrap the general message (e.g. "Read error!") but must preserve
//! the detail and the kind verbatim - [`Error::rewrap`] does exactly that.
//!
//! # Recoverability
//!
//! `NoResponse`, `TransmissionFailed` and `DeviceBusy` are transient: the
//! device interface retries them locally (error window, busy back-off).
//! Everything else surfaces unchanged.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Three-state value holder: absent, failed, or present.
///
/// Property values and cached reads use this to distinguish "never read"
/// from "read and failed".
pub type OptionalResult<T> = Option<Result<T>>;

// =============================================================================
// Error Kind
// =============================================================================

/// Closed classification of device and transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No data link attached, or the link reports closed/lost
    NoConnection,
    /// Read completed with zero bytes - the device did not answer at all
    NoResponse,
    /// Framing, checksum, address or partial-read failure
    TransmissionFailed,
    /// Transmission ok, device refused: busy right now, try again later
    DeviceBusy,
    /// Transmission ok, device refused: insufficient credentials or bad region
    AccessDenied,
    /// Transmission ok, device refused: payload semantics rejected
    InvalidData,
    /// Transmission ok, device refused: some current setting prevents the operation
    InvalidSettings,
}

impl ErrorKind {
    /// Whether a retry of the same operation can reasonably succeed.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::NoResponse | ErrorKind::TransmissionFailed | ErrorKind::DeviceBusy
        )
    }

    /// Short name used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoConnection => "no connection",
            ErrorKind::NoResponse => "no response",
            ErrorKind::TransmissionFailed => "transmission failed",
            ErrorKind::DeviceBusy => "device busy",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::InvalidData => "invalid data",
            ErrorKind::InvalidSettings => "invalid settings",
        }
    }
}

// =============================================================================
// Error
// =============================================================================

/// A failed operation: general message, diagnostic detail, optional kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{general}")]
pub struct Error {
    general: String,
    detail: String,
    kind: Option<ErrorKind>,
}

impl Error {
    /// Error with a general message only.
    pub fn new(general: impl Into<String>) -> Self {
        Self::with_detail(general, String::new())
    }

    /// Error with general and detail messages.
    pub fn with_detail(general: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            general: general.into(),
            detail: detail.into(),
            kind: None,
        }
    }

    /// Error carrying the full triple.
    pub fn tagged(
        general: impl Into<String>,
        detail: impl Into<String>,
        kind: ErrorKind,
    ) -> Self {
        Self {
            general: general.into(),
            detail: detail.into(),
            kind: Some(kind),
        }
    }

    /// Replace the general message, preserving detail and kind.
    ///
    /// This is the only sanctioned way for a higher layer to re-describe a
    /// lower layer's failure.
    #[must_use]
    pub fn rewrap(&self, general: impl Into<String>) -> Self {
        Self {
            general: general.into(),
            detail: self.detail.clone(),
            kind: self.kind,
        }
    }

    /// The short user-facing message.
    #[must_use]
    pub fn general(&self) -> &str {
        &self.general
    }

    /// The diagnostic detail message (may be empty).
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The classification tag, if the failing layer stamped one.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// Whether the stamped kind is a transient one. Untagged errors are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_some_and(ErrorKind::is_recoverable)
    }

    /// Render "general (detail)" for diagnostics-heavy log lines.
    #[must_use]
    pub fn to_detailed_string(&self) -> String {
        if self.detail.is_empty() {
            self.general.clone()
        } else {
            format!("{} ({})", self.general, self.detail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Kind Classification Tests
    // =========================================================================

    #[test]
    fn recoverable_kinds() {
        assert!(ErrorKind::NoResponse.is_recoverable());
        assert!(ErrorKind::TransmissionFailed.is_recoverable());
        assert!(ErrorKind::DeviceBusy.is_recoverable());
    }

    #[test]
    fn non_recoverable_kinds() {
        assert!(!ErrorKind::NoConnection.is_recoverable());
        assert!(!ErrorKind::AccessDenied.is_recoverable());
        assert!(!ErrorKind::InvalidData.is_recoverable());
        assert!(!ErrorKind::InvalidSettings.is_recoverable());
    }

    // =========================================================================
    // Error Construction Tests
    // =========================================================================

    #[test]
    fn tagged_error_carries_all_parts() {
        let err = Error::tagged("Read error!", "short frame", ErrorKind::TransmissionFailed);
        assert_eq!(err.general(), "Read error!");
        assert_eq!(err.detail(), "short frame");
        assert_eq!(err.kind(), Some(ErrorKind::TransmissionFailed));
        assert!(err.is_recoverable());
    }

    #[test]
    fn untagged_error_is_not_recoverable() {
        let err = Error::with_detail("Write error!", "data size = 0");
        assert_eq!(err.kind(), None);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn rewrap_preserves_detail_and_kind() {
        let inner = Error::tagged("Response error!", "bad checksum", ErrorKind::TransmissionFailed);
        let outer = inner.rewrap("Write error!");
        assert_eq!(outer.general(), "Write error!");
        assert_eq!(outer.detail(), "bad checksum");
        assert_eq!(outer.kind(), Some(ErrorKind::TransmissionFailed));
    }

    #[test]
    fn display_uses_general_message() {
        let err = Error::tagged("Camera is busy!", "busy total: 10000ms", ErrorKind::DeviceBusy);
        assert_eq!(err.to_string(), "Camera is busy!");
        assert_eq!(err.to_detailed_string(), "Camera is busy! (busy total: 10000ms)");
    }
}
