//! Crate-wide error and result types.
//!
//! Every fallible path funnels into [`VimError`]: a coarse [`VimErrorKind`]
//! that callers branch on, paired with whatever detail the endpoint (or
//! this crate) produced for logs and operators.

use std::fmt;

/// What went wrong, coarsely. Retry and teardown decisions key off this,
/// never off message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VimErrorKind {
    /// Endpoint unreachable, TLS failure, or the transport broke mid-call
    ConnectionError,
    /// Login rejected or no active session
    AuthenticationError,
    /// SOAP fault returned by the endpoint
    SoapFault,
    /// A hypervisor task terminated in error state
    TaskError,
    /// Caller passed something the surface cannot act on
    InvalidArgument,
    /// Object absent from the inventory or the datastore
    NotFound,
    /// Response body could not be interpreted
    ParseError,
    /// Port-group / switch provisioning failure
    NetworkError,
    /// Datastore / virtual-disk failure
    StorageError,
    /// ServerTooBusy-class fault; the session is torn down and rebuilt
    Busy,
    /// HTTP timeout
    Timeout,
    /// Anything that fits no bucket above
    Other,
}

impl VimErrorKind {
    fn label(&self) -> &'static str {
        match self {
            VimErrorKind::ConnectionError => "connection",
            VimErrorKind::AuthenticationError => "auth",
            VimErrorKind::SoapFault => "soap fault",
            VimErrorKind::TaskError => "task",
            VimErrorKind::InvalidArgument => "invalid argument",
            VimErrorKind::NotFound => "not found",
            VimErrorKind::ParseError => "parse",
            VimErrorKind::NetworkError => "network",
            VimErrorKind::StorageError => "storage",
            VimErrorKind::Busy => "busy",
            VimErrorKind::Timeout => "timeout",
            VimErrorKind::Other => "error",
        }
    }
}

/// The crate's error: a kind plus the detail that goes with it.
#[derive(Debug, Clone)]
pub struct VimError {
    pub kind: VimErrorKind,
    pub message: String,
}

impl VimError {
    pub fn new(kind: VimErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::ConnectionError, msg)
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::AuthenticationError, msg)
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::SoapFault, msg)
    }

    pub fn task(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::TaskError, msg)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::InvalidArgument, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::NotFound, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::ParseError, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::NetworkError, msg)
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::StorageError, msg)
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::Busy, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(VimErrorKind::Timeout, msg)
    }

    /// Whether this error should tear the session down (transport-level
    /// failures and ServerTooBusy-class faults).
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self.kind,
            VimErrorKind::ConnectionError | VimErrorKind::Busy | VimErrorKind::Timeout
        )
    }
}

impl fmt::Display for VimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for VimError {}

impl From<reqwest::Error> for VimError {
    fn from(e: reqwest::Error) -> Self {
        // Timeouts and refused connections get their own kinds so the
        // session monitor can react; everything else reqwest can report
        // (bad request construction, body/decode trouble) stays Other.
        let kind = if e.is_timeout() {
            VimErrorKind::Timeout
        } else if e.is_connect() {
            VimErrorKind::ConnectionError
        } else {
            VimErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for VimError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("bad JSON from control plane: {e}"))
    }
}

/// Result alias used throughout the crate.
pub type VimResult<T> = Result<T, VimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_pairs_label_and_detail() {
        let e = VimError::busy("The server is too busy");
        assert_eq!(e.to_string(), "busy: The server is too busy");
        assert_eq!(VimError::invalid("x").to_string(), "invalid argument: x");
    }

    #[test]
    fn only_transport_class_errors_are_session_fatal() {
        assert!(VimError::connection("x").is_session_fatal());
        assert!(VimError::busy("x").is_session_fatal());
        assert!(VimError::timeout("x").is_session_fatal());
        assert!(!VimError::fault("x").is_session_fatal());
        assert!(!VimError::task("x").is_session_fatal());
        assert!(!VimError::not_found("x").is_session_fatal());
        assert!(!VimError::new(VimErrorKind::Other, "x").is_session_fatal());
    }
}
