//! Error taxonomy for the mirror client.
//!
//! Wayland dispatch handlers cannot return errors, so components report a
//! [`Error`] back to the client state which latches the first fatal one and
//! stops processing events. Capture problems are reported as
//! [`SessionFailure`], most of which are recoverable.

use std::io;

use tracing::error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("failed to {what}: {source}")]
    Resource {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("required global {interface} (version >= {min_version}) not advertised")]
    MissingGlobal {
        interface: &'static str,
        min_version: u32,
    },

    #[error("capture session failed: {0}")]
    Session(#[from] SessionFailure),

    #[error("failed to connect to wayland display: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("wayland dispatch failed: {0}")]
    Dispatch(#[from] wayland_client::DispatchError),
}

impl Error {
    pub fn resource(what: &'static str, source: io::Error) -> Self {
        Error::Resource { what, source }
    }

    /// Whether this error must end the process. Only retryable session
    /// failures are survivable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Session(failure) => !failure.is_retryable(),
            _ => true,
        }
    }
}

/// Holds the first fatal error. Once set, event handlers stop acting on
/// events and the main loop returns the error.
#[derive(Debug, Default)]
pub struct FatalLatch {
    error: Option<Error>,
}

impl FatalLatch {
    pub fn is_set(&self) -> bool {
        self.error.is_some()
    }

    /// Latches `err` if it is fatal and nothing is latched yet. A
    /// recoverable error is handed back to the caller.
    pub fn latch(&mut self, err: Error) -> Option<Error> {
        if !err.is_fatal() {
            return Some(err);
        }
        if self.error.is_none() {
            error!("{err}");
            self.error = Some(err);
        }
        None
    }

    /// Returns the latched error, clearing the latch.
    pub fn take(&mut self) -> Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Malformed or contradictory data from the compositor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("compositor advertised {interface} twice")]
    DuplicateGlobal { interface: &'static str },

    #[error("bound global {interface} was removed")]
    GlobalRemoved { interface: &'static str },

    #[error("device id array is {got} bytes, expected {expected}")]
    DeviceIdSize { got: usize, expected: usize },

    #[error("format table size {size} is not a whole number of {record}-byte entries")]
    FormatTableSize { size: u32, record: usize },

    #[error("format index array is {len} bytes, not a whole number of u16 indices")]
    IndexArraySize { len: usize },

    #[error("format index {index} is out of bounds of format table ({len} entries)")]
    IndexOutOfBounds { index: u16, len: usize },
}

/// Why a capture session ended without presenting a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFailure {
    #[error("compositor reported the copy as failed")]
    CopyFailed,

    #[error("compositor cancelled the frame (reason {reason})")]
    Cancelled { reason: u32 },

    #[error("compositor only offered {offered}, this client uses {wanted} buffers")]
    UnsupportedBufferKind {
        offered: &'static str,
        wanted: &'static str,
    },

    #[error("frame carried no planes to import")]
    NoPlanes,

    #[error("cannot build buffer for {0}")]
    Import(String),

    #[error("format {format:?} has no negotiated modifiers")]
    UnresolvedFormat { format: drm_fourcc::DrmFourcc },

    #[error("dmabuf feedback for {format:?} is still being renegotiated")]
    NegotiationPending { format: drm_fourcc::DrmFourcc },

    #[error("no render device available for allocation")]
    NoRenderDevice,

    #[error("buffer allocation failed: {0}")]
    Allocation(String),
}

impl SessionFailure {
    /// Retryable failures leave every resource in place; the next
    /// output-enter (or continuous re-arm) starts a fresh session.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SessionFailure::UnresolvedFormat { .. }
                | SessionFailure::NoRenderDevice
                | SessionFailure::Allocation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drm_fourcc::DrmFourcc;
    use test_log::test;

    #[test]
    fn test_compositor_failures_are_retryable() {
        assert!(!Error::from(SessionFailure::CopyFailed).is_fatal());
        assert!(!Error::from(SessionFailure::Cancelled { reason: 1 }).is_fatal());
        assert!(!Error::from(SessionFailure::UnsupportedBufferKind {
            offered: "shm",
            wanted: "dmabuf",
        })
        .is_fatal());
        assert!(!Error::from(SessionFailure::NegotiationPending {
            format: DrmFourcc::Xrgb8888,
        })
        .is_fatal());
    }

    #[test]
    fn test_latch_keeps_first_fatal_error() {
        let mut latch = FatalLatch::default();
        assert!(latch.latch(SessionFailure::CopyFailed.into()).is_some());
        assert!(!latch.is_set());

        let first = ProtocolViolation::DuplicateGlobal {
            interface: "wl_compositor",
        };
        assert!(latch.latch(first.clone().into()).is_none());
        assert!(latch
            .latch(ProtocolViolation::IndexArraySize { len: 3 }.into())
            .is_none());
        assert!(latch.is_set());

        match latch.take() {
            Err(Error::ProtocolViolation(v)) => assert_eq!(v, first),
            other => panic!("unexpected {other:?}"),
        }
        assert!(latch.take().is_ok());
    }

    #[test]
    fn test_unresolved_format_is_fatal() {
        let err = Error::from(SessionFailure::UnresolvedFormat {
            format: DrmFourcc::Xrgb8888,
        });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_protocol_violations_are_fatal() {
        let err = Error::from(ProtocolViolation::DuplicateGlobal {
            interface: "wl_compositor",
        });
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "protocol violation: compositor advertised wl_compositor twice"
        );
    }
}
