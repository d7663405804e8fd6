//! Error types and operation statuses for Seine

use nix::errno::Errno;
use serde::{Deserialize, Serialize};

/// Result type alias for Seine operations
pub type Result<T> = std::result::Result<T, SeineError>;

/// Setup and fatal errors for channels and their named backing objects.
///
/// Expected per-operation outcomes (empty queue, exhausted space,
/// timeouts) are reported in-band through [`OpStatus`]; this enum covers
/// the failures that abort a session or an operation outright.
#[derive(Debug, thiserror::Error)]
pub enum SeineError {
    /// I/O related errors (shm object operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// A named object required by `open` was never created
    #[error("Object does not exist: {name}")]
    ObjectDoesNotExist { name: String },

    /// The registration lock for this direction is already held
    #[error("Object already in use: {name}")]
    ObjectAlreadyInUse { name: String },

    /// The OS rejected the caller against the object's permissions
    #[error("Access denied: {name}")]
    AccessDenied { name: String },

    /// Creating a global-scope object requires privileges the caller lacks
    #[error("Elevation required to create global object: {name}")]
    ElevationRequired { name: String },

    /// The requested capacity cannot be represented on this platform
    #[error("Capacity {capacity} exceeds the logical address space")]
    CapacityExceedsLogicalAddressSpace { capacity: u64 },

    /// The region's header or embedded lists fail validation
    #[error("Region corrupted: {detail}")]
    RegionCorrupted { detail: String },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl SeineError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a region corruption error
    pub fn corrupted(detail: impl Into<String>) -> Self {
        Self::RegionCorrupted {
            detail: detail.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for SeineError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

/// Map an errno from creating a named object onto a setup error.
pub(crate) fn setup_create_error(name: &str, errno: Errno) -> SeineError {
    match errno {
        Errno::EACCES => SeineError::AccessDenied {
            name: name.to_string(),
        },
        Errno::EPERM => SeineError::ElevationRequired {
            name: name.to_string(),
        },
        Errno::ENAMETOOLONG | Errno::EINVAL => {
            SeineError::invalid_parameter("name", format!("'{}' is not a valid object name", name))
        }
        e => SeineError::platform(format!("failed to create '{}': {}", name, e)),
    }
}

/// Map an errno from opening a named object onto a setup error.
pub(crate) fn setup_open_error(name: &str, errno: Errno) -> SeineError {
    match errno {
        Errno::ENOENT => SeineError::ObjectDoesNotExist {
            name: name.to_string(),
        },
        Errno::EACCES => SeineError::AccessDenied {
            name: name.to_string(),
        },
        e => SeineError::platform(format!("failed to open '{}': {}", name, e)),
    }
}

/// Outcome of a single queue operation or wait.
///
/// Channels never fail with an error for expected outcomes; every
/// operation resolves to one of these codes. `Cancelled` and
/// `DelegateFailed` returned from a user callback roll the operation
/// back; any other callback status commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpStatus {
    /// The operation finished cleanly
    Completed,
    /// `read` found no message at the head
    QueueIsEmpty,
    /// Neither the free list nor the high-water mark can take the request
    OutOfSpace,
    /// A blocking wait expired
    Timeout,
    /// A cancel handle fired, or a callback signalled cancellation
    Cancelled,
    /// The user callback reported an unexpected failure
    DelegateFailed,
    /// The requested window size cannot be represented in a byte offset
    LengthExceedsLogicalAddressSpace,
    /// The requested window cannot be covered by the mapping
    LengthExceedsVirtualAddressSpace,
    /// Application-defined callback status; commits like `Completed`
    Custom(u32),
}

impl OpStatus {
    /// Whether a callback returning this status undoes the operation.
    pub fn rolls_back(self) -> bool {
        matches!(self, OpStatus::Cancelled | OpStatus::DelegateFailed)
    }

    /// Whether the operation ran to completion (including custom codes).
    pub fn is_success(self) -> bool {
        matches!(self, OpStatus::Completed | OpStatus::Custom(_))
    }
}
