//! # Seine - Cross-Process Shared Memory Message Queue
//!
//! Seine is a shared-memory FIFO for exactly one producer and one
//! consumer running in separate processes on the same host. A named
//! backing region holds the queue; a handful of named synchronization
//! objects serialize access and signal state across the process
//! boundary.
//!
//! ## Features
//!
//! - **Named channels**: POSIX shared memory plus named semaphores,
//!   a crash-safe exclusive lock, and futex-backed events
//! - **Embedded allocator**: first-fit free list with immediate
//!   coalescing, living entirely inside the mapped region
//! - **Callback windows**: producers and consumers work directly on
//!   byte windows over the region, with commit/rollback driven by the
//!   callback's status
//! - **Single-writer/single-reader registration**: a second writer or
//!   reader on the same channel is refused at setup time
//! - **Timeouts and cancellation**: every blocking call composes a
//!   deadline with an optional cancel handle
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  Channel session                 │
//! │  registration · exclusive access · state signals │
//! ├──────────────────────────────────────────────────┤
//! │            Queue operations (write/read)         │
//! ├──────────────────────────────────────────────────┤
//! │        Allocator (free list + watermark)         │
//! ├──────────────────────────────────────────────────┤
//! │      Region layout (header + node codecs)        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use seine::{Channel, ChannelConfig, Scope};
//!
//! let server = Channel::create_inbound(ChannelConfig::new("metrics", 1 << 20))?;
//! let client = Channel::open_outbound("metrics", Scope::Local)?;
//!
//! client.send(b"hello", None, None)?;
//! let (_result, payload) = server.receive(None, None)?;
//! assert_eq!(payload, b"hello");
//! # seine::Channel::remove("metrics", Scope::Local)?;
//! # Ok::<(), seine::SeineError>(())
//! ```

pub mod allocator;
pub mod channel;
pub mod error;
pub mod layout;
pub mod queue;
pub mod region;
pub mod sync;

pub use channel::{Channel, ChannelConfig, Direction, OpResult};
pub use error::{OpStatus, Result, SeineError};
pub use queue::{ChannelState, ReadOp, SliceWriter, VecReader, WriteOp};
pub use region::{Scope, SharedRegion};
pub use sync::{CancelToken, WaitOutcome};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Suggested capacity for a channel's backing region (1 GiB)
    pub const DEFAULT_CAPACITY: u64 = 1 << 30;

    /// Default Unix permission bits for the named objects backing a channel
    pub const DEFAULT_PERMISSIONS: u32 = 0o644;
}
