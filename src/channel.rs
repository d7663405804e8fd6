//! Channel sessions: named-object setup, registration, serialized queue
//! operations, and the message-state signaling protocol.
//!
//! A channel binds one process to either the writer or the reader end of
//! a shared-memory FIFO. Seven named objects back a channel `N`: the
//! region `N_mmf`, the registration semaphores `N_ws` and `N_rs`, the
//! exclusive-access lock `N_eas`, and the manual-reset events `N_hme`
//! (has messages), `N_nme` (no messages), and `N_cce` (client
//! connected). The two message-state events are always in opposite
//! states once a session is live.

use std::sync::{Mutex, TryLockError};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{OpStatus, Result, SeineError};
use crate::layout::{self, HEADER_SIZE};
use crate::queue::{self, ChannelState, ReadOp, SliceWriter, VecReader, WriteOp};
use crate::region::{Scope, SharedRegion};
use crate::sync::event::NamedEvent;
use crate::sync::semaphore::NamedSemaphore;
use crate::sync::{CancelToken, Deadline, ExclusiveLock, WaitOutcome};

const SUFFIX_REGION: &str = "mmf";
const SUFFIX_WRITER_REGISTRATION: &str = "ws";
const SUFFIX_READER_REGISTRATION: &str = "rs";
const SUFFIX_EXCLUSIVE_ACCESS: &str = "eas";
const SUFFIX_HAS_MESSAGES: &str = "hme";
const SUFFIX_NO_MESSAGES: &str = "nme";
const SUFFIX_CLIENT_CONNECTED: &str = "cce";

/// Which end of the FIFO a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// The session produces messages.
    Outbound,
    /// The session consumes messages.
    Inbound,
}

/// Parameters for creating a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name; becomes the stem of every backing object name.
    pub name: String,
    /// Region capacity in bytes, header included.
    pub capacity: u64,
    /// Namespace the backing objects live in.
    pub scope: Scope,
    /// Unix permission bits applied to every created object.
    pub permissions: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            capacity: crate::config::DEFAULT_CAPACITY,
            scope: Scope::Local,
            permissions: crate::config::DEFAULT_PERMISSIONS,
        }
    }
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.capacity < HEADER_SIZE as u64 {
            return Err(SeineError::invalid_parameter(
                "capacity",
                format!("must be at least {} bytes", HEADER_SIZE),
            ));
        }
        if self.capacity > i64::MAX as u64 {
            return Err(SeineError::CapacityExceedsLogicalAddressSpace {
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SeineError::invalid_parameter("name", "cannot be empty"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(SeineError::invalid_parameter(
            "name",
            "must not contain '/' or NUL",
        ));
    }
    if name.len() > 200 {
        return Err(SeineError::invalid_parameter("name", "too long"));
    }
    Ok(())
}

/// Outcome of a single channel operation.
///
/// `state` is `None` only when the operation never reached the region,
/// i.e. the exclusive-access acquisition timed out or was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpResult {
    pub status: OpStatus,
    pub state: Option<ChannelState>,
}

impl OpResult {
    fn pending(status: OpStatus) -> Self {
        Self {
            status,
            state: None,
        }
    }
}

/// One end of a named shared-memory FIFO.
///
/// All operations take `&self` and are safe to call from multiple
/// threads; an in-process mutex composes with the cross-process
/// exclusive-access lock.
#[derive(Debug)]
pub struct Channel {
    name: String,
    scope: Scope,
    direction: Direction,
    capacity: u64,
    // Drop order: registration released first (explicitly, in Drop),
    // then signals, then the exclusive lock, then the region.
    registration: NamedSemaphore,
    has_messages: NamedEvent,
    no_messages: NamedEvent,
    client_connected: NamedEvent,
    access: ExclusiveLock,
    region: Mutex<SharedRegion>,
}

impl Channel {
    /// Create a channel and register as its sole writer.
    pub fn create_outbound(config: ChannelConfig) -> Result<Self> {
        Self::create(config, Direction::Outbound)
    }

    /// Create a channel and register as its sole reader.
    pub fn create_inbound(config: ChannelConfig) -> Result<Self> {
        Self::create(config, Direction::Inbound)
    }

    fn create(config: ChannelConfig, direction: Direction) -> Result<Self> {
        config.validate()?;
        let ChannelConfig {
            name,
            capacity,
            scope,
            permissions,
        } = config;

        let mut region =
            SharedRegion::create(&scope.object_name(&name, SUFFIX_REGION), capacity, permissions)?;
        let writer_reg = NamedSemaphore::create(
            &scope.object_name(&name, SUFFIX_WRITER_REGISTRATION),
            permissions,
            1,
        )?;
        let reader_reg = NamedSemaphore::create(
            &scope.object_name(&name, SUFFIX_READER_REGISTRATION),
            permissions,
            1,
        )?;
        let access =
            ExclusiveLock::create(&scope.object_name(&name, SUFFIX_EXCLUSIVE_ACCESS), permissions)?;
        let has_messages =
            NamedEvent::create(&scope.object_name(&name, SUFFIX_HAS_MESSAGES), permissions)?;
        let no_messages =
            NamedEvent::create(&scope.object_name(&name, SUFFIX_NO_MESSAGES), permissions)?;
        let client_connected =
            NamedEvent::create(&scope.object_name(&name, SUFFIX_CLIENT_CONNECTED), permissions)?;

        let registration = match direction {
            Direction::Outbound => writer_reg,
            Direction::Inbound => reader_reg,
        };
        if !registration.try_acquire()? {
            return Err(SeineError::ObjectAlreadyInUse { name });
        }

        // Format only after winning the registration, so a rejected
        // second server cannot clobber a live channel.
        layout::format(region.as_mut_slice(), capacity as i64)?;
        has_messages.reset();
        no_messages.set();
        client_connected.reset();

        debug!(
            "created {:?} channel '{}' with capacity {}",
            direction, name, capacity
        );
        Ok(Self {
            name,
            scope,
            direction,
            capacity,
            registration,
            has_messages,
            no_messages,
            client_connected,
            access,
            region: Mutex::new(region),
        })
    }

    /// Open an existing channel and register as its sole writer.
    pub fn open_outbound(name: &str, scope: Scope) -> Result<Self> {
        Self::open(name, scope, Direction::Outbound)
    }

    /// Open an existing channel and register as its sole reader.
    pub fn open_inbound(name: &str, scope: Scope) -> Result<Self> {
        Self::open(name, scope, Direction::Inbound)
    }

    fn open(name: &str, scope: Scope, direction: Direction) -> Result<Self> {
        validate_name(name)?;
        let region = SharedRegion::open(&scope.object_name(name, SUFFIX_REGION))?;
        let registration = NamedSemaphore::open(&scope.object_name(
            name,
            match direction {
                Direction::Outbound => SUFFIX_WRITER_REGISTRATION,
                Direction::Inbound => SUFFIX_READER_REGISTRATION,
            },
        ))?;
        let access =
            ExclusiveLock::open(&scope.object_name(name, SUFFIX_EXCLUSIVE_ACCESS))?;
        let has_messages = NamedEvent::open(&scope.object_name(name, SUFFIX_HAS_MESSAGES))?;
        let no_messages = NamedEvent::open(&scope.object_name(name, SUFFIX_NO_MESSAGES))?;
        let client_connected =
            NamedEvent::open(&scope.object_name(name, SUFFIX_CLIENT_CONNECTED))?;

        let header = layout::read_header(region.as_slice())?;
        header.validate()?;
        if header.capacity > region.len() as i64 {
            return Err(SeineError::corrupted(format!(
                "header capacity {} exceeds mapped size {}",
                header.capacity,
                region.len()
            )));
        }

        if !registration.try_acquire()? {
            return Err(SeineError::ObjectAlreadyInUse {
                name: name.to_string(),
            });
        }
        client_connected.set();

        debug!("opened {:?} session on channel '{}'", direction, name);
        Ok(Self {
            name: name.to_string(),
            scope,
            direction,
            capacity: header.capacity as u64,
            registration,
            has_messages,
            no_messages,
            client_connected,
            access,
            region: Mutex::new(region),
        })
    }

    /// Remove every named object backing `name`. Live sessions keep
    /// their handles; subsequent opens report the channel as missing.
    /// This is also the recovery path after a registrant crashed while
    /// holding its registration.
    pub fn remove(name: &str, scope: Scope) -> Result<()> {
        validate_name(name)?;
        SharedRegion::unlink(&scope.object_name(name, SUFFIX_REGION))?;
        NamedSemaphore::unlink(&scope.object_name(name, SUFFIX_WRITER_REGISTRATION))?;
        NamedSemaphore::unlink(&scope.object_name(name, SUFFIX_READER_REGISTRATION))?;
        ExclusiveLock::unlink(&scope.object_name(name, SUFFIX_EXCLUSIVE_ACCESS))?;
        NamedEvent::unlink(&scope.object_name(name, SUFFIX_HAS_MESSAGES))?;
        NamedEvent::unlink(&scope.object_name(name, SUFFIX_NO_MESSAGES))?;
        NamedEvent::unlink(&scope.object_name(name, SUFFIX_CLIENT_CONNECTED))?;
        Ok(())
    }

    /// Append a `length`-byte message filled by `op`.
    pub fn write(
        &self,
        op: &mut dyn WriteOp,
        length: u64,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<OpResult> {
        if self.direction != Direction::Outbound {
            return Err(SeineError::invalid_parameter(
                "direction",
                "write requires an outbound session",
            ));
        }
        let length = match i64::try_from(length) {
            Ok(length) => length,
            Err(_) => {
                return Ok(OpResult::pending(
                    OpStatus::LengthExceedsLogicalAddressSpace,
                ))
            }
        };
        self.with_region(timeout, cancel, |region| queue::write(region, length, op))
    }

    /// Consume the oldest message, handing its payload to `op`.
    pub fn read(
        &self,
        op: &mut dyn ReadOp,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<OpResult> {
        if self.direction != Direction::Inbound {
            return Err(SeineError::invalid_parameter(
                "direction",
                "read requires an inbound session",
            ));
        }
        self.with_region(timeout, cancel, |region| queue::read(region, op))
    }

    /// Snapshot the channel state under the exclusive-access lock.
    pub fn state(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<OpResult> {
        self.with_region(timeout, cancel, |region| {
            let state = queue::state(region)?;
            Ok((OpStatus::Completed, state))
        })
    }

    /// Copy `payload` into the queue as one message.
    pub fn send(
        &self,
        payload: &[u8],
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<OpResult> {
        let mut op = SliceWriter::new(payload);
        self.write(&mut op, payload.len() as u64, timeout, cancel)
    }

    /// Copy the oldest message out of the queue. The buffer is empty
    /// unless the status committed.
    pub fn receive(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<(OpResult, Vec<u8>)> {
        let mut payload = Vec::new();
        let mut op = VecReader::new(&mut payload);
        let result = self.read(&mut op, timeout, cancel)?;
        Ok((result, payload))
    }

    /// Wait until the opening party has connected.
    pub fn wait_client_connected(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<OpStatus> {
        Ok(self.client_connected.wait(timeout, cancel)?.into_status())
    }

    /// Wait until the queue signals at least one message. The signal is
    /// a hint; a racing reader may drain the queue first.
    pub fn wait_has_messages(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<OpStatus> {
        Ok(self.has_messages.wait(timeout, cancel)?.into_status())
    }

    /// Wait until the queue signals empty.
    pub fn wait_empty(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<OpStatus> {
        Ok(self.no_messages.wait(timeout, cancel)?.into_status())
    }

    /// Advisory view of the has-messages signal.
    pub fn has_messages_signaled(&self) -> bool {
        self.has_messages.is_set()
    }

    /// Advisory view of the no-messages signal.
    pub fn is_empty_signaled(&self) -> bool {
        self.no_messages.is_set()
    }

    /// Whether the opening party has connected.
    pub fn is_client_connected(&self) -> bool {
        self.client_connected.is_set()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Run `f` on the region with both locks held, then publish the
    /// message-state signals from the resulting state.
    fn with_region(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
        f: impl FnOnce(&mut [u8]) -> Result<(OpStatus, ChannelState)>,
    ) -> Result<OpResult> {
        let deadline = Deadline::after(timeout);

        let mut guard = loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Ok(OpResult::pending(OpStatus::Cancelled));
                }
            }
            match self.region.try_lock() {
                Ok(guard) => break guard,
                Err(TryLockError::WouldBlock) => {
                    if deadline.expired() {
                        return Ok(OpResult::pending(OpStatus::Timeout));
                    }
                    std::thread::sleep(Duration::from_micros(100));
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(SeineError::platform("in-process region lock poisoned"))
                }
            }
        };

        match self.access.acquire(deadline.remaining(), cancel)? {
            WaitOutcome::Completed => {}
            WaitOutcome::TimedOut => return Ok(OpResult::pending(OpStatus::Timeout)),
            WaitOutcome::Cancelled => return Ok(OpResult::pending(OpStatus::Cancelled)),
        }

        let result = f(guard.as_mut_slice());
        if let Ok((_, state)) = &result {
            self.publish_state(state);
        }
        self.access.release()?;
        drop(guard);

        let (status, state) = result?;
        Ok(OpResult {
            status,
            state: Some(state),
        })
    }

    /// Keep the two message-state signals coherent with the header.
    /// Runs inside the critical section, so the pair flips atomically
    /// with respect to other operations.
    fn publish_state(&self, state: &ChannelState) {
        if state.active_messages > 0 {
            self.no_messages.reset();
            self.has_messages.set();
        } else {
            self.has_messages.reset();
            self.no_messages.set();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Err(err) = self.registration.release() {
            warn!(
                "failed to release {:?} registration on '{}': {}",
                self.direction, self.name, err
            );
        }
        debug!("closed {:?} session on channel '{}'", self.direction, self.name);
    }
}
