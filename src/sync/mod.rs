//! Cross-process synchronization primitives for channel sessions.
//!
//! Three kinds of named objects back the protocol: counting semaphores
//! for the per-direction registration locks, a file-lock based exclusive
//! lock serializing queue operations, and futex-backed manual-reset
//! events for the message-state and client-connected signals.
//!
//! Every blocking entry point composes a caller-supplied timeout with an
//! optional [`CancelToken`]; waits run as a loop of bounded kernel waits
//! so that whichever of the two fires first wins.

pub mod event;
pub mod semaphore;

use std::fs::File;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::error::{setup_create_error, setup_open_error, OpStatus, Result, SeineError};

/// Longest single kernel wait before the loop re-checks cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// How a composed wait resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The waited-for condition held before timeout or cancellation.
    Completed,
    /// The timeout expired first.
    TimedOut,
    /// The cancel handle fired first.
    Cancelled,
}

impl WaitOutcome {
    /// The operation status this outcome maps onto.
    pub fn into_status(self) -> OpStatus {
        match self {
            WaitOutcome::Completed => OpStatus::Completed,
            WaitOutcome::TimedOut => OpStatus::Timeout,
            WaitOutcome::Cancelled => OpStatus::Cancelled,
        }
    }
}

/// Cooperative cancellation handle shared between a waiter and the code
/// that wants to wake it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Waiters observe it within one wait slice.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Absolute point a composed wait gives up at; `None` waits forever.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Time left, or `None` for an unbounded wait.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Bounded quantum for the next kernel wait.
    pub fn slice(&self) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(WAIT_SLICE),
            None => WAIT_SLICE,
        }
    }
}

/// Drive `attempt` until it succeeds, the deadline passes, or the token
/// fires. `attempt` receives the wait quantum it may block for; a zero
/// quantum means it must not block, which makes a zero timeout a single
/// non-blocking try.
pub(crate) fn wait_loop(
    deadline: Deadline,
    cancel: Option<&CancelToken>,
    mut attempt: impl FnMut(Duration) -> Result<bool>,
) -> Result<WaitOutcome> {
    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
        }
        if attempt(deadline.slice())? {
            return Ok(WaitOutcome::Completed);
        }
        if deadline.expired() {
            return Ok(WaitOutcome::TimedOut);
        }
    }
}

/// Cross-process exclusive lock over a named shared object.
///
/// Backed by `flock`, so the kernel releases it when the holder's file
/// description goes away, including on a crash mid-operation. Distinct
/// sessions in one process exclude each other too, since each holds its
/// own open file description.
#[derive(Debug)]
pub struct ExclusiveLock {
    name: String,
    file: File,
}

impl ExclusiveLock {
    pub fn create(object_name: &str, permissions: u32) -> Result<Self> {
        let fd = shm_open(
            object_name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(permissions),
        )
        .map_err(|e| setup_create_error(object_name, e))?;
        Ok(Self {
            name: object_name.to_string(),
            file: File::from(fd),
        })
    }

    pub fn open(object_name: &str) -> Result<Self> {
        let fd = shm_open(object_name, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| setup_open_error(object_name, e))?;
        Ok(Self {
            name: object_name.to_string(),
            file: File::from(fd),
        })
    }

    /// Acquire the lock, bounded by `timeout` and `cancel`.
    pub fn acquire(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<WaitOutcome> {
        let fd = self.file.as_raw_fd();
        wait_loop(Deadline::after(timeout), cancel, |slice| {
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(true);
            }
            match Errno::last() {
                // flock reports EWOULDBLOCK, which aliases EAGAIN here.
                Errno::EAGAIN | Errno::EINTR => {
                    if !slice.is_zero() {
                        std::thread::sleep(slice.min(Duration::from_millis(1)));
                    }
                    Ok(false)
                }
                e => Err(SeineError::platform(format!(
                    "flock on '{}' failed: {}",
                    self.name, e
                ))),
            }
        })
    }

    /// Release a previously acquired lock.
    pub fn release(&self) -> Result<()> {
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(SeineError::platform(format!(
                "unlock of '{}' failed: {}",
                self.name,
                Errno::last()
            )))
        }
    }

    /// Remove the backing name from the namespace.
    pub fn unlink(object_name: &str) -> Result<()> {
        match shm_unlink(object_name) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(SeineError::platform(format!(
                "failed to unlink '{}': {}",
                object_name, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("/seine_sync_{}_{}", std::process::id(), tag)
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_wait_loop_zero_timeout_tries_once() {
        let mut calls = 0;
        let outcome = wait_loop(
            Deadline::after(Some(Duration::ZERO)),
            None,
            |_| {
                calls += 1;
                Ok(false)
            },
        )
        .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_wait_loop_cancellation_wins() {
        let token = CancelToken::new();
        token.cancel();
        let outcome = wait_loop(Deadline::after(None), Some(&token), |_| Ok(false)).unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[test]
    fn test_exclusive_lock_excludes_other_sessions() {
        let name = unique("lock");
        let a = ExclusiveLock::create(&name, 0o600).unwrap();
        let b = ExclusiveLock::open(&name).unwrap();

        assert_eq!(
            a.acquire(Some(Duration::from_millis(50)), None).unwrap(),
            WaitOutcome::Completed
        );
        assert_eq!(
            b.acquire(Some(Duration::from_millis(50)), None).unwrap(),
            WaitOutcome::TimedOut
        );

        a.release().unwrap();
        assert_eq!(
            b.acquire(Some(Duration::from_millis(50)), None).unwrap(),
            WaitOutcome::Completed
        );
        b.release().unwrap();

        ExclusiveLock::unlink(&name).unwrap();
    }
}
