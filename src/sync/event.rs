//! Manual-reset events shared across processes.
//!
//! Each event is a single 32-bit state word in its own tiny shared
//! memory object, with futex wait/wake for blocking. Set and clear are
//! plain stores; waking is level-triggered, so a waiter that races a
//! reset simply observes the cleared word and keeps waiting. That makes
//! a wake a hint to re-check state, not a guarantee by itself.

use std::fs::File;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::error::{setup_create_error, setup_open_error, Result, SeineError};
use crate::sync::{wait_loop, CancelToken, Deadline, WaitOutcome};

const CLEAR: u32 = 0;
const SET: u32 = 1;

/// A named cross-process manual-reset event.
#[derive(Debug)]
pub struct NamedEvent {
    name: String,
    mmap: MmapMut,
    _file: File,
}

impl NamedEvent {
    /// Create (or reopen) the named event. A fresh object starts clear;
    /// reopening preserves the current state.
    pub fn create(object_name: &str, permissions: u32) -> Result<Self> {
        let fd = shm_open(
            object_name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(permissions),
        )
        .map_err(|e| setup_create_error(object_name, e))?;
        let file = File::from(fd);
        file.set_len(std::mem::size_of::<AtomicU32>() as u64)
            .map_err(|e| SeineError::from_io(e, "failed to size event object"))?;
        Self::map(object_name, file)
    }

    /// Open an existing named event.
    pub fn open(object_name: &str) -> Result<Self> {
        let fd = shm_open(object_name, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| setup_open_error(object_name, e))?;
        Self::map(object_name, File::from(fd))
    }

    fn map(object_name: &str, file: File) -> Result<Self> {
        let mmap = unsafe {
            MmapOptions::new()
                .len(std::mem::size_of::<AtomicU32>())
                .map_mut(&file)
        }
        .map_err(|e| SeineError::from_io(e, "failed to map event object"))?;
        Ok(Self {
            name: object_name.to_string(),
            mmap,
            _file: file,
        })
    }

    fn word(&self) -> &AtomicU32 {
        // The mapping is MAP_SHARED and writable; all mutation goes
        // through the atomic.
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU32) }
    }

    /// Raise the event and wake every waiter.
    pub fn set(&self) {
        if self.word().swap(SET, Ordering::SeqCst) != SET {
            self.wake_all();
        }
    }

    /// Clear the event. Waiters that have not yet woken keep waiting.
    pub fn reset(&self) {
        self.word().store(CLEAR, Ordering::SeqCst);
    }

    /// Current state of the event.
    pub fn is_set(&self) -> bool {
        self.word().load(Ordering::SeqCst) == SET
    }

    /// Wait until the event is set, bounded by `timeout` and `cancel`.
    pub fn wait(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<WaitOutcome> {
        wait_loop(Deadline::after(timeout), cancel, |slice| {
            if self.is_set() {
                return Ok(true);
            }
            if !slice.is_zero() {
                self.futex_wait(slice)?;
            }
            Ok(self.is_set())
        })
    }

    fn futex_wait(&self, timeout: Duration) -> Result<()> {
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word().as_ptr(),
                libc::FUTEX_WAIT,
                CLEAR,
                &ts as *const libc::timespec,
                0usize,
                0u32,
            )
        };
        if rc == -1 {
            match Errno::last() {
                // Word changed, wait expired, or signal: re-check state.
                Errno::EAGAIN | Errno::ETIMEDOUT | Errno::EINTR => Ok(()),
                e => Err(SeineError::platform(format!(
                    "futex wait on '{}' failed: {}",
                    self.name, e
                ))),
            }
        } else {
            Ok(())
        }
    }

    fn wake_all(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word().as_ptr(),
                libc::FUTEX_WAKE,
                libc::c_int::MAX,
                0usize,
                0usize,
                0u32,
            );
        }
    }

    /// Remove the name from the namespace.
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
