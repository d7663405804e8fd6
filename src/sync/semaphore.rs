//! Named counting semaphores, used as the per-direction registration
//! locks.
//!
//! A registration semaphore is created with count 1; the party that
//! drains it is the sole writer (or reader) until it posts the count
//! back at tear-down. The kernel does not restore the count when a
//! holder crashes, so a crashed registrant leaves the direction
//! unavailable until the channel's names are removed and recreated.

use std::ffi::CString;
use std::time::Duration;

use nix::errno::Errno;

use crate::error::{setup_create_error, setup_open_error, Result, SeineError};
use crate::sync::{wait_loop, CancelToken, Deadline, WaitOutcome};

/// A POSIX named semaphore.
#[derive(Debug)]
pub struct NamedSemaphore {
    name: String,
    sem: *mut libc::sem_t,
}

// The sem_t handle is a process-wide kernel object reference; libc's
// sem_* entry points are thread-safe on it.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create (or reopen) the named semaphore with `initial` count.
    pub fn create(object_name: &str, permissions: u32, initial: u32) -> Result<Self> {
        let c_name = c_name(object_name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                permissions as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(setup_create_error(object_name, Errno::last()));
        }
        Ok(Self {
            name: object_name.to_string(),
            sem,
        })
    }

    /// Open an existing named semaphore.
    pub fn open(object_name: &str) -> Result<Self> {
        let c_name = c_name(object_name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(setup_open_error(object_name, Errno::last()));
        }
        Ok(Self {
            name: object_name.to_string(),
            sem,
        })
    }

    /// Take one count without blocking. Returns `false` when the count
    /// is exhausted.
    pub fn try_acquire(&self) -> Result<bool> {
        let rc = unsafe { libc::sem_trywait(self.sem) };
        if rc == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::EAGAIN | Errno::EINTR => Ok(false),
            e => Err(SeineError::platform(format!(
                "sem_trywait on '{}' failed: {}",
                self.name, e
            ))),
        }
    }

    /// Take one count, bounded by `timeout` and `cancel`.
    pub fn acquire(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<WaitOutcome> {
        wait_loop(Deadline::after(timeout), cancel, |slice| {
            if slice.is_zero() {
                return self.try_acquire();
            }
            let deadline = realtime_deadline(slice)?;
            let rc = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if rc == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::ETIMEDOUT | Errno::EINTR => Ok(false),
                e => Err(SeineError::platform(format!(
                    "sem_timedwait on '{}' failed: {}",
                    self.name, e
                ))),
            }
        })
    }

    /// Post one count back.
    pub fn release(&self) -> Result<()> {
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc == 0 {
            Ok(())
        } else {
            Err(SeineError::platform(format!(
                "sem_post on '{}' failed: {}",
                self.name,
                Errno::last()
            )))
        }
    }

    /// Remove the name from the namespace.
    pub fn unlink(object_name: &str) -> Result<()> {
        let c_name = c_name(object_name)?;
        let rc = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if rc == 0 || Errno::last() == Errno::ENOENT {
            Ok(())
        } else {
            Err(SeineError::platform(format!(
                "failed to unlink '{}': {}",
                object_name,
                Errno::last()
            )))
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

fn c_name(object_name: &str) -> Result<CString> {
    CString::new(object_name)
        .map_err(|_| SeineError::invalid_parameter("name", "object name contains a NUL byte"))
}

/// Absolute CLOCK_REALTIME timestamp `delay` from now, as sem_timedwait
/// expects.
fn realtime_deadline(delay: Duration) -> Result<libc::timespec> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(SeineError::platform(format!(
            "clock_gettime failed: {}",
            Errno::last()
        )));
    }
    let nanos = now.tv_nsec as i64 + delay.subsec_nanos() as i64;
    Ok(libc::timespec {
        tv_sec: now.tv_sec + delay.as_secs() as libc::time_t + nanos / 1_000_000_000,
        tv_nsec: nanos % 1_000_000_000,
    })
}
