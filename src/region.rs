//! POSIX shared memory regions backing a channel.

use std::fs::File;

use memmap2::{MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use serde::{Deserialize, Serialize};

use crate::error::{setup_create_error, setup_open_error, Result, SeineError};

/// Kernel namespace a channel's named objects live in.
///
/// POSIX shared object names form a single flat namespace; local scope
/// carves out a per-user corner of it, global scope uses the name as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Local,
    Global,
}

impl Scope {
    /// Full object name for a channel primitive, e.g. `/u1000.chan_eas`.
    pub(crate) fn object_name(self, channel: &str, suffix: &str) -> String {
        match self {
            Scope::Global => format!("/{}_{}", channel, suffix),
            Scope::Local => {
                let uid = unsafe { libc::getuid() };
                format!("/u{}.{}_{}", uid, channel, suffix)
            }
        }
    }
}

/// A named, memory-mapped shared region.
#[derive(Debug)]
pub struct SharedRegion {
    name: String,
    mmap: MmapMut,
    _file: File,
    len: usize,
}

impl SharedRegion {
    /// Create (or reopen) the named region and size it to `size` bytes.
    pub fn create(object_name: &str, size: u64, permissions: u32) -> Result<Self> {
        let len = checked_len(size)?;
        let fd = shm_open(
            object_name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(permissions),
        )
        .map_err(|e| setup_create_error(object_name, e))?;
        let file = File::from(fd);
        file.set_len(size)
            .map_err(|e| SeineError::from_io(e, "failed to size shared region"))?;
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file) }
            .map_err(|e| SeineError::from_io(e, "failed to map shared region"))?;
        Ok(Self {
            name: object_name.to_string(),
            mmap,
            _file: file,
            len,
        })
    }

    /// Open an existing named region at its current size.
    pub fn open(object_name: &str) -> Result<Self> {
        let fd = shm_open(object_name, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| setup_open_error(object_name, e))?;
        let file = File::from(fd);
        let size = file
            .metadata()
            .map_err(|e| SeineError::from_io(e, "failed to stat shared region"))?
            .len();
        let len = checked_len(size)?;
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file) }
            .map_err(|e| SeineError::from_io(e, "failed to map shared region"))?;
        Ok(Self {
            name: object_name.to_string(),
            mmap,
            _file: file,
            len,
        })
    }

    /// Remove the name from the namespace. Existing mappings stay valid.
    pub fn unlink(object_name: &str) -> Result<()> {
        match shm_unlink(object_name) {
            Ok(()) | Err(nix::errno::Errno::ENOENT) => Ok(()),
            Err(e) => Err(SeineError::platform(format!(
                "failed to unlink '{}': {}",
                object_name, e
            ))),
        }
    }

    /// The mapped bytes (read-only view).
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// The mapped bytes (mutable view).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The full object name this region was created or opened with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn checked_len(size: u64) -> Result<usize> {
    let len = usize::try_from(size)
        .map_err(|_| SeineError::CapacityExceedsLogicalAddressSpace { capacity: size })?;
    if len > isize::MAX as usize {
        return Err(SeineError::CapacityExceedsLogicalAddressSpace { capacity: size });
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("/seine_region_{}_{}", std::process::id(), tag)
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(Scope::Global.object_name("chan", "eas"), "/chan_eas");
        let local = Scope::Local.object_name("chan", "eas");
        assert!(local.starts_with("/u"));
        assert!(local.ends_with(".chan_eas"));
    }

    #[test]
    fn test_create_map_write_read() {
        let name = unique("rw");
        let mut region = SharedRegion::create(&name, 4096, 0o600).unwrap();
        assert_eq!(region.len(), 4096);
        region.as_mut_slice()[0..4].copy_from_slice(b"abcd");

        let other = SharedRegion::open(&name).unwrap();
        assert_eq!(&other.as_slice()[0..4], b"abcd");

        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn test_open_missing_region() {
        let err = SharedRegion::open("/seine_region_never_created").unwrap_err();
        assert!(matches!(err, SeineError::ObjectDoesNotExist { .. }));
    }

    #[test]
    fn test_unlink_missing_is_ok() {
        SharedRegion::unlink("/seine_region_never_created").unwrap();
    }
}
