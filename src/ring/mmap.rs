//! Owned shared memory mapping of an io_uring region.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::{self, NonNull};

/// A `MAP_SHARED` mapping of one io_uring region, unmapped on drop.
#[derive(Debug)]
pub struct Mmap {
    addr: NonNull<libc::c_void>,
    len: usize,
}

impl Mmap {
    /// Map `len` bytes of the ring file at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `mmap`.
    pub fn new(fd: BorrowedFd<'_>, offset: libc::off_t, len: usize) -> io::Result<Self> {
        // SAFETY: a fresh shared mapping of a kernel-provided region; the
        // kernel validates fd, offset and length.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let addr = NonNull::new(addr).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))?;
        Ok(Self { addr, len })
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut libc::c_void {
        self.addr.as_ptr()
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length mappings are rejected by the kernel.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to a `T` located `offset` bytes into the mapping.
    ///
    /// # Safety
    ///
    /// `offset` must come from the kernel's ring offset tables for this
    /// mapping, so that it is in bounds and suitably aligned for `T`.
    #[inline]
    pub unsafe fn offset<T>(&self, offset: u32) -> *mut T {
        // SAFETY: upheld by the caller.
        unsafe { self.addr.as_ptr().cast::<u8>().add(offset as usize).cast() }
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        // SAFETY: addr/len describe a mapping created in `new` and not yet
        // unmapped.
        unsafe {
            libc::munmap(self.addr.as_ptr(), self.len);
        }
    }
}
