//! Page-granular memory that is written once and then executed.
//!
//! Lifecycle:
//! ```text
//! CodeBuffer::acquire ──► write* ──► make_executable ──► ExecutableCode
//!      (RW)                              (RX)              (dropped → released)
//! ```
//! The mapping is owned by a single `Region` that moves from the writable handle to the
//! executable one, so it is released exactly once whichever handle is dropped.

use crate::{Error, Result};
use log::warn;

/// Page size used when the OS does not report one.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Raw mapping owned by exactly one buffer handle.
#[derive(Debug)]
struct Region {
    ptr: *mut u8,
    size: usize,
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(e) = unsafe { os::release(self.ptr, self.size) } {
            warn!("Could not release code buffer at {:?} - {}", self.ptr, e);
        }
    }
}

/// Writable code buffer. Not executable until sealed by `make_executable`.
#[derive(Debug)]
pub struct CodeBuffer {
    region: Region,
    /// Number of bytes written so far.
    len: usize,
}

impl CodeBuffer {
    /// Map at least `size` bytes of read/write memory, rounded up to whole pages.
    pub fn acquire(size: usize) -> Result<Self> {
        let page = os::page_size()?;
        let size = std::cmp::max(size, 1);
        let size = (size + page - 1) / page * page;
        let ptr = unsafe { os::allocate(size)? };
        Ok(CodeBuffer {
            region: Region { ptr, size },
            len: 0,
        })
    }

    /// Append `bytes` after whatever was written before.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity() - self.len {
            return Err(Error::BufferOverflow {
                len: self.len,
                requested: bytes.len(),
                capacity: self.capacity(),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.region.ptr.add(self.len),
                bytes.len(),
            );
        }
        self.len += bytes.len();
        Ok(())
    }

    /// Flip the mapping to read+execute. The writable handle is consumed.
    pub fn make_executable(self) -> Result<ExecutableCode> {
        let CodeBuffer { region, len } = self;
        unsafe { os::protect_executable(region.ptr, region.size)? };
        Ok(ExecutableCode { region, len })
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.size
    }

    /// Number of bytes written.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Sealed, read+execute code. Never written again.
#[derive(Debug)]
pub struct ExecutableCode {
    region: Region,
    len: usize,
}

// The mapping is immutable once sealed, so sharing the entry point across threads is sound.
unsafe impl Send for ExecutableCode {}
unsafe impl Sync for ExecutableCode {}

impl ExecutableCode {
    /// Entry point of the code.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.region.ptr
    }

    /// The code bytes that were written before sealing.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.region.ptr, self.len) }
    }

    /// Number of code bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer was sealed without any code in it.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(unix)]
mod os {
    use super::FALLBACK_PAGE_SIZE;
    use crate::Result;
    use nix::sys::mman::{self, MapFlags, ProtFlags};
    use nix::unistd::{sysconf, SysconfVar};
    use std::ffi::c_void;

    pub fn page_size() -> Result<usize> {
        Ok(sysconf(SysconfVar::PAGE_SIZE)?
            .map(|x| x as usize)
            .unwrap_or(FALLBACK_PAGE_SIZE))
    }

    pub unsafe fn allocate(size: usize) -> Result<*mut u8> {
        let ptr = mman::mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_ANON,
            -1,
            0,
        )?;
        Ok(ptr as *mut u8)
    }

    pub unsafe fn protect_executable(ptr: *mut u8, size: usize) -> Result<()> {
        mman::mprotect(
            ptr as *mut c_void,
            size,
            ProtFlags::PROT_READ | ProtFlags::PROT_EXEC,
        )?;
        Ok(())
    }

    pub unsafe fn release(ptr: *mut u8, size: usize) -> Result<()> {
        mman::munmap(ptr as *mut c_void, size)?;
        Ok(())
    }
}

#[cfg(windows)]
mod os {
    use super::FALLBACK_PAGE_SIZE;
    use crate::{Error, Result};
    use std::ffi::c_void;

    const MEM_COMMIT: u32 = 0x1000;
    const MEM_RESERVE: u32 = 0x2000;
    const MEM_RELEASE: u32 = 0x8000;
    const PAGE_READWRITE: u32 = 0x04;
    const PAGE_EXECUTE_READ: u32 = 0x20;

    extern "system" {
        fn VirtualAlloc(addr: *mut c_void, size: usize, ty: u32, protect: u32) -> *mut c_void;
        fn VirtualProtect(addr: *mut c_void, size: usize, protect: u32, old: *mut u32) -> i32;
        fn VirtualFree(addr: *mut c_void, size: usize, ty: u32) -> i32;
    }

    pub fn page_size() -> Result<usize> {
        Ok(FALLBACK_PAGE_SIZE)
    }

    pub unsafe fn allocate(size: usize) -> Result<*mut u8> {
        let ptr = VirtualAlloc(
            std::ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if ptr.is_null() {
            return Err(Error::last_os_error());
        }
        Ok(ptr as *mut u8)
    }

    pub unsafe fn protect_executable(ptr: *mut u8, size: usize) -> Result<()> {
        let mut old = 0u32;
        if VirtualProtect(ptr as *mut c_void, size, PAGE_EXECUTE_READ, &mut old) == 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    pub unsafe fn release(ptr: *mut u8, _size: usize) -> Result<()> {
        if VirtualFree(ptr as *mut c_void, 0, MEM_RELEASE) == 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    use super::FALLBACK_PAGE_SIZE;
    use crate::{Error, Result};

    pub fn page_size() -> Result<usize> {
        Ok(FALLBACK_PAGE_SIZE)
    }

    pub unsafe fn allocate(_size: usize) -> Result<*mut u8> {
        Err(Error::UnsupportedPlatform)
    }

    pub unsafe fn protect_executable(_ptr: *mut u8, _size: usize) -> Result<()> {
        Err(Error::UnsupportedPlatform)
    }

    pub unsafe fn release(_ptr: *mut u8, _size: usize) -> Result<()> {
        Ok(())
    }
}

#[cfg(all(test, any(unix, windows)))]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_rounds_to_page() {
        let buf = CodeBuffer::acquire(19).unwrap();
        let page = os::page_size().unwrap();
        assert_eq!(buf.capacity() % page, 0);
        assert!(buf.capacity() >= 19);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_write_then_seal() {
        let mut buf = CodeBuffer::acquire(16).unwrap();
        buf.write(&[0x90, 0x90]).unwrap();
        buf.write(&[0xc3]).unwrap();
        assert_eq!(buf.len(), 3);
        let code = buf.make_executable().unwrap();
        assert_eq!(code.as_bytes(), &[0x90, 0x90, 0xc3]);
        assert!(!code.as_ptr().is_null());
    }

    #[test]
    fn test_drop_without_sealing() {
        for _ in 0..64 {
            let mut buf = CodeBuffer::acquire(32).unwrap();
            buf.write(&[0xcc; 32]).unwrap();
        }
        // The mappings above were released; a fresh one is still available.
        let buf = CodeBuffer::acquire(32).unwrap();
        assert!(buf.make_executable().unwrap().is_empty());
    }

    #[test]
    fn test_write_past_capacity() {
        let mut buf = CodeBuffer::acquire(1).unwrap();
        let too_big = vec![0u8; buf.capacity() + 1];
        match buf.write(&too_big) {
            Err(Error::BufferOverflow {
                len: 0,
                requested,
                capacity,
            }) => {
                assert_eq!(requested, capacity + 1);
            }
            r => panic!("unexpected result {:?}", r),
        }
        // A failed write leaves the buffer usable.
        let fill = vec![0xccu8; buf.capacity()];
        buf.write(&fill).unwrap();
        assert!(buf.write(&[0]).is_err());
    }
}
