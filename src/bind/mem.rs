//! This module contains the capability object for staging code memory
//! between writable and executable.

use std::ptr::NonNull;

use region::Protection;

/// A span of memory that generated code is written into and executed from.
///
/// Two configurations exist. [`from_rwx`](Self::from_rwx) spans live in
/// memory already mapped read-write-execute, so the staging transitions only
/// perform instruction-cache maintenance. [`from_paged`](Self::from_paged)
/// spans flip their pages' protection between read-write and read-execute on
/// each transition.
pub struct ExecutableBuffer {
    /// Start of the span
    ptr: NonNull<u8>,
    /// Length of the span in bytes
    len: usize,
    /// Whether transitions flip page protection
    paged: bool,
}

impl ExecutableBuffer {
    /// Wraps a span living in read-write-execute memory. Transitions never
    /// touch page protection.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `len` bytes of reads, writes and execution
    /// for the buffer's lifetime.
    pub unsafe fn from_rwx(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            paged: false,
        }
    }

    /// Wraps a span whose pages are flipped between read-write and
    /// read-execute by the staging transitions.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `len` bytes for the buffer's lifetime.
    /// Protection changes act on whole pages: every page overlapping the
    /// span is affected, so data sharing a page with the span (such as
    /// neighboring pool chunks) changes protection along with it.
    pub unsafe fn from_paged(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            paged: true,
        }
    }

    /// Start of the span.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the span is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stages the span for writing.
    pub fn make_writable(&mut self) -> Result<(), region::Error> {
        if self.paged {
            // Safety: the constructor's contract covers the span; paged mode
            // accepts whole-page granularity
            unsafe { region::protect(self.ptr.as_ptr(), self.len, Protection::READ_WRITE)? };
        }
        Ok(())
    }

    /// Stages the span for execution, synchronizing the instruction cache
    /// with any writes made since
    /// [`make_writable`](Self::make_writable).
    pub fn make_executable(&mut self) -> Result<(), region::Error> {
        flush_icache(self.ptr.as_ptr(), self.len);
        if self.paged {
            // Safety: same contract as make_writable
            unsafe { region::protect(self.ptr.as_ptr(), self.len, Protection::READ_EXECUTE)? };
        }
        Ok(())
    }
}

/// Makes written instructions visible to the instruction fetcher.
///
/// AArch64 caches are not coherent between data writes and instruction
/// fetches; x86 keeps them coherent on its own, so elsewhere this is a
/// no-op.
fn flush_icache(ptr: *mut u8, len: usize) {
    #[cfg(all(target_arch = "aarch64", target_os = "linux"))]
    {
        extern "C" {
            /// Compiler-runtime cache maintenance over a byte range
            fn __clear_cache(begin: *mut core::ffi::c_char, end: *mut core::ffi::c_char);
        }
        // Safety: the span is valid per the buffer constructor's contract
        unsafe { __clear_cache(ptr.cast(), ptr.add(len).cast()) };
    }
    #[cfg(all(target_arch = "aarch64", target_os = "macos"))]
    {
        extern "C" {
            /// libSystem cache maintenance over a byte range
            fn sys_icache_invalidate(start: *mut core::ffi::c_void, size: usize);
        }
        // Safety: the span is valid per the buffer constructor's contract
        unsafe { sys_icache_invalidate(ptr.cast(), len) };
    }
    #[cfg(not(all(target_arch = "aarch64", any(target_os = "linux", target_os = "macos"))))]
    let _ = (ptr, len);
}
