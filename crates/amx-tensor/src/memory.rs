use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Result, TensorError};

/// A zero-initialized, fixed-size host allocation with a guaranteed alignment.
///
/// This is the generic host allocator every host-visible buffer type sits on.
/// The allocation is released exactly once, when the value is dropped.
#[derive(Debug)]
pub struct AlignedBytes {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// The allocation is uniquely owned; shared access only hands out `&[u8]`.
unsafe impl Send for AlignedBytes {}
unsafe impl Sync for AlignedBytes {}

impl AlignedBytes {
    /// Allocate `len` zeroed bytes aligned to `alignment`.
    ///
    /// A zero-length request still reserves one byte so the base address is
    /// a real, aligned allocation.
    ///
    /// # Errors
    /// Returns `AllocationFailure` when the layout is unrepresentable or the
    /// system allocator cannot satisfy the request.
    pub fn new(len: usize, alignment: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), alignment)
            .map_err(|_| TensorError::AllocationFailure { size: len })?;
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(TensorError::AllocationFailure { size: len })?;
        Ok(AlignedBytes { ptr, len, layout })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable length in bytes (the requested size).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBytes {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
