//! The allocation primitive that every growth operation in the library routes
//! through.
//!
//! [`RawBlock`] owns a single heap region and resizes it in place with
//! `realloc`. It is the only layer that can observe an allocation failure;
//! everything above it either propagates the resulting
//! [`OutOfMemory`](stria_common::error::ErrorKind::OutOfMemory) error with `?`
//! or treats allocation as infallible.
//!
//! A [`Reclaimer`] may be injected at construction. It is consulted once per
//! failed allocation and may request a single retry, typically after dropping
//! caches elsewhere in the process. There is no global handler: the policy
//! travels with the block that needs it.

use std::alloc::{Layout, alloc_zeroed, dealloc, realloc};
use std::ptr::NonNull;
use std::rc::Rc;

use stria_common::{Result, error::Error};

/// A last-resort memory recovery hook, consulted when an allocation fails.
pub trait Reclaimer {
    /// Attempts to free up memory for a pending allocation of `requested`
    /// bytes. Returning `true` asks the allocator to retry once.
    fn try_reclaim(&self, requested: usize) -> bool;
}

/// A resizable heap block with explicit alignment and fallible growth.
///
/// A block of size 0 owns no allocation. All bytes of a non-empty block are
/// initialized: fresh allocations are zeroed, and any region gained by growth
/// is zero-filled before it becomes visible.
pub struct RawBlock {
    ptr: NonNull<u8>,
    size: usize,
    align: usize,
    reclaimer: Option<Rc<dyn Reclaimer>>,
}

impl RawBlock {
    /// Creates an empty block with byte alignment.
    pub fn new() -> RawBlock {
        Self::with_alignment(1)
    }

    /// Creates an empty block whose allocations will be aligned to
    /// `alignment`, which must be a power of two.
    pub fn with_alignment(alignment: usize) -> RawBlock {
        assert!(alignment.is_power_of_two());
        RawBlock {
            ptr: NonNull::dangling(),
            size: 0,
            align: alignment,
            reclaimer: None,
        }
    }

    /// Creates an empty block with the given alignment and an injected
    /// recovery hook.
    pub fn with_reclaimer(alignment: usize, reclaimer: Rc<dyn Reclaimer>) -> RawBlock {
        let mut block = Self::with_alignment(alignment);
        block.reclaimer = Some(reclaimer);
        block
    }

    /// Returns the current size of the block in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns `true` if the block owns no allocation.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the alignment of the block's allocations.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.align
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the whole block as a byte slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Returns the whole block as a mutable byte slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// Resizes the block to exactly `size` bytes, preserving the common
    /// prefix of the old and new contents. A `size` of 0 frees the
    /// allocation.
    ///
    /// On allocation failure the injected [`Reclaimer`] (if any) is consulted
    /// and the allocation retried once; if that also fails, returns
    /// `OutOfMemory` and leaves the block unchanged.
    pub fn resize_exact(&mut self, size: usize) -> Result<()> {
        if size == self.size {
            return Ok(());
        }
        if size == 0 {
            self.free();
            return Ok(());
        }

        let layout =
            Layout::from_size_align(size, self.align).map_err(|_| Error::out_of_memory(size))?;
        let old_size = self.size;
        let ptr = if old_size == 0 {
            self.attempt(size, || unsafe { alloc_zeroed(layout) })?
        } else {
            // The existing layout was validated when it was allocated.
            let old_layout = unsafe { Layout::from_size_align_unchecked(old_size, self.align) };
            let old_ptr = self.ptr.as_ptr();
            self.attempt(size, || unsafe { realloc(old_ptr, old_layout, size) })?
        };
        if size > old_size {
            // realloc leaves the grown region uninitialized.
            unsafe { ptr.as_ptr().add(old_size).write_bytes(0, size - old_size) };
        }
        self.ptr = ptr;
        self.size = size;
        Ok(())
    }

    /// Resizes the block to the next power of two at or above `size`
    /// (or exactly 0), then delegates to [`resize_exact`](Self::resize_exact).
    pub fn resize_atleast(&mut self, size: usize) -> Result<()> {
        let capacity = if size > 0 {
            size.checked_next_power_of_two()
                .ok_or_else(|| Error::out_of_memory(size))?
        } else {
            0
        };
        self.resize_exact(capacity)
    }

    /// Frees the allocation and resets the block to the empty state.
    pub fn free(&mut self) {
        if self.size > 0 {
            let layout = unsafe { Layout::from_size_align_unchecked(self.size, self.align) };
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
            self.ptr = NonNull::dangling();
            self.size = 0;
        }
    }

    /// Runs one allocation attempt, retrying once if the reclaimer recovers
    /// some memory.
    fn attempt(&self, requested: usize, mut allocate: impl FnMut() -> *mut u8) -> Result<NonNull<u8>> {
        let mut ptr = allocate();
        if ptr.is_null() {
            if let Some(reclaimer) = &self.reclaimer {
                if reclaimer.try_reclaim(requested) {
                    ptr = allocate();
                }
            }
        }
        NonNull::new(ptr).ok_or_else(|| Error::out_of_memory(requested))
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        self.free();
    }
}

impl Default for RawBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBlock")
            .field("size", &self.size)
            .field("align", &self.align)
            .finish_non_exhaustive()
    }
}
