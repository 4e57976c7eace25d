//! Reference-counted shared ownership of a single heap allocation, with an
//! optional finalizer that runs exactly once.

use std::cell::UnsafeCell;
use std::rc::Rc;

use stria_common::Result;

use crate::alloc::{RawBlock, Reclaimer};

/// Callback invoked over the allocation's bytes when the last referencing
/// handle is released.
pub type Finalizer = Box<dyn FnOnce(&mut [u8])>;

struct SharedInner {
    block: UnsafeCell<RawBlock>,
    finalizer: Option<Finalizer>,
}

impl Drop for SharedInner {
    fn drop(&mut self) {
        if let Some(finalize) = self.finalizer.take() {
            finalize(self.block.get_mut().as_mut_slice());
        }
        // The block itself frees on drop.
    }
}

/// A cheaply cloneable handle to one shared heap allocation.
///
/// All clones alias the same bytes: mutation through any handle is
/// immediately observable through every other handle and every view over the
/// allocation. This is deliberate shared-window aliasing, not copy-on-write,
/// and it is what makes the handle useful as backing storage for strided
/// slice views.
///
/// The allocation (and its optional [`Finalizer`]) is torn down exactly once,
/// when the last live handle is released — either explicitly via
/// [`release`](SharedBlock::release) or implicitly on drop. A released handle
/// is inert: its pointer is null, its length 0, and releasing it again is a
/// no-op rather than a double free.
///
/// `SharedBlock` is single-threaded: the reference count is an `Rc` and byte
/// access is unsynchronized, so the type is neither `Send` nor `Sync`.
pub struct SharedBlock {
    inner: Option<Rc<SharedInner>>,
}

impl SharedBlock {
    /// Allocates `size` zeroed bytes with no finalizer.
    pub fn new(size: usize) -> Result<SharedBlock> {
        Self::create(size, 1, None, None)
    }

    /// Allocates `size` zeroed bytes aligned to `alignment` (a power of two).
    pub fn with_alignment(size: usize, alignment: usize) -> Result<SharedBlock> {
        Self::create(size, alignment, None, None)
    }

    /// Allocates `size` zeroed bytes and registers `finalize` to run over
    /// them when the last handle is released.
    pub fn with_finalizer(
        size: usize,
        finalize: impl FnOnce(&mut [u8]) + 'static,
    ) -> Result<SharedBlock> {
        Self::create(size, 1, Some(Box::new(finalize)), None)
    }

    /// Allocates `size` zeroed bytes, consulting `reclaimer` if the
    /// allocation fails.
    pub fn with_reclaimer(size: usize, reclaimer: Rc<dyn Reclaimer>) -> Result<SharedBlock> {
        Self::create(size, 1, None, Some(reclaimer))
    }

    fn create(
        size: usize,
        alignment: usize,
        finalizer: Option<Finalizer>,
        reclaimer: Option<Rc<dyn Reclaimer>>,
    ) -> Result<SharedBlock> {
        let mut block = match reclaimer {
            Some(reclaimer) => RawBlock::with_reclaimer(alignment, reclaimer),
            None => RawBlock::with_alignment(alignment),
        };
        block.resize_exact(size)?;
        Ok(SharedBlock {
            inner: Some(Rc::new(SharedInner {
                block: UnsafeCell::new(block),
                finalizer,
            })),
        })
    }

    /// Returns `true` if this handle has been released and no longer refers
    /// to an allocation.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns the size of the shared allocation in bytes (0 once released).
    #[inline]
    pub fn len(&self) -> usize {
        debug_assert!(!self.is_released(), "use of a released handle");
        match &self.inner {
            Some(inner) => unsafe { (*inner.block.get()).size() },
            None => 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the address of the shared bytes (null once released).
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        debug_assert!(!self.is_released(), "use of a released handle");
        match &self.inner {
            Some(inner) => unsafe { (*inner.block.get()).as_ptr() },
            None => std::ptr::null(),
        }
    }

    /// Returns the mutable address of the shared bytes (null once released).
    ///
    /// Takes `&self`: every clone of the handle may mutate the allocation,
    /// and writes are visible through all aliasing handles and views. Callers
    /// must not hold a reference derived from another accessor across a write.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        debug_assert!(!self.is_released(), "use of a released handle");
        match &self.inner {
            Some(inner) => unsafe { (*inner.block.get()).as_mut_ptr() },
            None => std::ptr::null_mut(),
        }
    }

    /// Views the shared bytes as a slice.
    ///
    /// # Safety
    ///
    /// The handle must be live, and no aliasing handle or view may mutate the
    /// allocation while the returned borrow exists.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len()) }
    }

    /// Views the shared bytes as a mutable slice.
    ///
    /// # Safety
    ///
    /// The handle must be live, and no aliasing handle or view may access the
    /// allocation while the returned borrow exists.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len()) }
    }

    /// Returns the number of live handles sharing this allocation.
    pub fn ref_count(&self) -> usize {
        debug_assert!(!self.is_released(), "use of a released handle");
        self.inner.as_ref().map_or(0, Rc::strong_count)
    }

    /// Drops this handle's reference and leaves the handle inert.
    ///
    /// The final release over an allocation runs the finalizer (if any) and
    /// frees the bytes. Releasing an already-released handle is a no-op.
    pub fn release(&mut self) {
        self.inner = None;
    }
}

impl Clone for SharedBlock {
    /// O(1): bumps the reference count; the clone aliases the same bytes and
    /// finalizer. Cloning a released handle is a precondition violation
    /// (debug-checked); in release builds it yields a released handle.
    fn clone(&self) -> SharedBlock {
        debug_assert!(!self.is_released(), "clone of a released handle");
        SharedBlock {
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for SharedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(_) => f
                .debug_struct("SharedBlock")
                .field("len", &self.len())
                .field("ref_count", &self.ref_count())
                .finish(),
            None => f.write_str("SharedBlock(released)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_new_zeroed() {
        let block = SharedBlock::new(16).unwrap();
        assert_eq!(block.len(), 16);
        assert!(!block.is_released());
        assert_eq!(block.ref_count(), 1);
        assert!(unsafe { block.as_slice() }.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clone_aliases_same_bytes() {
        let block = SharedBlock::new(2 * size_of::<f64>()).unwrap();
        let values: &mut [f64] = bytemuck::cast_slice_mut(unsafe { block.as_mut_slice() });
        values[0] = 1.5;
        values[1] = -2.5;

        let mut clone = block.clone();
        assert_eq!(block.as_ptr(), clone.as_ptr());
        assert_eq!(block.ref_count(), 2);

        let seen: &[f64] = bytemuck::cast_slice(unsafe { clone.as_slice() });
        assert_eq!(seen, &[1.5, -2.5]);

        // Dropping one handle keeps the data alive.
        clone.release();
        assert_eq!(block.ref_count(), 1);
        let seen: &[f64] = bytemuck::cast_slice(unsafe { block.as_slice() });
        assert_eq!(seen, &[1.5, -2.5]);
    }

    #[test]
    fn test_release_makes_handle_inert() {
        let mut block = SharedBlock::new(8).unwrap();
        block.release();
        assert!(block.is_released());

        // Releasing again is a safe no-op, not a double free.
        block.release();
        assert!(block.is_released());
    }

    #[test]
    fn test_finalizer_fires_exactly_once_on_last_release() {
        let calls = Rc::new(Cell::new(0));
        let observed = calls.clone();
        let mut a = SharedBlock::with_finalizer(size_of::<u32>(), move |bytes| {
            let values: &mut [u32] = bytemuck::cast_slice_mut(bytes);
            assert_eq!(values[0], 23);
            observed.set(observed.get() + 1);
        })
        .unwrap();
        bytemuck::cast_slice_mut::<u8, u32>(unsafe { a.as_mut_slice() })[0] = 23;

        let mut b = a.clone();
        a.release();
        assert_eq!(calls.get(), 0);

        let mut c = b.clone();
        b.release();
        assert_eq!(calls.get(), 0);

        c.release();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_finalizer_fires_on_implicit_drop() {
        let calls = Rc::new(Cell::new(0));
        let observed = calls.clone();
        {
            let block = SharedBlock::with_finalizer(4, move |_| {
                observed.set(observed.get() + 1);
            })
            .unwrap();
            let _clone = block.clone();
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_zero_sized_allocation() {
        let block = SharedBlock::new(0).unwrap();
        assert_eq!(block.len(), 0);
        assert!(block.is_empty());
        assert!(!block.is_released());
    }

    #[test]
    fn test_release_orders_are_equivalent() {
        // k clones plus the original, released in a randomized order: the
        // finalizer must fire exactly once, on the last release.
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..50 {
            let calls = Rc::new(Cell::new(0));
            let observed = calls.clone();
            let original = SharedBlock::with_finalizer(16, move |_| {
                observed.set(observed.get() + 1);
            })
            .unwrap();

            let mut handles = vec![original];
            for _ in 0..rng.usize(1..8) {
                let pick = rng.usize(0..handles.len());
                let clone = handles[pick].clone();
                handles.push(clone);
            }

            while handles.len() > 1 {
                let pick = rng.usize(0..handles.len());
                let mut handle = handles.swap_remove(pick);
                handle.release();
                assert_eq!(calls.get(), 0);
            }
            handles.pop();
            assert_eq!(calls.get(), 1);
        }
    }
}
