//! A strided, windowed view over a shared allocation.
//!
//! [`Slice<T>`] interprets a [`SharedBlock`] as elements of `T` and exposes a
//! `(start, stride, count)` window over them. Views are cheap to clone and to
//! rewindow ([`Slice::reslice`]): all of them alias the same backing bytes,
//! and mutation through any one view is immediately visible through every
//! other view that covers the same elements.
//!
//! Indexing follows the Python-slice convention: a negative logical index `i`
//! addresses element `i + count`, and reslicing with a negative step walks the
//! window backwards. Reslice requests that would leave the current window are
//! clamped, never an error.

use std::marker::PhantomData;

use bytemuck::{AnyBitPattern, NoUninit};
use stria_bytes::SharedBlock;
use stria_common::{Result, error::Error};

/// Wraps a possibly negative logical index against `count`.
///
/// Debug-checked precondition: `-count <= i < count`.
#[inline]
fn wrap_index(i: isize, count: usize) -> usize {
    let n = count as isize;
    debug_assert!(i >= -n && i < n, "index out of bounds");
    if i >= 0 { i as usize } else { (i + n) as usize }
}

/// A typed `(start, stride, count)` window over a shared allocation.
///
/// The view does not own its bytes: it holds one reference to the backing
/// [`SharedBlock`], which is freed when the last view over it goes away.
/// `start` is an element offset into the backing allocation, `stride` the
/// signed element step between consecutive logical indices, and `count` the
/// number of addressable elements. Every logical index in `[0, count)`
/// resolves to an element inside the backing allocation.
pub struct Slice<T> {
    block: SharedBlock,
    start: isize,
    stride: isize,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T: AnyBitPattern + NoUninit> Slice<T> {
    /// Allocates a fresh zeroed backing store for `count` elements and views
    /// all of it with `start = 0`, `stride = 1`.
    pub fn new(count: usize) -> Result<Slice<T>> {
        let bytes = count
            .checked_mul(size_of::<T>())
            .ok_or_else(|| Error::out_of_memory(usize::MAX))?;
        let block = SharedBlock::with_alignment(bytes, align_of::<T>())?;
        Ok(Slice {
            block,
            start: 0,
            stride: 1,
            count,
            _marker: PhantomData,
        })
    }

    /// Allocates a fresh backing store holding a copy of `values`.
    pub fn from_slice(values: &[T]) -> Result<Slice<T>> {
        let slice = Slice::new(values.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                values.as_ptr(),
                slice.block.as_mut_ptr() as *mut T,
                values.len(),
            );
        }
        Ok(slice)
    }

    /// Returns the number of elements addressable through this view.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the address of the element at logical index `i`.
    ///
    /// Negative `i` wraps: `element_ptr(-1)` is the last element. The address
    /// is stable across clones and reslices that cover the same element,
    /// which makes it usable for identity checks between aliasing views.
    #[inline]
    pub fn element_ptr(&self, i: isize) -> *mut T {
        let index = wrap_index(i, self.count) as isize;
        let base = self.block.as_mut_ptr() as *mut T;
        unsafe { base.offset(self.start + index * self.stride) }
    }

    /// Reads the element at logical index `i` (negative `i` wraps).
    #[inline]
    pub fn get(&self, i: isize) -> T {
        unsafe { self.element_ptr(i).read() }
    }

    /// Writes the element at logical index `i` (negative `i` wraps).
    ///
    /// The write is visible through every view aliasing this element.
    #[inline]
    pub fn set(&mut self, i: isize, value: T) {
        unsafe { self.element_ptr(i).write(value) };
    }

    /// Creates a new window over the same backing allocation, relative to
    /// this view's own window.
    ///
    /// `start` follows the wrapping convention of [`get`](Self::get). `step`
    /// multiplies into the current stride, so reslicing a reslice walks the
    /// backing allocation with composed parameters. A negative `count`
    /// requests as many elements as fit.
    ///
    /// The count is clamped so that the resulting window never leaves the
    /// current one, for positive and negative steps alike:
    /// `reslice(-1, -1, n)` of an `n`-element view is its exact reverse, and
    /// an oversized request simply yields fewer elements.
    pub fn reslice(&self, start: isize, step: isize, count: isize) -> Slice<T> {
        debug_assert!(step != 0, "step must be nonzero");
        let n = self.count as isize;
        let start = wrap_index(start, self.count) as isize;
        let mut count = if count < 0 { n } else { count };
        if count > 0 {
            let last = start + step * (count - 1);
            if last < 0 {
                // Negative step: largest count that does not walk below 0.
                count = -start / step + 1;
            } else if last >= n {
                count = (n - 1 - start + step) / step;
            }
        }
        Slice {
            block: self.block.clone(),
            start: self.start + start * self.stride,
            stride: self.stride * step,
            count: count as usize,
            _marker: PhantomData,
        }
    }

    /// Copies the elements into `dest` in logical order.
    ///
    /// Debug-checked precondition: `dest.len() >= self.len()`.
    pub fn copy_to(&self, dest: &mut [T]) {
        debug_assert!(dest.len() >= self.count, "destination too small");
        for (i, out) in dest.iter_mut().take(self.count).enumerate() {
            *out = self.get(i as isize);
        }
    }

    /// Copies the elements into a freshly allocated contiguous `Vec`, in
    /// logical order.
    ///
    /// The result is an independent snapshot: it is unaffected by later
    /// mutation or release of this view or any aliasing view.
    pub fn materialize(&self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.count);
        for i in 0..self.count {
            values.push(self.get(i as isize));
        }
        values
    }

    /// Returns a copying iterator over the elements in logical order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.count).map(move |i| self.get(i as isize))
    }

    /// Releases this view's reference to the backing allocation and resets
    /// the view to an empty window. The allocation is freed when the last
    /// view over it is released or dropped.
    pub fn release(&mut self) {
        self.block.release();
        self.start = 0;
        self.stride = 1;
        self.count = 0;
    }
}

impl<T> Clone for Slice<T> {
    /// O(1): shares the backing allocation and copies the window. No element
    /// data is copied; mutation through either view is visible through both.
    fn clone(&self) -> Slice<T> {
        Slice {
            block: self.block.clone(),
            start: self.start,
            stride: self.stride,
            count: self.count,
            _marker: PhantomData,
        }
    }
}

impl<T: AnyBitPattern + NoUninit + std::fmt::Debug> std::fmt::Debug for Slice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
