//! A capacity-tracked byte region sized to a power of two, used by the linear
//! containers for amortized growth.

use std::rc::Rc;

use stria_common::{Result, error::Error};

use crate::alloc::{RawBlock, Reclaimer};

/// A growable byte buffer whose capacity is always a power of two (or 0).
///
/// The buffer tracks no length of its own: the whole capacity is live,
/// initialized storage, and the owning container decides how much of it is
/// meaningful. It is exclusively owned and never aliased.
pub struct GrowBuffer {
    block: RawBlock,
}

impl GrowBuffer {
    /// Creates a buffer with capacity for at least `initial` bytes
    /// (0 allocates nothing).
    pub fn new(initial: usize) -> Result<GrowBuffer> {
        let mut buffer = GrowBuffer {
            block: RawBlock::new(),
        };
        if initial > 0 {
            buffer.resize(initial)?;
        }
        Ok(buffer)
    }

    /// Creates a buffer whose allocation failures consult `reclaimer` before
    /// giving up.
    pub fn with_reclaimer(initial: usize, reclaimer: Rc<dyn Reclaimer>) -> Result<GrowBuffer> {
        let mut buffer = GrowBuffer {
            block: RawBlock::with_reclaimer(1, reclaimer),
        };
        if initial > 0 {
            buffer.resize(initial)?;
        }
        Ok(buffer)
    }

    /// Returns the current capacity in bytes. Always a power of two, or 0.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.block.size()
    }

    /// Resizes the buffer so that the capacity is the smallest power of two
    /// at or above `target`, shrinking if the current capacity overshoots.
    /// A `target` of 0 frees the storage.
    ///
    /// The search starts from the current capacity and walks by doubling and
    /// halving, so repeated calls with the same target are idempotent.
    pub fn resize(&mut self, target: usize) -> Result<()> {
        let new_capacity = if target > 0 {
            let mut capacity = self.capacity().max(1);
            while capacity > target {
                capacity >>= 1;
            }
            while capacity < target {
                capacity = capacity
                    .checked_mul(2)
                    .ok_or_else(|| Error::out_of_memory(target))?;
            }
            capacity
        } else {
            0
        };
        self.block.resize_exact(new_capacity)
    }

    /// Grows the buffer to hold at least `min` bytes. Never shrinks.
    pub fn reserve(&mut self, min: usize) -> Result<()> {
        if min > self.capacity() {
            self.resize(min)
        } else {
            Ok(())
        }
    }

    /// Returns the address of the byte at `offset`.
    #[inline]
    pub fn at(&self, offset: usize) -> *const u8 {
        debug_assert!(offset < self.capacity(), "offset out of bounds");
        unsafe { self.block.as_ptr().add(offset) }
    }

    /// Returns the mutable address of the byte at `offset`.
    #[inline]
    pub fn at_mut(&mut self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.capacity(), "offset out of bounds");
        unsafe { self.block.as_mut_ptr().add(offset) }
    }

    /// Returns the whole capacity as a byte slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.block.as_slice()
    }

    /// Returns the whole capacity as a mutable byte slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.block.as_mut_slice()
    }

    /// Shifts the byte range `[pos, capacity)` by `delta`: positive `delta`
    /// opens a gap at `pos` for insertion, negative closes one after removal.
    /// The move is overlap-safe.
    ///
    /// Bytes that the shift would carry past the end of the buffer are not
    /// moved; a shift of the entire remaining tail moves nothing.
    pub fn move_tail(&mut self, pos: usize, delta: isize) {
        let capacity = self.capacity();
        debug_assert!(pos < capacity, "position out of bounds");
        debug_assert!(
            delta >= -(pos as isize) && delta <= (capacity - pos) as isize,
            "shift out of bounds"
        );

        let mut bytes = capacity - pos;
        if delta > 0 {
            bytes = bytes.saturating_sub(delta as usize);
        }
        if bytes > 0 {
            unsafe {
                let from = self.block.as_mut_ptr().add(pos);
                let to = self.block.as_mut_ptr().offset(pos as isize + delta);
                std::ptr::copy(from, to, bytes);
            }
        }
    }
}

impl std::fmt::Debug for GrowBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty() {
        let buffer = GrowBuffer::new(0).unwrap();
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn test_resize_rounds_to_power_of_two() {
        let mut buffer = GrowBuffer::new(3).unwrap();
        assert_eq!(buffer.capacity(), 4);

        buffer.resize(10).unwrap();
        assert_eq!(buffer.capacity(), 16);

        buffer.resize(6).unwrap();
        assert_eq!(buffer.capacity(), 8);

        buffer.resize(0).unwrap();
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn test_resize_is_idempotent() {
        let mut buffer = GrowBuffer::new(0).unwrap();
        for target in [1usize, 2, 3, 5, 17, 100, 1000, 4096, 9000] {
            buffer.resize(target).unwrap();
            let capacity = buffer.capacity();
            assert!(capacity.is_power_of_two());
            assert!(capacity >= target);
            assert!(capacity / 2 < target);

            buffer.resize(target).unwrap();
            assert_eq!(buffer.capacity(), capacity);
        }
    }

    #[test]
    fn test_reserve_never_shrinks() {
        let mut buffer = GrowBuffer::new(4).unwrap();
        assert_eq!(buffer.capacity(), 4);

        buffer.reserve(4).unwrap();
        assert_eq!(buffer.capacity(), 4);

        buffer.reserve(2).unwrap();
        assert_eq!(buffer.capacity(), 4);

        buffer.resize(10).unwrap();
        assert_eq!(buffer.capacity(), 16);
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut buffer = GrowBuffer::new(8).unwrap();
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        buffer.resize(16).unwrap();
        assert_eq!(&buffer.as_slice()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(buffer.as_slice()[8..].iter().all(|&b| b == 0));

        buffer.resize(4).unwrap();
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_at_addresses() {
        let mut buffer = GrowBuffer::new(10 * size_of::<u32>()).unwrap();
        let values: &mut [u32] = bytemuck::cast_slice_mut(buffer.as_mut_slice());
        for (i, value) in values.iter_mut().enumerate() {
            *value = i as u32;
        }
        for i in 0..10 {
            let p = buffer.at(i * size_of::<u32>()) as *const u32;
            assert_eq!(unsafe { *p }, i as u32);
        }
    }

    #[test]
    fn test_move_tail_opens_gap() {
        let mut buffer = GrowBuffer::new(8).unwrap();
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        // Open a 2-byte gap at position 2.
        buffer.move_tail(2, 2);
        assert_eq!(&buffer.as_slice()[4..], &[3, 4, 5, 6]);
        assert_eq!(&buffer.as_slice()[..2], &[1, 2]);
    }

    #[test]
    fn test_move_tail_closes_gap() {
        let mut buffer = GrowBuffer::new(8).unwrap();
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        // Remove two bytes at position 2.
        buffer.move_tail(4, -2);
        assert_eq!(&buffer.as_slice()[..6], &[1, 2, 5, 6, 7, 8]);
    }

    #[test]
    fn test_move_tail_clamps_when_tail_slides_off() {
        let mut buffer = GrowBuffer::new(8).unwrap();
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        // Shifting the whole tail past the end moves nothing.
        buffer.move_tail(4, 4);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_move_tail_round_trip() {
        let mut buffer = GrowBuffer::new(16).unwrap();
        for (i, b) in buffer.as_mut_slice().iter_mut().enumerate() {
            *b = i as u8;
        }
        let original: Vec<u8> = buffer.as_slice().to_vec();

        buffer.move_tail(5, 3);
        buffer.move_tail(8, -3);
        assert_eq!(&buffer.as_slice()[..13], &original[..13]);
    }

    #[test]
    fn test_randomized_resize_capacity_law() {
        let mut buffer = GrowBuffer::new(0).unwrap();
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..200 {
            let target = rng.usize(0..10_000);
            buffer.resize(target).unwrap();
            let capacity = buffer.capacity();
            if target == 0 {
                assert_eq!(capacity, 0);
            } else {
                assert!(capacity.is_power_of_two());
                assert!(capacity >= target && capacity / 2 < target);
            }
        }
    }
}
