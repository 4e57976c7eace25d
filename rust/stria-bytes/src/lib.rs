//! Byte-level ownership primitives for the stria containers: a fallible
//! reallocation block, a power-of-two growable buffer, and a reference-counted
//! shared allocation with an optional finalizer.
//!
//! Everything in this crate is single-threaded by design. The only recoverable
//! failure is allocation failure, surfaced as
//! [`stria_common::error::ErrorKind::OutOfMemory`]; all other misuse is a
//! programmer error checked in debug builds only.

pub mod alloc;
pub mod buffer;
pub mod shared;

pub use alloc::{RawBlock, Reclaimer};
pub use buffer::GrowBuffer;
pub use shared::SharedBlock;
