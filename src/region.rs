//! Sbrk-style backing regions.
//!
//! A region is one contiguous span of bytes that grows only at its high end
//! and is never returned to the host. [`ArenaRegion`] is an owned in-process
//! reservation with a hard capacity, which is what the tests drive;
//! [`SbrkRegion`] moves the real program break.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::align::align_up;
use crate::ALIGNMENT;

/// An sbrk-like host: a contiguous region growable only at the top.
///
/// `base` must stay stable and 16-byte aligned for the region's lifetime;
/// the allocators index block offsets from it.
pub trait Region {
    /// Grow the region by `incr` bytes and return the byte offset of the old
    /// top, or `None` when the backing store is exhausted. Callers only pass
    /// multiples of 8.
    fn extend(&mut self, incr: usize) -> Option<usize>;

    /// Base address of the region.
    fn base(&self) -> *mut u8;

    /// Current region size in bytes.
    fn size(&self) -> usize;

    /// Address of the last mapped byte (inclusive). Meaningless before the
    /// first extension.
    fn hi(&self) -> *mut u8 {
        unsafe { self.base().add(self.size().saturating_sub(1)) }
    }
}

/// A fixed-capacity arena reserved up front, so the base address never moves.
///
/// `extend` fails once the capacity is exceeded, which is how tests exercise
/// backing-store exhaustion.
pub struct ArenaRegion {
    buf: NonNull<u8>,
    limit: usize,
    len: usize,
}

// The arena owns its reservation outright.
unsafe impl Send for ArenaRegion {}

impl ArenaRegion {
    /// Default capacity, ample for ordinary workloads.
    pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Reserve a fixed arena of `capacity` bytes (rounded up to the
    /// alignment unit).
    pub fn with_capacity(capacity: usize) -> Self {
        let limit = align_up(capacity.max(ALIGNMENT), ALIGNMENT);
        let layout = Layout::from_size_align(limit, ALIGNMENT).expect("arena layout");
        let buf = unsafe { alloc::alloc(layout) };
        let buf = match NonNull::new(buf) {
            Some(buf) => buf,
            None => alloc::handle_alloc_error(layout),
        };
        Self { buf, limit, len: 0 }
    }

    /// Total bytes the arena can hand out.
    pub fn capacity(&self) -> usize {
        self.limit
    }
}

impl Default for ArenaRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArenaRegion {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.limit, ALIGNMENT).expect("arena layout");
        unsafe { alloc::dealloc(self.buf.as_ptr(), layout) };
    }
}

impl Region for ArenaRegion {
    fn extend(&mut self, incr: usize) -> Option<usize> {
        let new_len = self.len.checked_add(incr)?;
        if new_len > self.limit {
            return None;
        }
        let old = self.len;
        self.len = new_len;
        Some(old)
    }

    fn base(&self) -> *mut u8 {
        self.buf.as_ptr()
    }

    fn size(&self) -> usize {
        self.len
    }
}

/// Region over the real program break, extended with `sbrk(2)`.
///
/// Binds lazily: the first extension captures the current break, padded up
/// to the payload alignment unit. The region assumes exclusive ownership of
/// the break from that point on.
#[cfg(unix)]
pub struct SbrkRegion {
    base: *mut u8,
    len: usize,
}

// The break is process-global state; whichever thread holds the allocator
// lock owns it.
#[cfg(unix)]
unsafe impl Send for SbrkRegion {}

#[cfg(unix)]
impl SbrkRegion {
    pub const fn new() -> Self {
        Self {
            base: std::ptr::null_mut(),
            len: 0,
        }
    }

    /// Capture and align the program break on first use.
    fn bind(&mut self) -> Option<()> {
        if !self.base.is_null() {
            return Some(());
        }
        let brk = unsafe { libc::sbrk(0) };
        if brk == usize::MAX as *mut libc::c_void {
            return None;
        }
        let addr = brk as usize;
        let pad = align_up(addr, ALIGNMENT) - addr;
        if pad != 0 {
            let old = unsafe { libc::sbrk(pad as libc::intptr_t) };
            if old == usize::MAX as *mut libc::c_void || old as usize != addr {
                return None;
            }
        }
        self.base = (addr + pad) as *mut u8;
        Some(())
    }
}

#[cfg(unix)]
impl Default for SbrkRegion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl Region for SbrkRegion {
    fn extend(&mut self, incr: usize) -> Option<usize> {
        if incr > libc::intptr_t::MAX as usize {
            return None;
        }
        self.bind()?;
        let old = unsafe { libc::sbrk(incr as libc::intptr_t) };
        if old == usize::MAX as *mut libc::c_void {
            return None;
        }
        // Another sbrk user moving the break in between would leave a hole
        // the region cannot represent; refuse the extension rather than
        // claim foreign bytes.
        if old as usize != self.base as usize + self.len {
            return None;
        }
        let off = self.len;
        self.len += incr;
        Some(off)
    }

    fn base(&self) -> *mut u8 {
        self.base
    }

    fn size(&self) -> usize {
        self.len
    }
}
