//! Implicit-free-list allocator.
//!
//! Every block sits in address order and the "free list" is the heap itself,
//! walked block by block via the size field; free-ness is inferred from the
//! alloc bit. First-fit placement, boundary-tag coalescing, split-on-place.
//!
//! Heap picture, offsets from the region base:
//!
//! ```text
//! 0        4          8          12         16
//! | pad    | prologue | prologue | epilogue | first real block ...
//! |        | header   | footer   | header   |
//! ```
//!
//! The prologue and epilogue sentinels are allocated, so coalescing never
//! has to special-case the heap edges. Payloads start one word past each
//! block header; with all block sizes a multiple of 16 and the 4-byte
//! leading pad, every payload lands on a 16-byte boundary.

use core::ptr;

use crate::align::align_up;
use crate::block;
use crate::region::Region;
use crate::{AllocError, ALIGNMENT, CHUNK_SIZE, DSIZE, MAX_REQUEST, WSIZE};

/// Block overhead: header + footer.
const OVERHEAD: usize = DSIZE;

/// Smallest block the layout can represent.
const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Payload starts one word past the block header.
const PAYLOAD_OFFSET: usize = WSIZE;

/// Offset of the prologue block; heap walks start here.
const PROLOGUE: usize = WSIZE;

/// Pad + prologue + epilogue: bytes never covered by ordinary blocks.
const BOOT_OVERHEAD: usize = 4 * WSIZE;

/// Implicit-free-list heap over a backing region.
pub struct ImplicitHeap<R: Region> {
    region: R,
    /// Set once the sentinels are laid down.
    ready: bool,
}

impl<R: Region> ImplicitHeap<R> {
    pub const fn new(region: R) -> Self {
        Self {
            region,
            ready: false,
        }
    }

    /// Lay down the alignment pad, prologue and epilogue, then pre-extend by
    /// one chunk. Calling this on a live heap is a no-op.
    pub fn init(&mut self) -> Result<(), AllocError> {
        if self.ready {
            return Ok(());
        }
        self.region
            .extend(BOOT_OVERHEAD)
            .ok_or(AllocError::RegionExhausted)?;
        unsafe {
            block::write_header(self.base(), PROLOGUE, DSIZE, true);
            block::write_footer(self.base(), PROLOGUE, DSIZE, true);
            block::write_header(self.base(), 3 * WSIZE, 0, true);
        }
        self.ready = true;
        if self.extend_heap(CHUNK_SIZE).is_none() {
            return Err(AllocError::RegionExhausted);
        }
        Ok(())
    }

    /// Allocate `size` bytes; the returned payload pointer is 16-byte
    /// aligned. Returns null for zero or oversized requests and when the
    /// backing region is exhausted.
    ///
    /// # Safety
    ///
    /// The caller must not touch more than `size` bytes through the returned
    /// pointer, nor use it after freeing it.
    pub unsafe fn malloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 || size > MAX_REQUEST {
            return ptr::null_mut();
        }
        if !self.ready && self.init().is_err() {
            return ptr::null_mut();
        }
        debug_assert!(self.check_heap(line!()));

        // Adjusted size: payload plus header/footer, rounded to the
        // alignment unit.
        let asize = align_up(size + OVERHEAD, ALIGNMENT).max(MIN_BLOCK_SIZE);

        let blk = match self.find_fit(asize) {
            Some(blk) => blk,
            None => match self.extend_heap(asize.max(CHUNK_SIZE)) {
                Some(blk) => blk,
                None => return ptr::null_mut(),
            },
        };

        self.place(blk, asize);
        debug_assert!(self.check_heap(line!()));
        unsafe { self.base().add(blk + PAYLOAD_OFFSET) }
    }

    /// Release the block owning `ptr`. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this heap and not have been freed already.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() || !self.ready {
            return;
        }
        debug_assert!(self.check_heap(line!()));
        let blk = self.block_of(ptr);
        let size = self.size_of(blk);
        self.write_block(blk, size, false);
        self.coalesce(blk);
        debug_assert!(self.check_heap(line!()));
    }

    /// Resize the allocation at `ptr`, moving it if needed. The first
    /// `min(old payload, size)` bytes are preserved. On failure the original
    /// block is left untouched and null is returned.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::free`] for `ptr`.
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        if size == 0 {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }
        if ptr.is_null() {
            return unsafe { self.malloc(size) };
        }

        let new_ptr = unsafe { self.malloc(size) };
        if new_ptr.is_null() {
            return ptr::null_mut();
        }
        let old_payload = self.size_of(self.block_of(ptr)) - OVERHEAD;
        unsafe {
            ptr::copy_nonoverlapping(ptr, new_ptr, old_payload.min(size));
            self.free(ptr);
        }
        new_ptr
    }

    /// Allocate a zero-filled array of `nmemb` elements of `size` bytes
    /// each. Returns null on multiplicative overflow or allocation failure.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::malloc`].
    pub unsafe fn calloc(&mut self, nmemb: usize, size: usize) -> *mut u8 {
        let total = match nmemb.checked_mul(size) {
            Some(total) => total,
            None => return ptr::null_mut(),
        };
        let ptr = unsafe { self.malloc(total) };
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, total) };
        }
        ptr
    }

    /// Current size of the backing region in bytes.
    pub fn heap_size(&self) -> usize {
        self.region.size()
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.region.base()
    }

    #[inline]
    fn size_of(&self, blk: usize) -> usize {
        unsafe { block::size_at(self.base(), blk) }
    }

    #[inline]
    fn alloc_of(&self, blk: usize) -> bool {
        unsafe { block::alloc_at(self.base(), blk) }
    }

    #[inline]
    fn write_block(&mut self, blk: usize, size: usize, alloc: bool) {
        unsafe {
            block::write_header(self.base(), blk, size, alloc);
            block::write_footer(self.base(), blk, size, alloc);
        }
    }

    #[inline]
    fn block_of(&self, ptr: *mut u8) -> usize {
        ptr as usize - self.base() as usize - PAYLOAD_OFFSET
    }

    /// Grow the region, installing a new free block over the old epilogue
    /// and rebuilding the epilogue at the new top. Returns the coalesced
    /// block.
    #[cold]
    fn extend_heap(&mut self, size: usize) -> Option<usize> {
        let size = align_up(size, ALIGNMENT);
        let old_top = self.region.extend(size)?;

        // The old epilogue header becomes the new block's header.
        let blk = old_top - WSIZE;
        self.write_block(blk, size, false);
        unsafe {
            block::write_header(self.base(), blk + size, 0, true);
        }
        Some(self.coalesce(blk))
    }

    /// Fuse a free block with free neighbors on either side. The sentinels
    /// keep both neighbor reads in bounds.
    fn coalesce(&mut self, blk: usize) -> usize {
        let base = self.base();
        let (prev, next) = unsafe { (block::prev_block(base, blk), block::next_block(base, blk)) };
        let prev_alloc = self.alloc_of(prev);
        let next_alloc = self.alloc_of(next);
        let mut size = self.size_of(blk);

        match (prev_alloc, next_alloc) {
            (true, true) => blk,
            (true, false) => {
                size += self.size_of(next);
                self.write_block(blk, size, false);
                blk
            }
            (false, true) => {
                size += self.size_of(prev);
                self.write_block(prev, size, false);
                prev
            }
            (false, false) => {
                size += self.size_of(prev) + self.size_of(next);
                self.write_block(prev, size, false);
                prev
            }
        }
    }

    /// Mark a free block allocated, splitting off the tail when the
    /// remainder can stand alone as a block.
    fn place(&mut self, blk: usize, asize: usize) {
        let csize = self.size_of(blk);
        if csize - asize >= MIN_BLOCK_SIZE {
            self.write_block(blk, asize, true);
            self.write_block(blk + asize, csize - asize, false);
        } else {
            self.write_block(blk, csize, true);
        }
    }

    /// First fit: linear walk from the prologue to the epilogue.
    fn find_fit(&self, asize: usize) -> Option<usize> {
        let mut blk = PROLOGUE;
        loop {
            let size = self.size_of(blk);
            if size == 0 {
                return None;
            }
            if !self.alloc_of(blk) && asize <= size {
                return Some(blk);
            }
            blk += size;
        }
    }

    /// Walk the whole heap verifying the boundary-tag invariants: matching
    /// header/footer words, payload alignment, no adjacent free blocks, an
    /// allocated zero-size epilogue, and block sizes summing to the region
    /// size minus the fixed overhead. Reports the first violation to stderr
    /// with the caller's line number.
    pub fn check_heap(&self, line: u32) -> bool {
        if !self.ready {
            eprintln!("heap check (line {line}): heap not initialized");
            return false;
        }
        let base = self.base();
        let mut blk = PROLOGUE;
        let mut prev_free = false;
        let mut covered = 0usize;

        loop {
            let header = unsafe { block::load_word(base, blk) };
            let size = block::extract_size(header);
            let alloc = block::extract_alloc(header);

            if size == 0 {
                if !alloc {
                    eprintln!("heap check (line {line}): epilogue at {blk:#x} not allocated");
                    return false;
                }
                break;
            }

            let footer = unsafe { block::load_word(base, blk + size - WSIZE) };
            if header != footer {
                eprintln!(
                    "heap check (line {line}): header {header:#010x} != footer {footer:#010x} at {blk:#x}"
                );
                return false;
            }
            if blk != PROLOGUE {
                if (base as usize + blk + PAYLOAD_OFFSET) % ALIGNMENT != 0 {
                    eprintln!("heap check (line {line}): misaligned payload at {blk:#x}");
                    return false;
                }
                if prev_free && !alloc {
                    eprintln!("heap check (line {line}): adjacent free blocks at {blk:#x}");
                    return false;
                }
                covered += size;
            }
            prev_free = !alloc;
            blk += size;
        }

        let expected = self.region.size() - BOOT_OVERHEAD;
        if covered != expected {
            eprintln!("heap check (line {line}): blocks cover {covered} bytes, expected {expected}");
            return false;
        }
        true
    }

    /// Print the heap block by block. Debug aid.
    #[cfg(debug_assertions)]
    pub fn dump(&self) {
        let base = self.base();
        if !self.ready {
            eprintln!("<heap not initialized>");
            return;
        }
        let mut blk = PROLOGUE;
        loop {
            let size = self.size_of(blk);
            if size == 0 {
                eprintln!("{blk:#08x} epilogue");
                break;
            }
            let footer = unsafe { block::load_word(base, blk + size - WSIZE) };
            eprintln!(
                "{blk:#08x} size {size:6} {} footer {footer:#010x}",
                if self.alloc_of(blk) { "alloc" } else { "free " },
            );
            blk += size;
        }
    }
}
