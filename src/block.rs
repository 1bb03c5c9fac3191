//! Block encoding: header/footer words and heap navigation.
//!
//! A block is `[header:4][...payload...][footer:4]`. Header and footer both
//! pack the block size (a multiple of 8, upper 29 bits) with the alloc flag
//! (bit 0); bits 1-2 stay zero. Blocks are addressed as byte offsets from
//! the region base, and this module is the crate's entire raw word-access
//! surface.

use crate::WSIZE;

pub(crate) type Word = u32;

const ALLOC_MASK: Word = 0x1;
const SIZE_MASK: Word = !0x7;

/// Pack a block size and alloc flag into a header/footer word.
#[inline]
pub(crate) fn pack(size: usize, alloc: bool) -> Word {
    debug_assert!(size & 0x7 == 0);
    size as Word | alloc as Word
}

#[inline]
pub(crate) fn extract_size(word: Word) -> usize {
    (word & SIZE_MASK) as usize
}

#[inline]
pub(crate) fn extract_alloc(word: Word) -> bool {
    word & ALLOC_MASK != 0
}

/// Load the word `off` bytes past the region base.
#[inline]
pub(crate) unsafe fn load_word(base: *mut u8, off: usize) -> Word {
    unsafe { (base.add(off) as *const Word).read_unaligned() }
}

#[inline]
pub(crate) unsafe fn store_word(base: *mut u8, off: usize, word: Word) {
    unsafe { (base.add(off) as *mut Word).write_unaligned(word) }
}

/// Load a free-list link: a pointer-sized block offset stored inside a free
/// block's payload area.
#[inline]
pub(crate) unsafe fn load_link(base: *mut u8, off: usize) -> usize {
    unsafe { (base.add(off) as *const usize).read_unaligned() }
}

#[inline]
pub(crate) unsafe fn store_link(base: *mut u8, off: usize, link: usize) {
    unsafe { (base.add(off) as *mut usize).write_unaligned(link) }
}

/// Size of the block whose header sits at `block`.
#[inline]
pub(crate) unsafe fn size_at(base: *mut u8, block: usize) -> usize {
    unsafe { extract_size(load_word(base, block)) }
}

/// Alloc flag of the block whose header sits at `block`.
#[inline]
pub(crate) unsafe fn alloc_at(base: *mut u8, block: usize) -> bool {
    unsafe { extract_alloc(load_word(base, block)) }
}

#[inline]
pub(crate) unsafe fn write_header(base: *mut u8, block: usize, size: usize, alloc: bool) {
    unsafe { store_word(base, block, pack(size, alloc)) }
}

/// Write the footer word of a block of `size` bytes starting at `block`.
///
/// The footer position comes from the `size` argument, not from the current
/// header, so header and footer may be rewritten in either order.
#[inline]
pub(crate) unsafe fn write_footer(base: *mut u8, block: usize, size: usize, alloc: bool) {
    unsafe { store_word(base, block + size - WSIZE, pack(size, alloc)) }
}

/// Offset of the next block in address order.
#[inline]
pub(crate) unsafe fn next_block(base: *mut u8, block: usize) -> usize {
    unsafe { block + size_at(base, block) }
}

/// Footer word of the previous block: the word just before this header.
#[inline]
pub(crate) unsafe fn prev_footer(base: *mut u8, block: usize) -> Word {
    unsafe { load_word(base, block - WSIZE) }
}

/// Offset of the previous block, derived from its footer. Only meaningful
/// while the prologue sentinel sits below `block`.
#[inline]
pub(crate) unsafe fn prev_block(base: *mut u8, block: usize) -> usize {
    unsafe { block - extract_size(prev_footer(base, block)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_extract_roundtrip() {
        for size in [0usize, 8, 16, 48, 4096, 1 << 20] {
            for alloc in [false, true] {
                let word = pack(size, alloc);
                assert_eq!(extract_size(word), size);
                assert_eq!(extract_alloc(word), alloc);
            }
        }
    }

    #[test]
    fn alloc_flag_does_not_disturb_size() {
        let word = pack(4096, true);
        assert_eq!(word, 4096 | 1);
        assert_eq!(extract_size(word), 4096);
        assert!(extract_alloc(word));
    }

    #[test]
    fn header_footer_navigation() {
        let mut buf = vec![0u8; 256];
        let base = buf.as_mut_ptr();

        unsafe {
            write_header(base, 16, 48, false);
            write_footer(base, 16, 48, false);
            assert_eq!(size_at(base, 16), 48);
            assert!(!alloc_at(base, 16));
            assert_eq!(load_word(base, 16), load_word(base, 16 + 48 - WSIZE));

            write_header(base, 64, 32, true);
            write_footer(base, 64, 32, true);
            assert_eq!(next_block(base, 16), 64);
            assert_eq!(prev_block(base, 64), 16);
        }
    }

    #[test]
    fn links_roundtrip() {
        let mut buf = vec![0u8; 64];
        let base = buf.as_mut_ptr();

        unsafe {
            store_link(base, 8, 0x1234);
            store_link(base, 16, 0x5678);
            assert_eq!(load_link(base, 8), 0x1234);
            assert_eq!(load_link(base, 16), 0x5678);
        }
    }
}
