//! Process-wide allocator: one segregated heap over the program break.
//!
//! Static state lives here. The heap types themselves are single-threaded
//! values; this module wraps the one process-wide instance in a spinlock and
//! exposes the classic malloc surface plus a `GlobalAlloc` adapter. The
//! instance initializes lazily on the first allocation and is never torn
//! down.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::region::SbrkRegion;
use crate::segregated::SegHeap;
use crate::sync::SpinMutex;
use crate::{AllocError, ALIGNMENT};

// =============================================================================
// Global static state
// =============================================================================

static HEAP: SpinMutex<SegHeap<SbrkRegion>> = SpinMutex::new(SegHeap::new(SbrkRegion::new()));

// =============================================================================
// The malloc surface
// =============================================================================

/// Explicitly initialize the process-wide heap. Allocation calls do this
/// lazily, so calling it is optional; calling it twice is harmless.
pub fn init() -> Result<(), AllocError> {
    HEAP.lock().init()
}

/// Allocate `size` bytes from the process-wide heap. See
/// [`SegHeap::malloc`] for the contract.
///
/// # Safety
///
/// The caller must not touch more than `size` bytes through the returned
/// pointer, nor use it after freeing it.
pub unsafe fn malloc(size: usize) -> *mut u8 {
    unsafe { HEAP.lock().malloc(size) }
}

/// Release a block obtained from this module.
///
/// # Safety
///
/// `ptr` must have come from this module and not have been freed already.
pub unsafe fn free(ptr: *mut u8) {
    unsafe { HEAP.lock().free(ptr) }
}

/// Resize a block obtained from this module. See [`SegHeap::realloc`].
///
/// # Safety
///
/// Same contract as [`free`] for `ptr`.
pub unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    unsafe { HEAP.lock().realloc(ptr, size) }
}

/// Allocate a zero-filled array from the process-wide heap. See
/// [`SegHeap::calloc`].
///
/// # Safety
///
/// Same contract as [`malloc`].
pub unsafe fn calloc(nmemb: usize, size: usize) -> *mut u8 {
    unsafe { HEAP.lock().calloc(nmemb, size) }
}

// =============================================================================
// GlobalAlloc adapter
// =============================================================================

/// Boundary-tag allocator for Rust programs.
///
/// Register with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: rbtmalloc::BtMalloc = rbtmalloc::BtMalloc;
/// ```
///
/// Payloads are 16-byte aligned; requests for stricter alignment are refused
/// with a null pointer.
pub struct BtMalloc;

unsafe impl GlobalAlloc for BtMalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            // Non-null aligned dangling pointer for ZSTs
            return layout.align() as *mut u8;
        }
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        unsafe { malloc(layout.size()) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() || layout.size() == 0 {
            return;
        }
        unsafe { free(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return layout.align() as *mut u8;
        }
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        // Recycled blocks are not zeroed; calloc clears the payload.
        unsafe { calloc(layout.size(), 1) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        if ptr.is_null() || layout.size() == 0 {
            return unsafe { malloc(new_size) };
        }
        if new_size == 0 {
            unsafe { free(ptr) };
            return layout.align() as *mut u8;
        }
        unsafe { crate::allocator::realloc(ptr, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_roundtrip() {
        unsafe {
            let p = malloc(100);
            assert!(!p.is_null());
            assert_eq!(p as usize % ALIGNMENT, 0);
            ptr::write_bytes(p, 0xAB, 100);
            let q = realloc(p, 300);
            assert!(!q.is_null());
            assert_eq!(*q, 0xAB);
            assert_eq!(*q.add(99), 0xAB);
            free(q);
        }
    }

    #[test]
    fn init_is_explicitly_callable() {
        init().unwrap();
        init().unwrap();
    }

    #[test]
    fn calloc_is_zeroed() {
        unsafe {
            let p = calloc(16, 64);
            assert!(!p.is_null());
            for i in 0..1024 {
                assert_eq!(*p.add(i), 0);
            }
            free(p);
        }
    }

    #[test]
    fn global_alloc_adapter() {
        let a = BtMalloc;
        unsafe {
            let layout = Layout::from_size_align(64, 16).unwrap();
            let p = a.alloc(layout);
            assert!(!p.is_null());
            ptr::write_bytes(p, 0x5A, 64);

            let z = a.alloc_zeroed(layout);
            assert!(!z.is_null());
            for i in 0..64 {
                assert_eq!(*z.add(i), 0);
            }

            let grown = a.realloc(p, layout, 256);
            assert!(!grown.is_null());
            assert_eq!(*grown, 0x5A);

            a.dealloc(grown, Layout::from_size_align(256, 16).unwrap());
            a.dealloc(z, layout);
        }
    }

    #[test]
    fn global_alloc_edge_cases() {
        let a = BtMalloc;
        unsafe {
            // ZSTs get a dangling, aligned, non-null pointer.
            let zst = a.alloc(Layout::from_size_align(0, 8).unwrap());
            assert_eq!(zst as usize, 8);
            a.dealloc(zst, Layout::from_size_align(0, 8).unwrap());

            // Alignment beyond the heap's guarantee is refused.
            let over = a.alloc(Layout::from_size_align(64, 64).unwrap());
            assert!(over.is_null());
        }
    }
}
