//! Backing memory for a segment.
//!
//! [`Region`] is a raw, non-owning view used for offset arithmetic.
//! [`HeapRegion`] owns a zeroed, cache-line aligned allocation and hands out
//! `Region` views of it.

use std::alloc::{self, Layout};
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

/// Alignment of every heap region (one cache line).
pub const REGION_ALIGN: usize = 64;

/// A raw view of a memory region. Does not own the memory.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a view over `len` bytes at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for as long
    /// as the view (or any copy of it) is used.
    pub unsafe fn from_raw(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the byte at `offset`.
    #[inline]
    pub fn offset(&self, offset: usize) -> *mut u8 {
        assert!(offset <= self.len, "offset {offset} out of region");
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// Borrow a `T` stored at `offset`.
    ///
    /// # Safety
    ///
    /// A valid, initialized `T` must live at `offset`, and the memory behind
    /// the region must outlive `'a`. The returned borrow is not tied to this
    /// `Region` value, which is only a view.
    #[inline]
    pub unsafe fn get<'a, T>(&self, offset: usize) -> &'a T {
        assert!(offset + size_of::<T>() <= self.len, "read past region end");
        let ptr = self.offset(offset);
        debug_assert!((ptr as usize).is_multiple_of(align_of::<T>()));
        unsafe { &*(ptr as *const T) }
    }

    /// Write a `T` at `offset` without reading or dropping what was there.
    ///
    /// # Safety
    ///
    /// The bytes at `offset` must not be in use by anyone else.
    #[inline]
    pub unsafe fn put<T>(&self, offset: usize, value: T) {
        assert!(offset + size_of::<T>() <= self.len, "write past region end");
        let ptr = self.offset(offset);
        debug_assert!((ptr as usize).is_multiple_of(align_of::<T>()));
        unsafe { std::ptr::write(ptr as *mut T, value) }
    }
}

/// A zeroed heap allocation that owns its bytes.
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocate `len` zeroed bytes aligned to [`REGION_ALIGN`].
    pub fn new_zeroed(len: usize) -> Self {
        assert!(len > 0, "region must not be empty");
        let layout = match Layout::from_size_align(len, REGION_ALIGN) {
            Ok(layout) => layout,
            Err(_) => panic!("region of {len} bytes is too large"),
        };
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout)
        };
        Self { ptr, layout }
    }

    /// A view of the whole allocation.
    #[inline]
    pub fn region(&self) -> Region {
        unsafe { Region::from_raw(self.ptr, self.layout.size()) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
