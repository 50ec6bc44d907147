//! # Alloc
//!
//! Fixed-chunk allocation over a caller-supplied region, sized to host
//! generated trampolines.
//!
//! A [`Pool`] splits its region into uniform chunks and hands them out with
//! bump allocation plus LIFO reuse of freed chunks. All bookkeeping lives in
//! the handle; the region's contents are never read or written by the pool,
//! so it can manage memory of any protection state (including
//! execute-only pages).

use std::ptr::NonNull;

/// A fixed-chunk allocator over a contiguous memory region.
///
/// The handle's fields are the pool's entire state, so cloning the handle
/// snapshots the pool and a caller can roll back by resuming from the
/// clone. Only one handle may hand out chunks at any given time; the region
/// stays exclusively managed, per [`new`](Self::new).
#[derive(Clone)]
pub struct Pool {
    /// Start of the managed region
    base: NonNull<u8>,
    /// Length of the managed region in bytes
    len: usize,
    /// Size of every chunk in bytes, fixed for the pool's lifetime
    chunk_size: usize,
    /// Index of the first never-yet-allocated chunk (high-water mark)
    wilderness: usize,
    /// Indices of freed, not-most-recent chunks, reused most-recent-first
    free: Vec<usize>,
}

impl Pool {
    /// Creates a pool managing `len` bytes at `base`, split into chunks of
    /// `chunk_size` bytes. A region too small for even one chunk yields a
    /// pool that is exhausted from the start.
    ///
    /// # Safety
    ///
    /// `base` must point to a region valid for `len` bytes for the pool's
    /// entire lifetime, and that region must be managed exclusively through
    /// this pool.
    pub unsafe fn new(base: NonNull<u8>, len: usize, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be nonzero");
        Self {
            base,
            len,
            chunk_size,
            wilderness: 0,
            free: Vec::new(),
        }
    }

    /// Hands out a chunk, or `None` when the pool is exhausted.
    ///
    /// The most recently freed chunk is reused first; only when no freed
    /// chunk is available does the wilderness advance.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        if let Some(index) = self.free.pop() {
            return Some(self.chunk_at(index));
        }

        // bump allocation from the never-yet-used tail of the region
        if self.len - self.wilderness * self.chunk_size < self.chunk_size {
            return None;
        }
        let index = self.wilderness;
        self.wilderness += 1;
        Some(self.chunk_at(index))
    }

    /// Returns a chunk to the pool.
    ///
    /// Freeing the most recently bump-allocated chunk retracts the
    /// wilderness, reclaiming the space outright; any other chunk is pushed
    /// onto the free list. Adjacent free chunks are never coalesced, which
    /// uniform chunk sizes make unnecessary.
    ///
    /// # Safety
    ///
    /// `chunk` must have been returned by this pool's [`alloc`](Self::alloc)
    /// and not freed since, and the caller must no longer use it. Debug
    /// builds detect double frees; release builds trust the caller.
    pub unsafe fn free(&mut self, chunk: NonNull<u8>) {
        let index = self.index_of(chunk);
        debug_assert!(index < self.wilderness, "chunk is not allocated");
        debug_assert!(!self.free.contains(&index), "double free of chunk {index}");

        if index + 1 == self.wilderness {
            // the chunk borders the wilderness, reclaim the space outright
            self.wilderness -= 1;
        } else {
            self.free.push(index);
        }
    }

    /// Bytes consumed by the bump frontier. Chunks sitting on the free list
    /// still count; only a wilderness retraction shrinks this value.
    pub fn used(&self) -> usize {
        self.wilderness * self.chunk_size
    }

    /// Total number of chunks the region can hold.
    pub fn capacity(&self) -> usize {
        self.len / self.chunk_size
    }

    /// Size of every chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Address of the chunk at `index`.
    fn chunk_at(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity());
        // Safety: index is inside the region the constructor vouched for
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.chunk_size)) }
    }

    /// Index of the chunk at `chunk`, the inverse of
    /// [`chunk_at`](Self::chunk_at).
    fn index_of(&self, chunk: NonNull<u8>) -> usize {
        let offset = chunk.as_ptr() as usize - self.base.as_ptr() as usize;
        debug_assert!(offset < self.len, "pointer is outside the pool");
        debug_assert!(
            offset % self.chunk_size == 0,
            "pointer is not on a chunk boundary"
        );
        offset / self.chunk_size
    }
}
