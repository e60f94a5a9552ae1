//! Secure-heap buffer handles and the allocator seam.
//!
//! Every dynamic allocation the marshaling layer makes (owned blob and list
//! copies, flattened contexts, response buffers) goes through a
//! caller-supplied [`SecureAllocator`], so hosts can substitute TEE-aware
//! carveout memory without touching the codecs. The provided [`SecureHeap`]
//! is a budget-bounded pool over ordinary heap memory.
//!
//! # Key types
//!
//! - [`SecureBuf`]: owned, exact-length byte buffer (`Send + 'static`).  On
//!   drop, its budget is returned and the backing allocation is recycled.
//! - [`SecureHeap`]: bounded pool; exhausting the budget fails allocation
//!   rather than growing.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use teeport_error::{MarshalError, Result};

// ---------------------------------------------------------------------------
// SecureBuf
// ---------------------------------------------------------------------------

/// Owned byte buffer handle from a [`SecureAllocator`].
///
/// Always exactly the length that was requested, zero-filled on allocation.
/// `Send + 'static`, so decoded values can outlive the call frame that
/// produced them when ownership is transferred.
pub struct SecureBuf {
    /// Backing storage.  `None` only transiently during `Drop`.
    bytes: Option<Vec<u8>>,
    /// Pool to return the allocation to on drop (`None` for standalone
    /// buffers).
    pool: Option<Arc<HeapInner>>,
}

// Compile-time assertion: SecureBuf must be Send + 'static.
const _: () = {
    const fn assert_send_static<T: Send + 'static>() {}
    assert_send_static::<SecureBuf>();
};

impl SecureBuf {
    /// Create a standalone zero-filled buffer (not pool-backed).
    ///
    /// Intended for tests and hosts that do not meter secure memory.
    #[must_use]
    pub fn standalone(len: usize) -> Self {
        Self {
            bytes: Some(vec![0u8; len]),
            pool: None,
        }
    }

    /// Buffer length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the buffer is zero-length.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The buffer contents.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_deref().expect("SecureBuf backing consumed")
    }

    /// The buffer contents, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.bytes
            .as_deref_mut()
            .expect("SecureBuf backing consumed")
    }

    /// Shrink the buffer to `len` bytes, returning the excess budget to the
    /// pool. Used after two-pass encodes that allocate a bound and fill less.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the current length.
    pub fn truncate(&mut self, len: usize) {
        let bytes = self.bytes.as_mut().expect("SecureBuf backing consumed");
        assert!(len <= bytes.len(), "SecureBuf::truncate cannot grow");
        let freed = bytes.len() - len;
        bytes.truncate(len);
        if freed > 0 {
            if let Some(ref pool) = self.pool {
                pool.in_use.fetch_sub(freed, Ordering::AcqRel);
            }
        }
    }
}

impl Deref for SecureBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for SecureBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for SecureBuf {
    fn drop(&mut self) {
        if let Some(bytes) = self.bytes.take() {
            if let Some(ref pool) = self.pool {
                pool.return_buf(bytes);
            }
            // Otherwise the Vec drops and frees normally.
        }
    }
}

impl fmt::Debug for SecureBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBuf")
            .field("len", &self.len())
            .field("pooled", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SecureAllocator
// ---------------------------------------------------------------------------

/// Allocation seam for everything this layer copies across the boundary.
///
/// Implementations must return a zero-filled buffer of exactly `len` bytes
/// or an allocation error; they must never return a shorter buffer.
pub trait SecureAllocator {
    /// Allocate `len` bytes.
    ///
    /// `len == 0` is a contract violation: empty blobs, lists, and trailers
    /// are represented without backing storage, so no caller has a reason to
    /// request a zero-length allocation.
    fn alloc(&self, len: usize) -> Result<SecureBuf>;
}

// ---------------------------------------------------------------------------
// SecureHeap
// ---------------------------------------------------------------------------

struct HeapInner {
    /// Total bytes this heap may hand out at once. `usize::MAX` = unbounded.
    budget: usize,
    /// Bytes currently held by live `SecureBuf`s.
    in_use: AtomicUsize,
    /// Recycled backing allocations, largest-capacity last.
    free: Mutex<Vec<Vec<u8>>>,
}

/// Max recycled allocations retained before excess ones free normally.
const MAX_CACHED_BUFS: usize = 16;

impl HeapInner {
    fn return_buf(&self, bytes: Vec<u8>) {
        self.in_use.fetch_sub(bytes.len(), Ordering::AcqRel);
        let mut free = self.free.lock();
        if free.len() < MAX_CACHED_BUFS {
            free.push(bytes);
        }
    }
}

/// Budget-bounded secure-memory pool.
///
/// Models a small carveout: allocations are metered against a fixed byte
/// budget and fail with an allocation error once it is exhausted, instead of
/// growing. Thread-safe and cheaply cloneable (backed by `Arc`), so one heap
/// can serve many sequential calls.
#[derive(Clone)]
pub struct SecureHeap {
    inner: Arc<HeapInner>,
}

impl SecureHeap {
    /// Create a heap with a fixed byte budget.
    #[must_use]
    pub fn with_budget(budget: usize) -> Self {
        Self {
            inner: Arc::new(HeapInner {
                budget,
                in_use: AtomicUsize::new(0),
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a heap with no budget limit (tests, non-metered hosts).
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_budget(usize::MAX)
    }

    /// Bytes currently held by live buffers.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }
}

impl SecureAllocator for SecureHeap {
    fn alloc(&self, len: usize) -> Result<SecureBuf> {
        if len == 0 {
            debug_assert!(false, "zero-length secure allocation");
            return Err(MarshalError::internal("zero-length secure allocation"));
        }

        // Reserve budget first so concurrent callers cannot oversubscribe.
        loop {
            let current = self.inner.in_use.load(Ordering::Acquire);
            let next = match current.checked_add(len) {
                Some(n) if n <= self.inner.budget => n,
                _ => return Err(MarshalError::OutOfMemory { requested: len }),
            };
            if self
                .inner
                .in_use
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        let recycled = {
            let mut free = self.inner.free.lock();
            let slot = free.iter().position(|b| b.capacity() >= len);
            slot.map(|i| free.swap_remove(i))
        };

        let mut bytes = recycled.unwrap_or_default();
        bytes.clear();
        bytes.resize(len, 0);

        Ok(SecureBuf {
            bytes: Some(bytes),
            pool: Some(Arc::clone(&self.inner)),
        })
    }
}

impl fmt::Debug for SecureHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureHeap")
            .field("budget", &self.inner.budget)
            .field("in_use", &self.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_exact_len_zero_filled() {
        let heap = SecureHeap::unbounded();
        let buf = heap.alloc(37).unwrap();
        assert_eq!(buf.len(), 37);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn budget_exhaustion_fails_closed() {
        let heap = SecureHeap::with_budget(64);
        let _a = heap.alloc(48).unwrap();
        let err = heap.alloc(32).unwrap_err();
        assert!(matches!(err, MarshalError::OutOfMemory { requested: 32 }));
    }

    #[test]
    fn drop_returns_budget() {
        let heap = SecureHeap::with_budget(64);
        let a = heap.alloc(64).unwrap();
        assert_eq!(heap.in_use(), 64);
        drop(a);
        assert_eq!(heap.in_use(), 0);
        assert!(heap.alloc(64).is_ok());
    }

    #[test]
    fn truncate_returns_excess_budget() {
        let heap = SecureHeap::with_budget(100);
        let mut a = heap.alloc(80).unwrap();
        a.truncate(30);
        assert_eq!(a.len(), 30);
        assert_eq!(heap.in_use(), 30);
        let _b = heap.alloc(70).unwrap();
    }

    #[test]
    fn recycled_buffers_are_zeroed() {
        let heap = SecureHeap::unbounded();
        let mut a = heap.alloc(16).unwrap();
        a.as_mut_slice().fill(0xAA);
        drop(a);
        let b = heap.alloc(8).unwrap();
        assert!(b.iter().all(|&x| x == 0), "recycled buffer leaked bytes");
    }

    #[test]
    fn zero_length_alloc_is_contract_violation() {
        let heap = SecureHeap::unbounded();
        // debug_assert fires under `cargo test`; check the release-path error
        // shape via catch_unwind only when assertions are disabled.
        if cfg!(debug_assertions) {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| heap.alloc(0)));
            assert!(outcome.is_err());
        } else {
            let err = heap.alloc(0).unwrap_err();
            assert!(err.is_contract_violation());
        }
    }

    #[test]
    fn standalone_buf_not_pooled() {
        let buf = SecureBuf::standalone(4);
        assert_eq!(buf.len(), 4);
        assert!(format!("{buf:?}").contains("pooled: false"));
    }
}
