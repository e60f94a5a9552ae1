//! Collaborator seams consumed by the marshaling layer.
//!
//! These traits are implemented by the host, not here; the provided
//! implementations cover hosts without their own infrastructure and the test
//! suite.

use parking_lot::Mutex;

use teeport_error::{MarshalError, Result};
use teeport_types::limits::CONTEXT_HEADER_SIZE;
use teeport_types::{ByteBlob, SessionContext};

/// Registry of live session contexts on the host side.
///
/// [`add_context`](Self::add_context) is invoked exactly once per successful
/// session-allocation call, before the response is emitted. This layer does
/// no locking of its own around the call; serialization is the host's
/// concern.
pub trait SessionCache {
    /// Prepare the cache. Must be called before any registration.
    fn initialize(&self) -> Result<()>;

    /// Register a freshly allocated context.
    fn add_context(&self, ctx: &SessionContext) -> Result<()>;
}

/// Process-local [`SessionCache`] for hosts without a session daemon.
///
/// Stores a copy of each registered context's header region; the trailer
/// stays with the owning call.
#[derive(Default)]
pub struct MemorySessionCache {
    entries: Mutex<Option<Vec<[u8; CONTEXT_HEADER_SIZE]>>>,
}

impl MemorySessionCache {
    /// An uninitialized cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, Vec::len)
    }

    /// Whether no contexts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionCache for MemorySessionCache {
    fn initialize(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.is_some() {
            return Err(MarshalError::internal("session cache already initialized"));
        }
        *entries = Some(Vec::new());
        Ok(())
    }

    fn add_context(&self, ctx: &SessionContext) -> Result<()> {
        let mut entries = self.entries.lock();
        let Some(entries) = entries.as_mut() else {
            return Err(MarshalError::internal("session cache not initialized"));
        };
        entries.push(*ctx.header());
        Ok(())
    }
}

/// Release hook for owned output blobs surviving serialization.
///
/// Receives the blob after the cleanup pass has applied the subtype re-tag
/// rule; implementations dispose of `blob.data` and may inspect `blob.kind`
/// to pick a release route.
pub trait BlobOwner {
    /// Release the blob's owned storage.
    fn free_blob(&self, blob: &mut ByteBlob<'_>);
}

/// Default [`BlobOwner`]: dropping the owned buffer returns it to its pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBlobOwner;

impl BlobOwner for HeapBlobOwner {
    fn free_blob(&self, blob: &mut ByteBlob<'_>) {
        blob.data = None;
    }
}
