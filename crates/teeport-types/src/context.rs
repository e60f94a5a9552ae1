//! The opaque session context owned by a call.
//!
//! A context is a fixed 64-byte header region written by the TEE plus an
//! optional variable-length trailer. Two fields inside the header matter to
//! the marshaling layer: the declared trailer length and the trailer
//! pointer. In a live context the pointer field is TEE-owned and may hold
//! anything; in a serialized copy it must read as null. Everything else in
//! the header is opaque and carried verbatim.

use std::fmt;

use crate::limits::{CONTEXT_HEADER_SIZE, CONTEXT_TRAILER_LEN_OFFSET, CONTEXT_TRAILER_PTR_OFFSET};
use crate::secmem::SecureBuf;

/// Read the declared trailer length from a header region.
///
/// # Panics
///
/// Panics if `header` is shorter than the fixed header size.
#[must_use]
pub fn read_trailer_len(header: &[u8]) -> u32 {
    let raw: [u8; 4] = header[CONTEXT_TRAILER_LEN_OFFSET..CONTEXT_TRAILER_LEN_OFFSET + 4]
        .try_into()
        .expect("header shorter than fixed size");
    u32::from_le_bytes(raw)
}

/// Read the trailer-pointer field from a header region.
///
/// # Panics
///
/// Panics if `header` is shorter than the fixed header size.
#[must_use]
pub fn read_trailer_ptr(header: &[u8]) -> u64 {
    let raw: [u8; 8] = header[CONTEXT_TRAILER_PTR_OFFSET..CONTEXT_TRAILER_PTR_OFFSET + 8]
        .try_into()
        .expect("header shorter than fixed size");
    u64::from_le_bytes(raw)
}

/// Overwrite the trailer-pointer field in a header region.
///
/// # Panics
///
/// Panics if `header` is shorter than the fixed header size.
pub fn write_trailer_ptr(header: &mut [u8], value: u64) {
    header[CONTEXT_TRAILER_PTR_OFFSET..CONTEXT_TRAILER_PTR_OFFSET + 8]
        .copy_from_slice(&value.to_le_bytes());
}

fn write_trailer_len(header: &mut [u8], value: u32) {
    header[CONTEXT_TRAILER_LEN_OFFSET..CONTEXT_TRAILER_LEN_OFFSET + 4]
        .copy_from_slice(&value.to_le_bytes());
}

/// An opaque TEE session context: fixed header plus optional trailer.
///
/// The trailer, when present, is exclusively owned by the context until
/// explicitly freed or transferred. [`attach_trailer`](Self::attach_trailer)
/// and [`clear_trailer`](Self::clear_trailer) keep the header's declared
/// length in sync with the attached storage.
pub struct SessionContext {
    header: [u8; CONTEXT_HEADER_SIZE],
    trailer: Option<SecureBuf>,
}

impl SessionContext {
    /// A fully zeroed context with no trailer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            header: [0u8; CONTEXT_HEADER_SIZE],
            trailer: None,
        }
    }

    /// A context with the given header region and no trailer.
    ///
    /// The declared trailer length is forced to zero to match.
    #[must_use]
    pub fn with_header(mut header: [u8; CONTEXT_HEADER_SIZE]) -> Self {
        write_trailer_len(&mut header, 0);
        Self {
            header,
            trailer: None,
        }
    }

    /// The header region.
    #[inline]
    #[must_use]
    pub const fn header(&self) -> &[u8; CONTEXT_HEADER_SIZE] {
        &self.header
    }

    /// The header region, mutably.
    ///
    /// Raw access for the TEE-facing caller that populates the opaque
    /// portion. Writing the declared-length field directly desynchronizes it
    /// from the attached trailer; use [`attach_trailer`](Self::attach_trailer)
    /// / [`clear_trailer`](Self::clear_trailer) for that.
    #[inline]
    pub fn header_mut(&mut self) -> &mut [u8; CONTEXT_HEADER_SIZE] {
        &mut self.header
    }

    /// Attach a trailer, transferring ownership to the context and updating
    /// the declared length.
    ///
    /// # Panics
    ///
    /// Panics if the trailer is empty (empty trailers are represented as
    /// `None`) or longer than `u32::MAX`.
    pub fn attach_trailer(&mut self, trailer: SecureBuf) {
        assert!(!trailer.is_empty(), "empty trailer must be None");
        let len = u32::try_from(trailer.len()).expect("trailer length fits u32");
        write_trailer_len(&mut self.header, len);
        self.trailer = Some(trailer);
    }

    /// Drop any attached trailer and zero the declared length.
    pub fn clear_trailer(&mut self) {
        write_trailer_len(&mut self.header, 0);
        self.trailer = None;
    }

    /// The attached trailer bytes, if any.
    #[must_use]
    pub fn trailer(&self) -> Option<&[u8]> {
        self.trailer.as_ref().map(|t| t.as_slice())
    }

    /// Actual attached trailer length in bytes.
    #[must_use]
    pub fn trailer_len(&self) -> usize {
        self.trailer.as_ref().map_or(0, SecureBuf::len)
    }

    /// The declared trailer length field from the header.
    #[must_use]
    pub fn declared_trailer_len(&self) -> u32 {
        read_trailer_len(&self.header)
    }

    /// The live trailer-pointer field from the header.
    #[must_use]
    pub fn trailer_ptr_field(&self) -> u64 {
        read_trailer_ptr(&self.header)
    }

    /// Zero the whole context: header cleared, trailer dropped.
    ///
    /// This is the restore-failure state; a caller observing it sees no
    /// remnant of a partial decode.
    pub fn zeroize(&mut self) {
        self.header = [0u8; CONTEXT_HEADER_SIZE];
        self.trailer = None;
    }

    /// Whether the context is fully zeroed with no trailer.
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.trailer.is_none() && self.header.iter().all(|&b| b == 0)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

// Contents are secret session state; Debug shows shape only.
impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("declared_trailer_len", &self.declared_trailer_len())
            .field("trailer_len", &self.trailer_len())
            .finish_non_exhaustive()
    }
}
