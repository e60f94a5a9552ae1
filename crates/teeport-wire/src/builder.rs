//! Container builder: appends typed entries into a caller-owned buffer.
//!
//! The builder never allocates; it targets whatever buffer the caller hands
//! it (for responses, a secure-heap buffer sized up front). Running out of
//! room is an encode fault, not a panic.

use teeport_error::{MarshalError, Result};
use teeport_types::{CallStatus, ElemWidth, Id128, MethodId};

use crate::{
    CONTAINER_HEADER_SIZE, CONTAINER_MAGIC, CONTAINER_VERSION, ENTRY_HEADER_SIZE, KIND_CONTEXT,
    KIND_METHOD_ID, KIND_RESULT_CODE,
};

/// A builder session targeting one response (or request) buffer.
///
/// Entries are appended back to back; [`finalize`](Self::finalize) patches
/// the header's `total_size` and yields the finished byte count. Dropping a
/// builder without finalizing leaves the buffer with a zero `total_size`,
/// which no reader accepts, so abandoned sessions cannot be mistaken for
/// complete containers.
#[derive(Debug)]
pub struct ContainerBuilder<'b> {
    buf: &'b mut [u8],
    used: usize,
}

impl<'b> ContainerBuilder<'b> {
    /// Begin a builder session, writing the container header.
    ///
    /// `total_size` stays zero until [`finalize`](Self::finalize).
    pub fn begin(buf: &'b mut [u8]) -> Result<Self> {
        if buf.len() < CONTAINER_HEADER_SIZE {
            return Err(MarshalError::ResponseFull {
                needed: CONTAINER_HEADER_SIZE,
                remaining: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&CONTAINER_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&CONTAINER_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&0u32.to_le_bytes());
        Ok(Self {
            buf,
            used: CONTAINER_HEADER_SIZE,
        })
    }

    /// Bytes written so far, including the container header.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Reserve `len` bytes past the current position.
    fn reserve(&mut self, len: usize) -> Result<&mut [u8]> {
        let remaining = self.buf.len() - self.used;
        if len > remaining {
            return Err(MarshalError::ResponseFull {
                needed: len,
                remaining,
            });
        }
        let start = self.used;
        self.used += len;
        Ok(&mut self.buf[start..start + len])
    }

    fn push_header(dst: &mut [u8], kind: u32, index: u32, payload_len: u32) {
        dst[0..4].copy_from_slice(&kind.to_le_bytes());
        dst[4..8].copy_from_slice(&index.to_le_bytes());
        dst[8..12].copy_from_slice(&payload_len.to_le_bytes());
    }

    /// Append an `I32` parameter entry.
    pub fn add_i32(&mut self, index: u32, value: i32) -> Result<()> {
        let dst = self.reserve(ENTRY_HEADER_SIZE + 4)?;
        Self::push_header(dst, 1, index, 4);
        dst[12..16].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Append an `I64` parameter entry.
    pub fn add_i64(&mut self, index: u32, value: i64) -> Result<()> {
        let dst = self.reserve(ENTRY_HEADER_SIZE + 8)?;
        Self::push_header(dst, 2, index, 8);
        dst[12..20].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Append an `Id128` parameter entry.
    pub fn add_id128(&mut self, index: u32, value: &Id128) -> Result<()> {
        let dst = self.reserve(ENTRY_HEADER_SIZE + 16)?;
        Self::push_header(dst, 3, index, 16);
        dst[12..28].copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Append a `ByteBlob` parameter entry.
    ///
    /// `payload` may be empty; the empty blob still carries its subtype.
    pub fn add_blob(&mut self, index: u32, subtype: u32, payload: &[u8]) -> Result<()> {
        let blob_len = u32::try_from(payload.len())
            .map_err(|_| MarshalError::internal("blob payload exceeds u32"))?;
        let total = ENTRY_HEADER_SIZE + 8 + payload.len();
        let payload_len = u32::try_from(total - ENTRY_HEADER_SIZE)
            .map_err(|_| MarshalError::internal("blob entry exceeds u32"))?;
        let dst = self.reserve(total)?;
        Self::push_header(dst, 4, index, payload_len);
        dst[12..16].copy_from_slice(&subtype.to_le_bytes());
        dst[16..20].copy_from_slice(&blob_len.to_le_bytes());
        dst[20..].copy_from_slice(payload);
        Ok(())
    }

    /// Append an integer-list parameter entry.
    ///
    /// `le_bytes` holds the raw little-endian elements and must be exactly
    /// `count * width` long.
    pub fn add_list(
        &mut self,
        index: u32,
        width: ElemWidth,
        count: u32,
        le_bytes: &[u8],
    ) -> Result<()> {
        let byte_len = (count as usize)
            .checked_mul(width.bytes())
            .ok_or(MarshalError::SizeOverflow {
                count,
                width: width.bytes(),
            })?;
        if byte_len != le_bytes.len() {
            return Err(MarshalError::internal(
                "list byte length disagrees with count",
            ));
        }
        let total = ENTRY_HEADER_SIZE + 4 + byte_len;
        let payload_len = u32::try_from(total - ENTRY_HEADER_SIZE)
            .map_err(|_| MarshalError::internal("list entry exceeds u32"))?;
        let kind = match width {
            ElemWidth::Bits32 => 5,
            ElemWidth::Bits64 => 6,
        };
        let dst = self.reserve(total)?;
        Self::push_header(dst, kind, index, payload_len);
        dst[12..16].copy_from_slice(&count.to_le_bytes());
        dst[16..].copy_from_slice(le_bytes);
        Ok(())
    }

    /// Append a context entry; `payload` empty is the valid-but-empty
    /// marker.
    pub fn add_context(&mut self, payload: &[u8]) -> Result<()> {
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| MarshalError::internal("context payload exceeds u32"))?;
        let dst = self.reserve(ENTRY_HEADER_SIZE + payload.len())?;
        Self::push_header(dst, KIND_CONTEXT, 0, payload_len);
        dst[12..].copy_from_slice(payload);
        Ok(())
    }

    /// Append the method-identifier metadata entry.
    pub fn add_method(&mut self, method: MethodId) -> Result<()> {
        let dst = self.reserve(ENTRY_HEADER_SIZE + 4)?;
        Self::push_header(dst, KIND_METHOD_ID, 0, 4);
        dst[12..16].copy_from_slice(&method.raw().to_le_bytes());
        Ok(())
    }

    /// Append the result-code metadata entry.
    pub fn add_result(&mut self, status: CallStatus) -> Result<()> {
        let dst = self.reserve(ENTRY_HEADER_SIZE + 4)?;
        Self::push_header(dst, KIND_RESULT_CODE, 0, 4);
        dst[12..16].copy_from_slice(&status.raw().to_le_bytes());
        Ok(())
    }

    /// Patch `total_size` and end the session, returning the container's
    /// final byte count.
    pub fn finalize(self) -> Result<usize> {
        let total = u32::try_from(self.used)
            .map_err(|_| MarshalError::internal("container size exceeds u32"))?;
        self.buf[8..12].copy_from_slice(&total.to_le_bytes());
        Ok(self.used)
    }
}
