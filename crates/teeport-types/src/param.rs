//! Typed call parameters and the fixed-capacity parameter table.
//!
//! A parameter's kind and payload travel together in one tagged value
//! ([`ParamValue`]), so reading the wrong payload for a kind is not
//! representable. Dynamically sized payloads carry an explicit ownership
//! mode: [`BlobData::Borrowed`] points into the caller-owned message buffer
//! (valid for the call's duration, never freed here), [`BlobData::Owned`]
//! holds a secure-heap copy.

use std::fmt;

use teeport_error::{MarshalError, Result};

use crate::Id128;
use crate::limits::MAX_PARAMS;
use crate::secmem::SecureBuf;

// ---------------------------------------------------------------------------
// Kinds and modes
// ---------------------------------------------------------------------------

/// Parameter kind tags, also the wire entry-kind code space for slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum ParamKind {
    Invalid = 0,
    I32 = 1,
    I64 = 2,
    Id128 = 3,
    ByteBlob = 4,
    I32List = 5,
    I64List = 6,
}

impl ParamKind {
    /// Decode a wire kind code. Returns `None` for codes outside the closed
    /// set.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Invalid),
            1 => Some(Self::I32),
            2 => Some(Self::I64),
            3 => Some(Self::Id128),
            4 => Some(Self::ByteBlob),
            5 => Some(Self::I32List),
            6 => Some(Self::I64List),
            _ => None,
        }
    }

    /// The wire kind code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Short name for logs and capacity errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Id128 => "id128",
            Self::ByteBlob => "blob",
            Self::I32List => "i32-list",
            Self::I64List => "i64-list",
        }
    }

    /// Element width for list kinds, `None` otherwise.
    #[must_use]
    pub const fn element_width(self) -> Option<ElemWidth> {
        match self {
            Self::I32List => Some(ElemWidth::Bits32),
            Self::I64List => Some(ElemWidth::Bits64),
            _ => None,
        }
    }
}

/// Ownership mode of a decoded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Zero-copy view into the message buffer, valid for the call's
    /// duration.
    Borrowed,
    /// Secure-heap copy owned by the decoded value.
    Owned,
}

/// Caller-supplied ownership capability, threaded explicitly through every
/// blob/list decode call and never inferred from the data.
///
/// Requesting a copy requires handing over the allocator to copy with, so
/// an owned decode without an allocation route is unrepresentable.
#[derive(Clone, Copy)]
pub enum DecodePolicy<'a> {
    /// Record the source location, zero-copy.
    Borrow,
    /// Copy into a fresh allocation from this allocator.
    Copy(&'a dyn crate::secmem::SecureAllocator),
}

impl DecodePolicy<'_> {
    /// The ownership mode this policy produces.
    #[must_use]
    pub const fn mode(&self) -> DecodeMode {
        match self {
            Self::Borrow => DecodeMode::Borrowed,
            Self::Copy(_) => DecodeMode::Owned,
        }
    }
}

impl fmt::Debug for DecodePolicy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Borrow => "DecodePolicy::Borrow",
            Self::Copy(_) => "DecodePolicy::Copy",
        })
    }
}

/// Blob subtype tag, carried on the wire next to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BlobKind {
    /// Plain user-mode memory.
    UserMemory = 0,
    /// Wrapper around a secure-memory handle.
    SecureHandle = 1,
    /// Handle-backed secure memory currently mapped for decrypt/copy.
    ///
    /// Freeing a blob under this tag would also release the underlying
    /// handle; cleanup re-tags to [`BlobKind::UserMemory`] first.
    SecureHandleDecrypt = 2,
}

impl BlobKind {
    /// Decode a wire subtype code.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::UserMemory),
            1 => Some(Self::SecureHandle),
            2 => Some(Self::SecureHandleDecrypt),
            _ => None,
        }
    }

    /// The wire subtype code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Element width of an integer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemWidth {
    Bits32,
    Bits64,
}

impl ElemWidth {
    /// Width in bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Dynamically sized payloads
// ---------------------------------------------------------------------------

/// Storage for a decoded blob or list payload.
pub enum BlobData<'m> {
    /// Zero-copy view into the caller-owned message buffer.
    Borrowed(&'m [u8]),
    /// Secure-heap copy owned by this value.
    Owned(SecureBuf),
}

impl BlobData<'_> {
    /// The payload bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Borrowed(bytes) => bytes,
            Self::Owned(buf) => buf.as_slice(),
        }
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the payload is zero-length. Well-formed values never store
    /// empty payloads, so this indicates a construction bug.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ownership mode this payload was decoded with.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> DecodeMode {
        match self {
            Self::Borrowed(_) => DecodeMode::Borrowed,
            Self::Owned(_) => DecodeMode::Owned,
        }
    }
}

impl fmt::Debug for BlobData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobData")
            .field("mode", &self.mode())
            .field("len", &self.len())
            .finish()
    }
}

/// A typed byte blob parameter.
///
/// Invariant: `data` is `None` exactly when the blob is empty; an empty blob
/// is never backed by a zero-length allocation or slice.
#[derive(Debug)]
pub struct ByteBlob<'m> {
    /// Subtype tag, carried through serialization untouched (except for the
    /// cleanup re-tag rule).
    pub kind: BlobKind,
    /// Payload storage, `None` for the empty blob.
    pub data: Option<BlobData<'m>>,
}

impl<'m> ByteBlob<'m> {
    /// The empty blob of a given subtype.
    #[must_use]
    pub const fn empty(kind: BlobKind) -> Self {
        Self { kind, data: None }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, BlobData::len)
    }

    /// Whether this is the empty blob.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    /// The payload bytes (empty slice for the empty blob).
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.data.as_ref().map_or(&[], BlobData::as_slice)
    }

    /// Whether this blob owns its storage.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self.data, Some(BlobData::Owned(_)))
    }

    /// Unbind an owned blob from the message-buffer lifetime so it can
    /// outlive the call frame that decoded it.
    ///
    /// Borrowed payloads are only valid for the call's duration and are
    /// rejected; re-decode with a copy policy first.
    pub fn detach(self) -> Result<ByteBlob<'static>> {
        match self.data {
            None => Ok(ByteBlob {
                kind: self.kind,
                data: None,
            }),
            Some(BlobData::Owned(buf)) => Ok(ByteBlob {
                kind: self.kind,
                data: Some(BlobData::Owned(buf)),
            }),
            Some(BlobData::Borrowed(_)) => {
                Err(MarshalError::internal("detaching a borrowed blob"))
            }
        }
    }
}

/// A homogeneous fixed-width integer list parameter.
///
/// Elements are stored as raw little-endian bytes so borrowed decodes can
/// point straight into the message buffer regardless of its alignment.
/// Invariant: `count == 0` exactly when `data` is `None`, and otherwise
/// `data.len() == count * width.bytes()`.
#[derive(Debug)]
pub struct IntList<'m> {
    /// Element width.
    pub width: ElemWidth,
    /// Number of elements.
    pub count: u32,
    /// Raw little-endian element bytes, `None` for the empty list.
    pub data: Option<BlobData<'m>>,
}

impl<'m> IntList<'m> {
    /// The empty list of a given width.
    #[must_use]
    pub const fn empty(width: ElemWidth) -> Self {
        Self {
            width,
            count: 0,
            data: None,
        }
    }

    /// Whether this is the empty list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    /// The raw element bytes (empty slice for the empty list).
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.data.as_ref().map_or(&[], BlobData::as_slice)
    }

    /// Whether this list owns its storage.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self.data, Some(BlobData::Owned(_)))
    }

    /// Element at `idx` as `i32`. `None` if out of range or the list is
    /// 64-bit.
    #[must_use]
    pub fn get_i32(&self, idx: u32) -> Option<i32> {
        if self.width != ElemWidth::Bits32 || idx >= self.count {
            return None;
        }
        let off = idx as usize * 4;
        let raw: [u8; 4] = self.bytes().get(off..off + 4)?.try_into().ok()?;
        Some(i32::from_le_bytes(raw))
    }

    /// Element at `idx` as `i64`. `None` if out of range or the list is
    /// 32-bit.
    #[must_use]
    pub fn get_i64(&self, idx: u32) -> Option<i64> {
        if self.width != ElemWidth::Bits64 || idx >= self.count {
            return None;
        }
        let off = idx as usize * 8;
        let raw: [u8; 8] = self.bytes().get(off..off + 8)?.try_into().ok()?;
        Some(i64::from_le_bytes(raw))
    }

    /// Decode all elements of a 32-bit list.
    #[must_use]
    pub fn to_i32_vec(&self) -> Option<Vec<i32>> {
        if self.width != ElemWidth::Bits32 {
            return None;
        }
        (0..self.count).map(|i| self.get_i32(i)).collect()
    }

    /// Decode all elements of a 64-bit list.
    #[must_use]
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        if self.width != ElemWidth::Bits64 {
            return None;
        }
        (0..self.count).map(|i| self.get_i64(i)).collect()
    }

    /// Unbind an owned list from the message-buffer lifetime.
    ///
    /// Same contract as [`ByteBlob::detach`].
    pub fn detach(self) -> Result<IntList<'static>> {
        match self.data {
            None => Ok(IntList::empty(self.width)),
            Some(BlobData::Owned(buf)) => Ok(IntList {
                width: self.width,
                count: self.count,
                data: Some(BlobData::Owned(buf)),
            }),
            Some(BlobData::Borrowed(_)) => {
                Err(MarshalError::internal("detaching a borrowed list"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter and table
// ---------------------------------------------------------------------------

/// A parameter's kind and payload as one tagged value.
#[derive(Debug)]
pub enum ParamValue<'m> {
    /// Slot not populated.
    Invalid,
    I32(i32),
    I64(i64),
    Id128(Id128),
    ByteBlob(ByteBlob<'m>),
    I32List(IntList<'m>),
    I64List(IntList<'m>),
}

impl ParamValue<'_> {
    /// The kind tag of this value.
    #[must_use]
    pub const fn kind(&self) -> ParamKind {
        match self {
            Self::Invalid => ParamKind::Invalid,
            Self::I32(_) => ParamKind::I32,
            Self::I64(_) => ParamKind::I64,
            Self::Id128(_) => ParamKind::Id128,
            Self::ByteBlob(_) => ParamKind::ByteBlob,
            Self::I32List(_) => ParamKind::I32List,
            Self::I64List(_) => ParamKind::I64List,
        }
    }

    /// Whether the slot is unpopulated.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }
}

/// One slot of the parameter table.
#[derive(Debug)]
pub struct Parameter<'m> {
    /// Slot position; equals the array index for every slot, populated or
    /// not, so callees can address slots uniformly.
    pub index: u32,
    /// Whether the callee filled this slot for the response.
    pub is_output: bool,
    /// The slot's tagged value.
    pub value: ParamValue<'m>,
}

impl<'m> Parameter<'m> {
    /// An unpopulated slot at `index`.
    #[must_use]
    pub const fn invalid(index: u32) -> Self {
        Self {
            index,
            is_output: false,
            value: ParamValue::Invalid,
        }
    }
}

/// Fixed-capacity table of typed, indexed parameter slots.
///
/// Created fresh per call: populated by the deserializer, mutated by the
/// callee, consumed by the serializer, released by parameter cleanup. Never
/// shared across calls.
#[derive(Debug)]
pub struct ParameterTable<'m> {
    slots: [Parameter<'m>; MAX_PARAMS],
}

impl<'m> ParameterTable<'m> {
    /// A table of `MAX_PARAMS` unpopulated slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|i| Parameter::invalid(i as u32)),
        }
    }

    /// Number of slots.
    #[must_use]
    pub const fn capacity() -> usize {
        MAX_PARAMS
    }

    /// The slot at `index`, if in range.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&Parameter<'m>> {
        self.slots.get(index as usize)
    }

    /// The slot at `index`, mutably, if in range.
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Parameter<'m>> {
        self.slots.get_mut(index as usize)
    }

    /// Check that `index` names a slot that has not been written yet.
    ///
    /// The parse pass runs this before decoding an entry's payload, so a
    /// rejected entry causes no work and no mutation.
    pub fn ensure_vacant(&self, index: u32) -> Result<()> {
        let Some(slot) = self.slots.get(index as usize) else {
            return Err(MarshalError::IndexOutOfRange {
                index,
                max: MAX_PARAMS,
            });
        };
        if !slot.value.is_invalid() {
            return Err(MarshalError::DuplicateSlot { index });
        }
        Ok(())
    }

    /// Record a decoded input value into a slot (parse-side write).
    ///
    /// Enforces the one-shot transition Invalid → concrete: an out-of-range
    /// index or a second write to the same slot is rejected without touching
    /// the table, so the first value is preserved unchanged.
    pub fn fill_slot(&mut self, index: u32, value: ParamValue<'m>) -> Result<()> {
        if value.is_invalid() {
            return Err(MarshalError::internal("filling a slot with Invalid"));
        }
        self.ensure_vacant(index)?;
        let slot = &mut self.slots[index as usize];
        slot.value = value;
        slot.is_output = false;
        Ok(())
    }

    /// Set a slot's value for the response (callee-side write).
    ///
    /// Unlike [`fill_slot`](Self::fill_slot) this may overwrite: the callee
    /// owns the table between parse and serialize.
    pub fn set_output(&mut self, index: u32, value: ParamValue<'m>) -> Result<()> {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return Err(MarshalError::IndexOutOfRange {
                index,
                max: MAX_PARAMS,
            });
        };
        slot.value = value;
        slot.is_output = true;
        Ok(())
    }

    /// Iterate over all slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter<'m>> {
        self.slots.iter()
    }

    /// Iterate over all slots mutably, in index order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter<'m>> {
        self.slots.iter_mut()
    }

    /// Iterate over populated output slots in index order.
    pub fn outputs(&self) -> impl Iterator<Item = &Parameter<'m>> {
        self.slots
            .iter()
            .filter(|p| p.is_output && !p.value.is_invalid())
    }
}

impl Default for ParameterTable<'_> {
    fn default() -> Self {
        Self::new()
    }
}
