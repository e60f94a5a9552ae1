//! Core data model for the teeport marshaling layer.
//!
//! The types in this crate describe one call's worth of state on the rich
//! side of the trust boundary: the fixed-capacity [`ParameterTable`] of typed
//! slots, the value payloads they carry ([`ByteBlob`], [`IntList`]), the
//! opaque [`SessionContext`], and the secure-heap plumbing every dynamic
//! allocation is routed through ([`SecureHeap`], [`SecureAllocator`]).
//!
//! Nothing here touches the wire encoding; that lives in `teeport-wire` and
//! `teeport-marshal`.

pub mod context;
pub mod limits;
pub mod param;
pub mod secmem;

pub use context::SessionContext;
pub use param::{
    BlobData, BlobKind, ByteBlob, DecodeMode, DecodePolicy, ElemWidth, IntList, ParamKind,
    ParamValue, Parameter, ParameterTable,
};
pub use secmem::{SecureAllocator, SecureBuf, SecureHeap};

use std::fmt;

use teeport_error::ErrorCode;

/// Identifier of the method being invoked across the boundary.
///
/// Method semantics belong to the TEE; this layer only distinguishes the
/// session-allocation method, whose responses carry the freshly flattened
/// context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct MethodId(u32);

impl MethodId {
    /// The distinguished "allocate session context" method.
    pub const SESSION_ALLOCATE: Self = Self(0x01);

    /// Construct from a raw wire value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the session-allocation method.
    #[inline]
    #[must_use]
    pub const fn is_session_allocate(self) -> bool {
        self.0 == Self::SESSION_ALLOCATE.0
    }
}

/// Result code of the call itself, as reported by the callee.
///
/// Carried opaquely by the marshaling layer; `0` is success, everything else
/// is a callee-defined failure (conventionally an [`ErrorCode`] value).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct CallStatus(u32);

impl CallStatus {
    /// The call succeeded.
    pub const SUCCESS: Self = Self(0);

    /// Construct from a raw wire value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether the call succeeded.
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Status reporting a marshaling-layer error code.
    #[inline]
    #[must_use]
    pub const fn from_error_code(code: ErrorCode) -> Self {
        Self(code as u32)
    }
}

/// Opaque 128-bit identifier (key ids, session ids).
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct Id128([u8; 16]);

impl Id128 {
    /// Construct from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for Id128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id128(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}
