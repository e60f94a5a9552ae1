//! Error taxonomy for the teeport marshaling layer.
//!
//! Everything that can go wrong while moving a call across the trust
//! boundary falls into one of four families, each with a fixed on-wire
//! result code:
//!
//! - **argument faults**: the wire bytes (or a caller-supplied index) failed
//!   validation. These are expected in the face of malformed or adversarial
//!   input and map to [`ErrorCode::BadParameters`] / [`ErrorCode::BadFormat`].
//! - **allocation faults**: the secure heap could not satisfy a request.
//! - **encode faults**: an outgoing container or scratch pool ran out of
//!   room, or a size computation overflowed.
//! - **contract violations**: a precondition inside this layer was broken by
//!   the caller. Asserted in debug builds, surfaced as [`ErrorCode::BadState`]
//!   in release.

use thiserror::Error;

/// Primary error type for teeport marshaling operations.
///
/// Structured variants for every rejection path, so callers and logs can see
/// exactly what was refused without parsing message strings.
#[derive(Error, Debug)]
pub enum MarshalError {
    // === Argument faults (untrusted input rejected) ===
    /// Parameter slot index is outside the table.
    #[error("parameter index {index} out of range (table holds {max} slots)")]
    IndexOutOfRange { index: u32, max: usize },

    /// A second wire entry targeted an already-populated slot.
    #[error("duplicate write to parameter slot {index}")]
    DuplicateSlot { index: u32 },

    /// A serialized context header carried a non-null trailer pointer.
    #[error("context trailer pointer is non-null in serialized header")]
    ContextPointerNotNull,

    /// A serialized context is smaller than the fixed header region.
    #[error("context encoding too small: {size} bytes, header needs {min}")]
    ContextTooSmall { size: usize, min: usize },

    /// A serialized context's size disagrees with its declared trailer length.
    #[error("context encoding size mismatch: expected {expected} bytes, got {actual}")]
    ContextSizeMismatch { expected: usize, actual: usize },

    /// Declared context trailer length exceeds the supported maximum.
    #[error("context trailer too large: {len} bytes (max {max})")]
    TrailerTooLarge { len: usize, max: usize },

    /// Inline list payload exceeds the per-list byte cap.
    #[error("list payload too large: {bytes} bytes (max {max})")]
    ListTooLarge { bytes: usize, max: usize },

    /// Blob entry carries a subtype outside the closed set.
    #[error("unknown blob subtype {subtype}")]
    UnknownBlobSubtype { subtype: u32 },

    /// Wire container failed structural validation.
    #[error("malformed wire container at byte {offset}: {detail}")]
    ContainerCorrupt { offset: usize, detail: String },

    /// Wire container carries a version this build does not speak.
    #[error("unsupported container version {version}")]
    UnsupportedVersion { version: u32 },

    // === Allocation faults ===
    /// The secure heap refused an allocation.
    #[error("secure heap exhausted: {requested} bytes requested")]
    OutOfMemory { requested: usize },

    // === Encode faults ===
    /// A per-kind scratch pool reached its hard capacity.
    #[error("scratch pool for {kind} entries is full (max {max})")]
    ScratchFull { kind: &'static str, max: usize },

    /// `count * element_width` overflowed the platform size type.
    #[error("list byte size overflows: {count} elements of {width} bytes")]
    SizeOverflow { count: u32, width: usize },

    /// The response buffer cannot hold the next entry.
    #[error("response buffer full: need {needed} bytes, {remaining} remain")]
    ResponseFull { needed: usize, remaining: usize },

    // === Contract violations ===
    /// A programming-contract violation inside this layer.
    #[error("internal error: {0}")]
    Internal(String),
}

/// On-wire result codes, shared with the far side of the boundary.
///
/// Values follow the GlobalPlatform TEE Client API convention so responses
/// are meaningful to existing tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Unspecified failure.
    Generic = 0xFFFF_0000,
    /// Input bytes are structurally malformed.
    BadFormat = 0xFFFF_0005,
    /// Input values failed validation.
    BadParameters = 0xFFFF_0006,
    /// The layer was used outside its contract.
    BadState = 0xFFFF_0007,
    /// Allocation failure.
    OutOfMemory = 0xFFFF_000C,
    /// An output buffer or pool was too small.
    ShortBuffer = 0xFFFF_0010,
}

impl MarshalError {
    /// Map this error to its on-wire result code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::IndexOutOfRange { .. }
            | Self::DuplicateSlot { .. }
            | Self::ContextPointerNotNull
            | Self::ContextTooSmall { .. }
            | Self::ContextSizeMismatch { .. }
            | Self::TrailerTooLarge { .. }
            | Self::ListTooLarge { .. }
            | Self::UnknownBlobSubtype { .. } => ErrorCode::BadParameters,
            Self::ContainerCorrupt { .. } | Self::UnsupportedVersion { .. } => ErrorCode::BadFormat,
            Self::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            Self::ScratchFull { .. } | Self::SizeOverflow { .. } | Self::ResponseFull { .. } => {
                ErrorCode::ShortBuffer
            }
            Self::Internal(_) => ErrorCode::BadState,
        }
    }

    /// Whether this rejection was caused by untrusted wire bytes.
    ///
    /// Wire faults are routine at a trust boundary and are logged rather
    /// than escalated.
    #[must_use]
    pub const fn is_wire_fault(&self) -> bool {
        matches!(
            self.error_code(),
            ErrorCode::BadParameters | ErrorCode::BadFormat
        )
    }

    /// Whether this error indicates a broken contract inside the host
    /// process rather than bad input.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self.error_code(), ErrorCode::BadState)
    }

    /// Create a container-corruption error.
    pub fn corrupt(offset: usize, detail: impl Into<String>) -> Self {
        Self::ContainerCorrupt {
            offset,
            detail: detail.into(),
        }
    }

    /// Create an internal (contract violation) error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `MarshalError`.
pub type Result<T> = std::result::Result<T, MarshalError>;
