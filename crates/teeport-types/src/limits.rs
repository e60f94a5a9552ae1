//! Hard capacity bounds and process-wide constants.
//!
//! The per-kind maxima reproduce the legacy protocol's fixed scratch-array
//! sizes; they are validated bounds, not hints. Wire peers built against the
//! original layout reject anything larger, so these must not grow without a
//! container version bump.

/// Number of slots in a [`ParameterTable`](crate::ParameterTable).
pub const MAX_PARAMS: usize = 8;

/// Maximum `I32` output entries per response.
pub const MAX_I32_PARAMS: usize = 8;

/// Maximum `I64` output entries per response.
pub const MAX_I64_PARAMS: usize = 8;

/// Maximum `Id128` output entries per response.
pub const MAX_ID128_PARAMS: usize = 4;

/// Maximum `ByteBlob` output entries per response.
pub const MAX_BLOB_PARAMS: usize = 4;

/// Maximum list output entries per response (32- and 64-bit counted
/// together).
pub const MAX_LIST_PARAMS: usize = 4;

/// Size of the fixed session-context header region, in bytes.
pub const CONTEXT_HEADER_SIZE: usize = 64;

/// Byte offset of the trailer-length field (`u32` LE) inside the header.
pub const CONTEXT_TRAILER_LEN_OFFSET: usize = 48;

/// Byte offset of the trailer-pointer field (`u64` LE) inside the header.
///
/// Live contexts may hold any value here; a serialized header must read as
/// null at this offset.
pub const CONTEXT_TRAILER_PTR_OFFSET: usize = 56;

/// Maximum context trailer length accepted on decode.
pub const MAX_CONTEXT_TRAILER: usize = 4096;

/// Maximum inline list payload accepted on decode, in bytes.
pub const MAX_LIST_BYTES: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Derivation salts
// ---------------------------------------------------------------------------

/// Salt mixed into per-session key derivation by the TEE-side collaborators.
pub static SESSION_KEY_SALT: [u8; 16] = [
    0x7c, 0x2a, 0x91, 0x0e, 0x5b, 0xd4, 0x38, 0xa7, 0x63, 0xf0, 0x1d, 0x8e, 0x49, 0xb2, 0xc5, 0x16,
];

/// Salt mixed into context-wrapping key derivation.
pub static CONTEXT_WRAP_SALT: [u8; 16] = [
    0x3f, 0x84, 0x6d, 0xe1, 0x0a, 0x57, 0xb9, 0x22, 0xcd, 0x70, 0x98, 0x4b, 0xe6, 0x13, 0xaf, 0x58,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_field_offsets_inside_header() {
        assert!(CONTEXT_TRAILER_LEN_OFFSET + 4 <= CONTEXT_HEADER_SIZE);
        assert!(CONTEXT_TRAILER_PTR_OFFSET + 8 <= CONTEXT_HEADER_SIZE);
        // Length and pointer fields must not overlap.
        assert!(CONTEXT_TRAILER_LEN_OFFSET + 4 <= CONTEXT_TRAILER_PTR_OFFSET);
    }

    #[test]
    fn salts_are_distinct() {
        assert_ne!(SESSION_KEY_SALT, CONTEXT_WRAP_SALT);
    }
}
