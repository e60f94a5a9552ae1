//! Self-describing binary wire container.
//!
//! One container carries one call's inputs or outputs across the trust
//! boundary. Layout (all fields little-endian):
//!
//! | offset | field        | size | value                                |
//! |--------|--------------|------|--------------------------------------|
//! | 0      | magic        | 4    | `0x5450_4F52`                        |
//! | 4      | version      | 4    | [`CONTAINER_VERSION`]                |
//! | 8      | `total_size` | 4    | full container byte count            |
//!
//! Entries follow back to back, each with a 12-byte header
//! (`kind`, `index`, `payload_len`) and a kind-specific payload:
//!
//! - `I32`/`I64`/`Id128`: the raw value (4/8/16 bytes)
//! - `ByteBlob`: `subtype: u32`, `len: u32`, then `len` payload bytes
//! - `I32List`/`I64List`: `count: u32`, then `count * width` inline bytes
//! - `Context`: flattened context bytes (zero-length = the valid-but-empty
//!   marker)
//! - `MethodId` / `ResultCode`: 4 bytes
//!
//! `total_size` is patched when the container is finalized; the reader
//! rejects any buffer whose length disagrees with it. Unknown entry kinds
//! fail closed: this is a trust boundary, not an extension point.

mod builder;
mod reader;

pub use builder::ContainerBuilder;
pub use reader::{Container, Entry, EntryIter, EntryPayload};

use teeport_types::ParamKind;

/// Container magic (`"ROPT"` as on-disk bytes).
pub const CONTAINER_MAGIC: u32 = 0x5450_4F52;

/// The one container version this build speaks.
pub const CONTAINER_VERSION: u32 = 1;

/// Container header size in bytes.
pub const CONTAINER_HEADER_SIZE: usize = 12;

/// Per-entry header size in bytes.
pub const ENTRY_HEADER_SIZE: usize = 12;

/// Wire kind code for a context entry.
pub const KIND_CONTEXT: u32 = 7;

/// Wire kind code for the method-identifier entry.
pub const KIND_METHOD_ID: u32 = 8;

/// Wire kind code for the result-code entry.
pub const KIND_RESULT_CODE: u32 = 9;

/// Encoded size of an `I32` entry.
pub const I32_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + 4;

/// Encoded size of an `I64` entry.
pub const I64_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + 8;

/// Encoded size of an `Id128` entry.
pub const ID128_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + 16;

/// Encoded size of the method-identifier entry.
pub const METHOD_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + 4;

/// Encoded size of the result-code entry.
pub const RESULT_ENTRY_SIZE: usize = ENTRY_HEADER_SIZE + 4;

/// Encoded size of a blob entry with `payload` data bytes.
#[must_use]
pub const fn blob_entry_size(payload: usize) -> usize {
    ENTRY_HEADER_SIZE + 8 + payload
}

/// Encoded size of a list entry with `byte_len` inline element bytes.
#[must_use]
pub const fn list_entry_size(byte_len: usize) -> usize {
    ENTRY_HEADER_SIZE + 4 + byte_len
}

/// Encoded size of a context entry with `len` flattened bytes.
#[must_use]
pub const fn context_entry_size(len: usize) -> usize {
    ENTRY_HEADER_SIZE + len
}

/// Whether a wire kind code names a parameter entry (as opposed to
/// container metadata).
#[must_use]
pub const fn is_param_kind(code: u32) -> bool {
    match ParamKind::from_code(code) {
        Some(ParamKind::Invalid) | None => false,
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_spells_ropt() {
        assert_eq!(&CONTAINER_MAGIC.to_le_bytes(), b"ROPT");
    }

    #[test]
    fn metadata_kinds_extend_param_kinds() {
        // Parameter kinds occupy 1..=6; metadata must not collide.
        assert!(ParamKind::from_code(KIND_CONTEXT).is_none());
        assert!(ParamKind::from_code(KIND_METHOD_ID).is_none());
        assert!(ParamKind::from_code(KIND_RESULT_CODE).is_none());
    }

    #[test]
    fn param_kind_predicate() {
        assert!(is_param_kind(1));
        assert!(is_param_kind(6));
        assert!(!is_param_kind(0), "Invalid never appears on the wire");
        assert!(!is_param_kind(KIND_CONTEXT));
        assert!(!is_param_kind(42));
    }

    #[test]
    fn entry_size_helpers() {
        assert_eq!(I32_ENTRY_SIZE, 16);
        assert_eq!(I64_ENTRY_SIZE, 20);
        assert_eq!(ID128_ENTRY_SIZE, 28);
        assert_eq!(blob_entry_size(0), 20);
        assert_eq!(blob_entry_size(5), 25);
        assert_eq!(list_entry_size(24), 40);
        assert_eq!(context_entry_size(0), 12);
        assert_eq!(context_entry_size(74), 86);
    }
}
