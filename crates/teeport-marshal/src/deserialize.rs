//! Request parsing: wire container → typed parameter table.

use tracing::{debug, error};

use teeport_error::{MarshalError, Result};
use teeport_types::{BlobKind, DecodePolicy, ElemWidth, ParamValue, ParameterTable};
use teeport_wire::{Container, EntryPayload};

use crate::codec::{decode_blob, decode_list};

/// Parse a request container's parameter entries into a fresh table.
///
/// Entries are walked in stream order. Each one is checked before any
/// mutation: the slot index must be in range and the slot must still be
/// unwritten, even across entry kinds, so malformed or adversarial wire data
/// reusing an index is rejected with the first value preserved. Blob and
/// list payloads are decoded borrowed: parsing a request never forces an
/// allocation, and the resulting table is valid as long as the message
/// buffer.
///
/// Slots no entry named remain `Invalid` with their index populated; the
/// kind tag is the only presence indicator.
pub fn read_parameters<'m>(container: &Container<'m>) -> Result<ParameterTable<'m>> {
    let mut table = ParameterTable::new();
    let mut populated = 0usize;

    for entry in container.entries() {
        let entry = entry?;

        let value = match entry.payload {
            EntryPayload::I32(v) => ParamValue::I32(v),
            EntryPayload::I64(v) => ParamValue::I64(v),
            EntryPayload::Id128(v) => ParamValue::Id128(v),
            EntryPayload::Blob { subtype, data } => {
                // Validate the slot before decoding so a rejected entry does
                // no work at all.
                table.ensure_vacant(entry.index)?;
                let Some(kind) = BlobKind::from_code(subtype) else {
                    error!(subtype, index = entry.index, "rejecting blob entry");
                    return Err(MarshalError::UnknownBlobSubtype { subtype });
                };
                ParamValue::ByteBlob(decode_blob(kind, data, DecodePolicy::Borrow)?)
            }
            EntryPayload::List { width, count, data } => {
                table.ensure_vacant(entry.index)?;
                let list = decode_list(width, count, data, DecodePolicy::Borrow)?;
                match width {
                    ElemWidth::Bits32 => ParamValue::I32List(list),
                    ElemWidth::Bits64 => ParamValue::I64List(list),
                }
            }
            // Metadata entries are not parameter slots; the response parser
            // handles them.
            EntryPayload::Context(_)
            | EntryPayload::MethodId(_)
            | EntryPayload::ResultCode(_) => continue,
        };

        table.fill_slot(entry.index, value)?;
        populated += 1;
    }

    debug!(populated, "request parameters decoded");
    Ok(table)
}
