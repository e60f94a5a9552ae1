//! Parameter cleanup: release surviving output resources after a response.
//!
//! Once the response container holds its own copies of every output value,
//! the table's owned payloads have no further use. Owned blobs route through
//! the [`BlobOwner`] collaborator, owned lists return their bytes to the pool
//! by drop. Borrowed payloads point into the caller-owned message buffer and
//! are dropped without freeing anything.

use tracing::debug;

use teeport_types::{BlobKind, ParamValue, ParameterTable};

use crate::traits::BlobOwner;

/// Release every output slot still holding an owned blob or list, then reset
/// the table to all-`Invalid`.
///
/// A blob still tagged [`BlobKind::SecureHandleDecrypt`] is re-tagged
/// [`BlobKind::UserMemory`] before the owner sees it: under the original tag
/// the free would also release the underlying secure handle, which must
/// outlive the serialized response and is freed later by a separate call.
///
/// Borrowed payloads and input slots release no storage. Calling this on an
/// already-clean table is a no-op.
pub fn free_parameters(table: &mut ParameterTable<'_>, owner: &dyn BlobOwner) {
    let mut freed_blobs = 0usize;
    let mut freed_lists = 0usize;

    for slot in table.iter_mut() {
        let value = std::mem::replace(&mut slot.value, ParamValue::Invalid);
        slot.is_output = false;

        match value {
            ParamValue::ByteBlob(mut blob) if blob.is_owned() => {
                if blob.kind == BlobKind::SecureHandleDecrypt {
                    blob.kind = BlobKind::UserMemory;
                }
                owner.free_blob(&mut blob);
                freed_blobs += 1;
            }
            ParamValue::I32List(list) | ParamValue::I64List(list) if list.is_owned() => {
                // Dropping the owned buffer returns its bytes to the pool.
                drop(list);
                freed_lists += 1;
            }
            // Scalars, borrowed payloads, untouched inputs: nothing to free.
            _ => {}
        }
    }

    debug!(freed_blobs, freed_lists, "parameter table released");
}
