//! Parameter and context marshaling across the TEE trust boundary.
//!
//! This crate is the seam between the rich execution environment and the
//! secure one: it parses incoming wire containers into a typed
//! [`ParameterTable`](teeport_types::ParameterTable)
//! ([`read_parameters`]), builds outgoing response containers from the
//! callee's outputs ([`generate_output`]), flattens and restores the opaque
//! session context ([`flatten_context`] / [`restore_context`]), and releases
//! surviving owned resources afterwards ([`free_parameters`]).
//!
//! All operations are synchronous and call-scoped. Incoming bytes are
//! treated as attacker-influenceable: validation failures abort at the first
//! fault and every partial state is unwound (a failed context restore leaves
//! its destination fully zeroed). Every dynamic allocation routes through a
//! caller-supplied [`SecureAllocator`](teeport_types::SecureAllocator) and is
//! released on exactly one path.

mod cleanup;
mod codec;
mod context;
mod deserialize;
mod serialize;
mod traits;

pub use cleanup::free_parameters;
pub use codec::{decode_blob, decode_blob_into, decode_list, decode_list_into};
pub use context::{flatten_context, restore_context};
pub use deserialize::read_parameters;
pub use serialize::{generate_output, parse_response, Response, ResponseView};
pub use traits::{BlobOwner, HeapBlobOwner, MemorySessionCache, SessionCache};
