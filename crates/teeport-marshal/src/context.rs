//! Flatten and restore the opaque session context.
//!
//! The serialized form is the 64-byte header followed immediately by the
//! trailer bytes, with the trailer-pointer field nulled in the copy. Restore
//! is the adversarial direction: the buffer may be forged, so every field is
//! validated and any failure zeroes the destination before returning, so a
//! caller never observes a partially restored context.

use tracing::{debug, error};

use teeport_error::{MarshalError, Result};
use teeport_types::context::{read_trailer_len, read_trailer_ptr, write_trailer_ptr};
use teeport_types::limits::{CONTEXT_HEADER_SIZE, MAX_CONTEXT_TRAILER};
use teeport_types::{SecureAllocator, SecureBuf, SessionContext};

/// Flatten a live context into one transferable buffer.
///
/// The output is exactly header + trailer, byte-identical across repeated
/// calls on the same context. Only the output copy has its trailer-pointer
/// field nulled; the live context is not modified. Ownership of the buffer
/// transfers to the caller.
pub fn flatten_context(ctx: &SessionContext, alloc: &dyn SecureAllocator) -> Result<SecureBuf> {
    let trailer_len = ctx.trailer_len();
    if ctx.declared_trailer_len() as usize != trailer_len {
        return Err(MarshalError::internal(
            "context declared trailer length out of sync with attached trailer",
        ));
    }
    if trailer_len > MAX_CONTEXT_TRAILER {
        return Err(MarshalError::TrailerTooLarge {
            len: trailer_len,
            max: MAX_CONTEXT_TRAILER,
        });
    }

    let mut out = alloc.alloc(CONTEXT_HEADER_SIZE + trailer_len)?;
    out[..CONTEXT_HEADER_SIZE].copy_from_slice(ctx.header());
    if let Some(trailer) = ctx.trailer() {
        out[CONTEXT_HEADER_SIZE..].copy_from_slice(trailer);
    }
    // The live pointer value must never leave the process.
    write_trailer_ptr(&mut out[..CONTEXT_HEADER_SIZE], 0);

    debug!(trailer_len, "context flattened");
    Ok(out)
}

/// Restore a serialized context in place on a caller-owned destination.
///
/// On any validation failure the destination is fully zeroed (header
/// cleared, any previous trailer dropped) before the error returns.
pub fn restore_context(
    bytes: &[u8],
    dest: &mut SessionContext,
    alloc: &dyn SecureAllocator,
) -> Result<()> {
    match restore_inner(bytes, dest, alloc) {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(size = bytes.len(), %err, "context restore rejected");
            dest.zeroize();
            Err(err)
        }
    }
}

fn restore_inner(
    bytes: &[u8],
    dest: &mut SessionContext,
    alloc: &dyn SecureAllocator,
) -> Result<()> {
    if bytes.len() < CONTEXT_HEADER_SIZE {
        return Err(MarshalError::ContextTooSmall {
            size: bytes.len(),
            min: CONTEXT_HEADER_SIZE,
        });
    }
    dest.header_mut()
        .copy_from_slice(&bytes[..CONTEXT_HEADER_SIZE]);

    // A well-formed encoding always reads as null here; anything else is a
    // forged or corrupt buffer trying to smuggle a live pointer across.
    if read_trailer_ptr(dest.header()) != 0 {
        return Err(MarshalError::ContextPointerNotNull);
    }

    let declared = read_trailer_len(dest.header()) as usize;
    if declared == 0 {
        if bytes.len() != CONTEXT_HEADER_SIZE {
            return Err(MarshalError::ContextSizeMismatch {
                expected: CONTEXT_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        dest.clear_trailer();
        debug!("context restored without trailer");
        return Ok(());
    }

    if declared > MAX_CONTEXT_TRAILER {
        return Err(MarshalError::TrailerTooLarge {
            len: declared,
            max: MAX_CONTEXT_TRAILER,
        });
    }
    let expected = CONTEXT_HEADER_SIZE + declared;
    if bytes.len() != expected {
        return Err(MarshalError::ContextSizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let mut trailer = alloc.alloc(declared)?;
    trailer
        .as_mut_slice()
        .copy_from_slice(&bytes[CONTEXT_HEADER_SIZE..]);
    dest.attach_trailer(trailer);

    debug!(trailer_len = declared, "context restored");
    Ok(())
}
