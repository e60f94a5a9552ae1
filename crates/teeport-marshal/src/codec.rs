//! Blob and integer-list codecs with explicit copy-or-borrow ownership.
//!
//! Both codecs share the same duality: [`DecodePolicy::Borrow`] records the
//! source location inside the message buffer (zero-copy, nothing to free),
//! [`DecodePolicy::Copy`] allocates from the supplied allocator and copies.
//! An empty source never allocates in either mode; the empty value is
//! `{None, 0}` by construction.

use teeport_error::{MarshalError, Result};
use teeport_types::limits::MAX_LIST_BYTES;
use teeport_types::{BlobData, BlobKind, ByteBlob, DecodePolicy, ElemWidth, IntList};

fn decode_payload<'m>(src: &'m [u8], policy: DecodePolicy<'_>) -> Result<BlobData<'m>> {
    match policy {
        DecodePolicy::Borrow => Ok(BlobData::Borrowed(src)),
        DecodePolicy::Copy(alloc) => {
            let mut buf = alloc.alloc(src.len())?;
            buf.as_mut_slice().copy_from_slice(src);
            Ok(BlobData::Owned(buf))
        }
    }
}

/// Decode a wire blob payload into a typed [`ByteBlob`].
///
/// `src` empty yields the empty blob `{kind, None, 0}` regardless of policy;
/// an empty blob is never backed by a zero-length allocation.
pub fn decode_blob<'m>(
    kind: BlobKind,
    src: &'m [u8],
    policy: DecodePolicy<'_>,
) -> Result<ByteBlob<'m>> {
    let mut blob = ByteBlob::empty(kind);
    decode_blob_into(&mut blob, src, policy)?;
    Ok(blob)
}

/// Decode a wire blob payload into an existing destination.
///
/// The destination must currently be the empty blob; anything else is a
/// contract violation (the caller is about to leak or double-free whatever
/// was there).
pub fn decode_blob_into<'m>(
    dest: &mut ByteBlob<'m>,
    src: &'m [u8],
    policy: DecodePolicy<'_>,
) -> Result<()> {
    if !dest.is_empty() {
        return Err(MarshalError::internal("blob decode destination not empty"));
    }
    if src.is_empty() {
        return Ok(());
    }
    dest.data = Some(decode_payload(src, policy)?);
    Ok(())
}

/// Decode a wire list payload into a typed [`IntList`].
///
/// `src` must hold exactly `count` little-endian elements of the given
/// width. The byte size is computed with overflow checking before any
/// allocation and capped at [`MAX_LIST_BYTES`]; both failures are rejected
/// closed.
pub fn decode_list<'m>(
    width: ElemWidth,
    count: u32,
    src: &'m [u8],
    policy: DecodePolicy<'_>,
) -> Result<IntList<'m>> {
    let mut list = IntList::empty(width);
    decode_list_into(&mut list, count, src, policy)?;
    Ok(list)
}

/// Decode a wire list payload into an existing destination.
///
/// Same contract as [`decode_blob_into`]: the destination must be the empty
/// list.
pub fn decode_list_into<'m>(
    dest: &mut IntList<'m>,
    count: u32,
    src: &'m [u8],
    policy: DecodePolicy<'_>,
) -> Result<()> {
    if !dest.is_empty() {
        return Err(MarshalError::internal("list decode destination not empty"));
    }

    let width = dest.width;
    let byte_len = (count as usize)
        .checked_mul(width.bytes())
        .ok_or(MarshalError::SizeOverflow {
            count,
            width: width.bytes(),
        })?;
    if byte_len > MAX_LIST_BYTES {
        return Err(MarshalError::ListTooLarge {
            bytes: byte_len,
            max: MAX_LIST_BYTES,
        });
    }
    if byte_len != src.len() {
        return Err(MarshalError::internal(
            "list source length disagrees with count",
        ));
    }
    if count == 0 {
        return Ok(());
    }

    dest.data = Some(decode_payload(src, policy)?);
    dest.count = count;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use teeport_types::{DecodeMode, SecureAllocator, SecureHeap};

    #[test]
    fn blob_borrow_is_zero_copy() {
        let src = [1u8, 2, 3];
        let blob = decode_blob(BlobKind::UserMemory, &src, DecodePolicy::Borrow).unwrap();
        assert_eq!(blob.bytes(), &src);
        assert!(!blob.is_owned());
        assert_eq!(blob.data.as_ref().unwrap().mode(), DecodeMode::Borrowed);
        // The view aliases the source buffer.
        assert!(std::ptr::eq(blob.bytes().as_ptr(), src.as_ptr()));
    }

    #[test]
    fn blob_copy_allocates_and_copies() {
        let heap = SecureHeap::unbounded();
        let src = [9u8; 16];
        let blob = decode_blob(
            BlobKind::SecureHandle,
            &src,
            DecodePolicy::Copy(&heap),
        )
        .unwrap();
        assert!(blob.is_owned());
        assert_eq!(blob.bytes(), &src);
        assert_eq!(heap.in_use(), 16);
        drop(blob);
        assert_eq!(heap.in_use(), 0);
    }

    #[test]
    fn empty_blob_never_allocates() {
        let heap = SecureHeap::with_budget(0);
        for policy in [DecodePolicy::Borrow, DecodePolicy::Copy(&heap)] {
            let blob = decode_blob(BlobKind::UserMemory, &[], policy).unwrap();
            assert!(blob.is_empty());
            assert_eq!(blob.len(), 0);
        }
        assert_eq!(heap.in_use(), 0);
    }

    #[test]
    fn blob_into_requires_empty_destination() {
        let mut blob = decode_blob(BlobKind::UserMemory, &[1], DecodePolicy::Borrow).unwrap();
        let err = decode_blob_into(&mut blob, &[2], DecodePolicy::Borrow).unwrap_err();
        assert!(err.is_contract_violation());
        // First decode untouched.
        assert_eq!(blob.bytes(), &[1]);
    }

    #[test]
    fn blob_copy_propagates_allocation_failure() {
        let heap = SecureHeap::with_budget(4);
        let err = decode_blob(BlobKind::UserMemory, &[0u8; 8], DecodePolicy::Copy(&heap))
            .unwrap_err();
        assert!(matches!(err, MarshalError::OutOfMemory { requested: 8 }));
    }

    #[test]
    fn list_borrow_round_trips_elements() {
        let src: Vec<u8> = [5i64, -6].iter().flat_map(|v| v.to_le_bytes()).collect();
        let list = decode_list(ElemWidth::Bits64, 2, &src, DecodePolicy::Borrow).unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.to_i64_vec(), Some(vec![5, -6]));
        assert!(!list.is_owned());
    }

    #[test]
    fn list_copy_owns_elements() {
        let heap = SecureHeap::unbounded();
        let src: Vec<u8> = [7i32, 8, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
        let list = decode_list(ElemWidth::Bits32, 3, &src, DecodePolicy::Copy(&heap)).unwrap();
        assert!(list.is_owned());
        assert_eq!(list.to_i32_vec(), Some(vec![7, 8, 9]));
        assert_eq!(heap.in_use(), 12);
    }

    #[test]
    fn empty_list_never_allocates() {
        let heap = SecureHeap::with_budget(0);
        for policy in [DecodePolicy::Borrow, DecodePolicy::Copy(&heap)] {
            let list = decode_list(ElemWidth::Bits32, 0, &[], policy).unwrap();
            assert!(list.is_empty());
            assert_eq!(list.count, 0);
        }
    }

    #[test]
    fn list_count_overflow_fails_closed() {
        // On 64-bit targets count * 8 cannot wrap usize, but the byte cap
        // still rejects anything this large long before allocation.
        let err = decode_list(
            ElemWidth::Bits64,
            u32::MAX,
            &[],
            DecodePolicy::Borrow,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MarshalError::SizeOverflow { .. } | MarshalError::ListTooLarge { .. }
        ));
    }

    #[test]
    fn list_source_must_match_count() {
        let err =
            decode_list(ElemWidth::Bits32, 2, &[0u8; 4], DecodePolicy::Borrow).unwrap_err();
        assert!(err.is_contract_violation());
    }
}
