//! Container reader: validated, zero-copy iteration over typed entries.
//!
//! The reader treats its input as attacker-influenceable. Every entry header
//! is bounds-checked against the container, every payload length is checked
//! against its kind's internal length fields, and unknown kinds fail closed.
//! Payload views borrow straight from the message buffer; nothing here
//! allocates.

use tracing::error;

use teeport_error::{MarshalError, Result};
use teeport_types::{CallStatus, ElemWidth, Id128, MethodId};

use crate::{
    CONTAINER_HEADER_SIZE, CONTAINER_MAGIC, CONTAINER_VERSION, ENTRY_HEADER_SIZE, KIND_CONTEXT,
    KIND_METHOD_ID, KIND_RESULT_CODE,
};

/// A parsed container, ready for entry iteration.
#[derive(Debug)]
pub struct Container<'m> {
    entries: &'m [u8],
}

impl<'m> Container<'m> {
    /// Validate the container header against the buffer it arrived in.
    pub fn parse(bytes: &'m [u8]) -> Result<Self> {
        if bytes.len() < CONTAINER_HEADER_SIZE {
            error!(len = bytes.len(), "container smaller than its header");
            return Err(MarshalError::corrupt(0, "container smaller than header"));
        }
        let magic = read_u32(bytes, 0);
        if magic != CONTAINER_MAGIC {
            error!(magic, "bad container magic");
            return Err(MarshalError::corrupt(0, "bad magic"));
        }
        let version = read_u32(bytes, 4);
        if version != CONTAINER_VERSION {
            error!(version, "unsupported container version");
            return Err(MarshalError::UnsupportedVersion { version });
        }
        let total_size = read_u32(bytes, 8) as usize;
        if total_size != bytes.len() {
            error!(
                total_size,
                actual = bytes.len(),
                "container size field disagrees with buffer"
            );
            return Err(MarshalError::corrupt(
                8,
                format!(
                    "total_size {total_size} disagrees with buffer length {}",
                    bytes.len()
                ),
            ));
        }
        Ok(Self {
            entries: &bytes[CONTAINER_HEADER_SIZE..],
        })
    }

    /// Iterate the container's entries in stream order.
    #[must_use]
    pub fn entries(&self) -> EntryIter<'m> {
        EntryIter {
            rest: self.entries,
            offset: CONTAINER_HEADER_SIZE,
            failed: false,
        }
    }
}

/// One decoded entry: target slot index plus typed payload view.
#[derive(Debug)]
pub struct Entry<'m> {
    /// Target parameter slot for parameter entries; zero for metadata.
    pub index: u32,
    /// The typed payload.
    pub payload: EntryPayload<'m>,
}

/// Typed view of an entry payload, borrowed from the message buffer.
#[derive(Debug)]
pub enum EntryPayload<'m> {
    I32(i32),
    I64(i64),
    Id128(Id128),
    /// Blob subtype tag (not yet validated against the closed set) and
    /// payload bytes.
    Blob { subtype: u32, data: &'m [u8] },
    /// Raw little-endian list elements; `data.len() == count * width`.
    List {
        width: ElemWidth,
        count: u32,
        data: &'m [u8],
    },
    /// Flattened context bytes; empty is the valid-but-empty marker.
    Context(&'m [u8]),
    MethodId(MethodId),
    ResultCode(CallStatus),
}

/// Iterator over container entries; fuses after the first structural error.
pub struct EntryIter<'m> {
    rest: &'m [u8],
    offset: usize,
    failed: bool,
}

impl<'m> EntryIter<'m> {
    fn fail(&mut self, offset: usize, detail: String) -> Option<Result<Entry<'m>>> {
        self.failed = true;
        error!(offset, detail = %detail, "rejecting wire entry");
        Some(Err(MarshalError::ContainerCorrupt { offset, detail }))
    }
}

impl<'m> Iterator for EntryIter<'m> {
    type Item = Result<Entry<'m>>;

    #[allow(clippy::too_many_lines)]
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < ENTRY_HEADER_SIZE {
            return self.fail(self.offset, "truncated entry header".to_owned());
        }

        let kind = read_u32(self.rest, 0);
        let index = read_u32(self.rest, 4);
        let payload_len = read_u32(self.rest, 8) as usize;

        let body = &self.rest[ENTRY_HEADER_SIZE..];
        if payload_len > body.len() {
            return self.fail(
                self.offset,
                format!("entry payload of {payload_len} bytes overruns container"),
            );
        }
        let payload = &body[..payload_len];

        let decoded = match kind {
            1 => {
                if payload.len() != 4 {
                    return self.fail(self.offset, "i32 entry payload must be 4 bytes".to_owned());
                }
                EntryPayload::I32(i32::from_le_bytes(payload.try_into().expect("4 bytes")))
            }
            2 => {
                if payload.len() != 8 {
                    return self.fail(self.offset, "i64 entry payload must be 8 bytes".to_owned());
                }
                EntryPayload::I64(i64::from_le_bytes(payload.try_into().expect("8 bytes")))
            }
            3 => {
                if payload.len() != 16 {
                    return self.fail(
                        self.offset,
                        "id128 entry payload must be 16 bytes".to_owned(),
                    );
                }
                EntryPayload::Id128(Id128::from_bytes(payload.try_into().expect("16 bytes")))
            }
            4 => {
                if payload.len() < 8 {
                    return self.fail(self.offset, "blob entry shorter than its fields".to_owned());
                }
                let subtype = read_u32(payload, 0);
                let blob_len = read_u32(payload, 4) as usize;
                if payload.len() - 8 != blob_len {
                    return self.fail(
                        self.offset,
                        format!(
                            "blob length field {blob_len} disagrees with payload {}",
                            payload.len() - 8
                        ),
                    );
                }
                EntryPayload::Blob {
                    subtype,
                    data: &payload[8..],
                }
            }
            5 | 6 => {
                if payload.len() < 4 {
                    return self.fail(self.offset, "list entry shorter than its count".to_owned());
                }
                let width = if kind == 5 {
                    ElemWidth::Bits32
                } else {
                    ElemWidth::Bits64
                };
                let count = read_u32(payload, 0);
                // Widen before multiplying so a hostile count cannot wrap.
                let byte_len = u64::from(count) * width.bytes() as u64;
                if byte_len != (payload.len() - 4) as u64 {
                    return self.fail(
                        self.offset,
                        format!(
                            "list count {count} needs {byte_len} bytes, payload has {}",
                            payload.len() - 4
                        ),
                    );
                }
                EntryPayload::List {
                    width,
                    count,
                    data: &payload[4..],
                }
            }
            KIND_CONTEXT => EntryPayload::Context(payload),
            KIND_METHOD_ID => {
                if payload.len() != 4 {
                    return self.fail(
                        self.offset,
                        "method entry payload must be 4 bytes".to_owned(),
                    );
                }
                EntryPayload::MethodId(MethodId::new(read_u32(payload, 0)))
            }
            KIND_RESULT_CODE => {
                if payload.len() != 4 {
                    return self.fail(
                        self.offset,
                        "result entry payload must be 4 bytes".to_owned(),
                    );
                }
                EntryPayload::ResultCode(CallStatus::new(read_u32(payload, 0)))
            }
            other => {
                return self.fail(self.offset, format!("unknown entry kind {other}"));
            }
        };

        let consumed = ENTRY_HEADER_SIZE + payload_len;
        self.rest = &self.rest[consumed..];
        self.offset += consumed;
        Some(Ok(Entry {
            index,
            payload: decoded,
        }))
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(
        bytes[offset..offset + 4]
            .try_into()
            .expect("caller checked bounds"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContainerBuilder;

    fn build_sample() -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        let mut b = ContainerBuilder::begin(&mut buf).unwrap();
        b.add_i32(0, 42).unwrap();
        b.add_i64(1, -9).unwrap();
        b.add_id128(2, &Id128::from_bytes([7u8; 16])).unwrap();
        b.add_blob(3, 1, &[0xCA, 0xFE]).unwrap();
        let elems: Vec<u8> = [10i32, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();
        b.add_list(4, ElemWidth::Bits32, 3, &elems).unwrap();
        b.add_context(&[]).unwrap();
        b.add_method(MethodId::SESSION_ALLOCATE).unwrap();
        b.add_result(CallStatus::SUCCESS).unwrap();
        let len = b.finalize().unwrap();
        buf.truncate(len);
        buf
    }

    #[test]
    fn round_trip_every_entry_kind() {
        let bytes = build_sample();
        let container = Container::parse(&bytes).unwrap();
        let entries: Vec<Entry<'_>> = container.entries().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 8);

        assert!(matches!(entries[0].payload, EntryPayload::I32(42)));
        assert_eq!(entries[0].index, 0);
        assert!(matches!(entries[1].payload, EntryPayload::I64(-9)));
        assert!(
            matches!(entries[2].payload, EntryPayload::Id128(id) if id == Id128::from_bytes([7u8; 16]))
        );
        assert!(matches!(
            entries[3].payload,
            EntryPayload::Blob {
                subtype: 1,
                data: &[0xCA, 0xFE]
            }
        ));
        match &entries[4].payload {
            EntryPayload::List { width, count, data } => {
                assert_eq!(*width, ElemWidth::Bits32);
                assert_eq!(*count, 3);
                assert_eq!(data.len(), 12);
            }
            other => panic!("expected list, got {other:?}"),
        }
        assert!(matches!(entries[5].payload, EntryPayload::Context(&[])));
        assert!(
            matches!(entries[6].payload, EntryPayload::MethodId(m) if m.is_session_allocate())
        );
        assert!(
            matches!(entries[7].payload, EntryPayload::ResultCode(s) if s.is_success())
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_sample();
        bytes[0] ^= 0xFF;
        let err = Container::parse(&bytes).unwrap_err();
        assert!(matches!(err, MarshalError::ContainerCorrupt { offset: 0, .. }));
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = build_sample();
        bytes[4] = 9;
        let err = Container::parse(&bytes).unwrap_err();
        assert!(matches!(err, MarshalError::UnsupportedVersion { version: 9 }));
    }

    #[test]
    fn rejects_total_size_mismatch() {
        let mut bytes = build_sample();
        bytes.push(0);
        let err = Container::parse(&bytes).unwrap_err();
        assert!(matches!(err, MarshalError::ContainerCorrupt { offset: 8, .. }));
    }

    #[test]
    fn rejects_truncated_entry() {
        let bytes = build_sample();
        // Chop mid-entry and fix up total_size so the header parses.
        let cut = bytes.len() - 3;
        let mut bytes = bytes[..cut].to_vec();
        let total = u32::try_from(bytes.len()).unwrap();
        bytes[8..12].copy_from_slice(&total.to_le_bytes());
        let container = Container::parse(&bytes).unwrap();
        let last = container.entries().last().unwrap();
        assert!(last.is_err());
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut bytes = build_sample();
        // First entry header starts right after the container header.
        bytes[CONTAINER_HEADER_SIZE] = 0xEE;
        let container = Container::parse(&bytes).unwrap();
        let first = container.entries().next().unwrap();
        let err = first.unwrap_err();
        assert!(matches!(
            err,
            MarshalError::ContainerCorrupt { offset, .. } if offset == CONTAINER_HEADER_SIZE
        ));
    }

    #[test]
    fn rejects_blob_length_field_mismatch() {
        let mut buf = vec![0u8; 128];
        let mut b = ContainerBuilder::begin(&mut buf).unwrap();
        b.add_blob(0, 0, &[1, 2, 3, 4]).unwrap();
        let len = b.finalize().unwrap();
        buf.truncate(len);
        // Corrupt the blob's internal length field (entry payload offset 4).
        let field = CONTAINER_HEADER_SIZE + ENTRY_HEADER_SIZE + 4;
        buf[field] = 200;
        let container = Container::parse(&buf).unwrap();
        assert!(container.entries().next().unwrap().is_err());
    }

    #[test]
    fn rejects_list_count_mismatch() {
        let mut buf = vec![0u8; 128];
        let mut b = ContainerBuilder::begin(&mut buf).unwrap();
        let elems: Vec<u8> = [1i64, 2].iter().flat_map(|v| v.to_le_bytes()).collect();
        b.add_list(0, ElemWidth::Bits64, 2, &elems).unwrap();
        let len = b.finalize().unwrap();
        buf.truncate(len);
        let field = CONTAINER_HEADER_SIZE + ENTRY_HEADER_SIZE;
        buf[field] = 3; // count now disagrees with the 16 payload bytes
        let container = Container::parse(&buf).unwrap();
        assert!(container.entries().next().unwrap().is_err());
    }

    #[test]
    fn iterator_fuses_after_error() {
        let mut bytes = build_sample();
        bytes[CONTAINER_HEADER_SIZE] = 0xEE;
        let container = Container::parse(&bytes).unwrap();
        let results: Vec<_> = container.entries().collect();
        assert_eq!(results.len(), 1, "no entries yielded past the failure");
        assert!(results[0].is_err());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(512))]

            /// Arbitrary single-byte corruption never panics the reader; it
            /// either still parses or is rejected cleanly.
            #[test]
            fn mutated_container_never_panics(pos in 0usize..200, byte in any::<u8>()) {
                let mut bytes = build_sample();
                let pos = pos % bytes.len();
                bytes[pos] = byte;
                if let Ok(container) = Container::parse(&bytes) {
                    for entry in container.entries() {
                        let _ = entry;
                    }
                }
            }

            /// Arbitrary prefixes (with a patched total_size) never panic.
            #[test]
            fn truncated_container_never_panics(cut in 0usize..200) {
                let bytes = build_sample();
                let cut = cut % (bytes.len() + 1);
                let mut bytes = bytes[..cut].to_vec();
                if bytes.len() >= CONTAINER_HEADER_SIZE {
                    let total = u32::try_from(bytes.len()).unwrap();
                    bytes[8..12].copy_from_slice(&total.to_le_bytes());
                }
                if let Ok(container) = Container::parse(&bytes) {
                    for entry in container.entries() {
                        let _ = entry;
                    }
                }
            }
        }
    }
}
