//! Response generation: parameter table + call result → wire container.
//!
//! Output values are first staged into a call-scoped scratch arena of
//! per-kind pools with hard capacities (the legacy protocol's fixed scratch
//! arrays), then emitted category by category into a builder session
//! targeting the response buffer. The buffer itself comes from the secure
//! allocator, sized exactly by a pre-pass over the staged entries. Cleanup
//! is single-path by construction: the arena, any flattened context, and on
//! failure the response buffer are all released by drop on every exit.

use tracing::debug;

use teeport_error::{MarshalError, Result};
use teeport_types::limits::{
    MAX_BLOB_PARAMS, MAX_I32_PARAMS, MAX_I64_PARAMS, MAX_ID128_PARAMS, MAX_LIST_PARAMS,
};
use teeport_types::{
    BlobKind, CallStatus, DecodePolicy, ElemWidth, Id128, MethodId, ParamValue, Parameter,
    ParameterTable, SecureAllocator, SecureBuf, SessionContext,
};
use teeport_wire::{
    blob_entry_size, context_entry_size, list_entry_size, Container, ContainerBuilder,
    EntryPayload, CONTAINER_HEADER_SIZE, I32_ENTRY_SIZE, I64_ENTRY_SIZE, ID128_ENTRY_SIZE,
    METHOD_ENTRY_SIZE, RESULT_ENTRY_SIZE,
};

use crate::codec::{decode_blob, decode_list};
use crate::context::flatten_context;
use crate::traits::SessionCache;

// ---------------------------------------------------------------------------
// Scratch arena
// ---------------------------------------------------------------------------

/// Call-scoped staging pools, one per parameter kind, with the legacy hard
/// capacities.
struct ScratchArena<'t> {
    i32s: Vec<(u32, i32)>,
    i64s: Vec<(u32, i64)>,
    ids: Vec<(u32, Id128)>,
    /// (slot index, subtype code, payload bytes)
    blobs: Vec<(u32, u32, &'t [u8])>,
    /// (slot index, width, count, raw little-endian bytes)
    lists: Vec<(u32, ElemWidth, u32, &'t [u8])>,
}

impl<'t> ScratchArena<'t> {
    fn new() -> Self {
        Self {
            i32s: Vec::with_capacity(MAX_I32_PARAMS),
            i64s: Vec::with_capacity(MAX_I64_PARAMS),
            ids: Vec::with_capacity(MAX_ID128_PARAMS),
            blobs: Vec::with_capacity(MAX_BLOB_PARAMS),
            lists: Vec::with_capacity(MAX_LIST_PARAMS),
        }
    }

    /// Stage one output slot into its kind's pool.
    fn stage(&mut self, param: &'t Parameter<'_>) -> Result<()> {
        match &param.value {
            ParamValue::I32(v) => {
                Self::bounded_push(&mut self.i32s, (param.index, *v), "i32", MAX_I32_PARAMS)
            }
            ParamValue::I64(v) => {
                Self::bounded_push(&mut self.i64s, (param.index, *v), "i64", MAX_I64_PARAMS)
            }
            ParamValue::Id128(v) => {
                Self::bounded_push(&mut self.ids, (param.index, *v), "id128", MAX_ID128_PARAMS)
            }
            ParamValue::ByteBlob(blob) => Self::bounded_push(
                &mut self.blobs,
                (param.index, blob.kind.code(), blob.bytes()),
                "blob",
                MAX_BLOB_PARAMS,
            ),
            ParamValue::I32List(list) => Self::bounded_push(
                &mut self.lists,
                (param.index, ElemWidth::Bits32, list.count, list.bytes()),
                "list",
                MAX_LIST_PARAMS,
            ),
            ParamValue::I64List(list) => Self::bounded_push(
                &mut self.lists,
                (param.index, ElemWidth::Bits64, list.count, list.bytes()),
                "list",
                MAX_LIST_PARAMS,
            ),
            ParamValue::Invalid => Err(MarshalError::internal("staging an Invalid output slot")),
        }
    }

    fn bounded_push<T>(pool: &mut Vec<T>, item: T, kind: &'static str, max: usize) -> Result<()> {
        if pool.len() == max {
            return Err(MarshalError::ScratchFull { kind, max });
        }
        pool.push(item);
        Ok(())
    }

    /// Exact encoded size of all staged parameter entries.
    fn encoded_size(&self) -> usize {
        self.i32s.len() * I32_ENTRY_SIZE
            + self.i64s.len() * I64_ENTRY_SIZE
            + self.ids.len() * ID128_ENTRY_SIZE
            + self
                .blobs
                .iter()
                .map(|(_, _, data)| blob_entry_size(data.len()))
                .sum::<usize>()
            + self
                .lists
                .iter()
                .map(|(_, _, _, data)| list_entry_size(data.len()))
                .sum::<usize>()
    }

    /// Emit the staged entries, one category list at a time.
    fn emit(&self, builder: &mut ContainerBuilder<'_>) -> Result<()> {
        for &(index, value) in &self.i32s {
            builder.add_i32(index, value)?;
        }
        for &(index, value) in &self.i64s {
            builder.add_i64(index, value)?;
        }
        for (index, value) in &self.ids {
            builder.add_id128(*index, value)?;
        }
        for &(index, subtype, data) in &self.blobs {
            builder.add_blob(index, subtype, data)?;
        }
        for &(index, width, count, data) in &self.lists {
            builder.add_list(index, width, count, data)?;
        }
        Ok(())
    }

    fn staged(&self) -> usize {
        self.i32s.len() + self.i64s.len() + self.ids.len() + self.blobs.len() + self.lists.len()
    }
}

/// What the response's context entry will be.
enum ContextEmit {
    /// No context entry at all (non-allocation method, no context attached).
    Skip,
    /// The zero-length valid-but-empty marker.
    Empty,
    /// A flattened live context.
    Flat(SecureBuf),
}

// ---------------------------------------------------------------------------
// Response generation
// ---------------------------------------------------------------------------

/// A finalized response container, backed by secure-heap memory.
#[derive(Debug)]
pub struct Response {
    buf: SecureBuf,
}

impl Response {
    /// The finalized container bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Container size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the response is empty (never true for a finalized container).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Transfer the backing buffer to the caller (e.g. the transport).
    #[must_use]
    pub fn into_buf(self) -> SecureBuf {
        self.buf
    }
}

/// Build the wire response for one completed call.
///
/// Stages every populated output slot into the scratch arena, then emits the
/// typed entries, the context entry, and the method/result metadata into one
/// container.
///
/// Context handling by method kind:
///
/// - session allocation, success: the live context is registered with the
///   `SessionCache` (exactly once) and flattened into the response. A
///   success without a live context is a contract violation.
/// - session allocation, failure: a zero-length context entry is emitted
///   instead, whether or not a live context was supplied, so failure
///   responses parse uniformly without branching on the result first.
/// - any other method: an attached context is flattened the same way; no
///   context, no entry. A flatten failure fails the whole response rather
///   than silently dropping the entry.
pub fn generate_output(
    table: &ParameterTable<'_>,
    method: MethodId,
    status: CallStatus,
    context: Option<&SessionContext>,
    session_cache: &dyn SessionCache,
    alloc: &dyn SecureAllocator,
) -> Result<Response> {
    let mut arena = ScratchArena::new();
    for param in table.outputs() {
        arena.stage(param)?;
    }

    let emit = if method.is_session_allocate() {
        if status.is_success() {
            let Some(ctx) = context else {
                return Err(MarshalError::internal(
                    "session allocation succeeded without a live context",
                ));
            };
            // The cache must know the session before the response that
            // names it can leave the host.
            session_cache.add_context(ctx)?;
            ContextEmit::Flat(flatten_context(ctx, alloc)?)
        } else {
            ContextEmit::Empty
        }
    } else if let Some(ctx) = context {
        ContextEmit::Flat(flatten_context(ctx, alloc)?)
    } else {
        ContextEmit::Skip
    };

    let size = CONTAINER_HEADER_SIZE
        + arena.encoded_size()
        + match &emit {
            ContextEmit::Skip => 0,
            ContextEmit::Empty => context_entry_size(0),
            ContextEmit::Flat(flat) => context_entry_size(flat.len()),
        }
        + METHOD_ENTRY_SIZE
        + RESULT_ENTRY_SIZE;

    let mut buf = alloc.alloc(size)?;
    let written = {
        let mut builder = ContainerBuilder::begin(&mut buf)?;
        arena.emit(&mut builder)?;
        match &emit {
            ContextEmit::Skip => {}
            ContextEmit::Empty => builder.add_context(&[])?,
            ContextEmit::Flat(flat) => builder.add_context(flat)?,
        }
        builder.add_method(method)?;
        builder.add_result(status)?;
        builder.finalize()?
    };
    debug_assert_eq!(written, size, "size pre-pass disagrees with emission");
    buf.truncate(written);

    debug!(
        method = method.raw(),
        status = status.raw(),
        outputs = arena.staged(),
        size = written,
        "response generated"
    );
    Ok(Response { buf })
}

// ---------------------------------------------------------------------------
// Response parsing (host side)
// ---------------------------------------------------------------------------

/// Decoded view of one response container.
#[derive(Debug)]
pub struct ResponseView<'m> {
    /// Echoed method identifier.
    pub method: MethodId,
    /// The callee's result code.
    pub status: CallStatus,
    /// Raw flattened context bytes, if a context entry is present. An empty
    /// slice is the valid-but-empty marker from a failed session
    /// allocation.
    pub context: Option<&'m [u8]>,
    /// The response's typed output parameters (decoded borrowed).
    pub table: ParameterTable<'m>,
}

/// Parse a finalized response container.
///
/// Responses parse uniformly whether the call succeeded or failed: the
/// method and result entries must each appear exactly once, the context
/// entry at most once. Parameter entries go through the same slot
/// validation as request parsing.
pub fn parse_response(bytes: &[u8]) -> Result<ResponseView<'_>> {
    let container = Container::parse(bytes)?;

    let mut method = None;
    let mut status = None;
    let mut context = None;
    let mut table = ParameterTable::new();

    for entry in container.entries() {
        let entry = entry?;
        let value = match entry.payload {
            EntryPayload::MethodId(m) => {
                if method.replace(m).is_some() {
                    return Err(MarshalError::corrupt(0, "duplicate method entry"));
                }
                continue;
            }
            EntryPayload::ResultCode(s) => {
                if status.replace(s).is_some() {
                    return Err(MarshalError::corrupt(0, "duplicate result entry"));
                }
                continue;
            }
            EntryPayload::Context(data) => {
                if context.replace(data).is_some() {
                    return Err(MarshalError::corrupt(0, "duplicate context entry"));
                }
                continue;
            }
            EntryPayload::I32(v) => ParamValue::I32(v),
            EntryPayload::I64(v) => ParamValue::I64(v),
            EntryPayload::Id128(v) => ParamValue::Id128(v),
            EntryPayload::Blob { subtype, data } => {
                table.ensure_vacant(entry.index)?;
                let kind = BlobKind::from_code(subtype)
                    .ok_or(MarshalError::UnknownBlobSubtype { subtype })?;
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
        };
        let index = entry.index;
        table.fill_slot(index, value)?;
        if let Some(slot) = table.get_mut(index) {
            slot.is_output = true;
        }
    }

    let method = method.ok_or_else(|| MarshalError::corrupt(0, "missing method entry"))?;
    let status = status.ok_or_else(|| MarshalError::corrupt(0, "missing result entry"))?;

    Ok(ResponseView {
        method,
        status,
        context,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MemorySessionCache;
    use teeport_types::limits::{CONTEXT_HEADER_SIZE as CTX_HEADER, MAX_I32_PARAMS};
    use teeport_types::SecureHeap;

    fn ready_cache() -> MemorySessionCache {
        let cache = MemorySessionCache::new();
        cache.initialize().unwrap();
        cache
    }

    #[test]
    fn single_i32_output_round_trips() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let mut table = ParameterTable::new();
        table.set_output(0, ParamValue::I32(42)).unwrap();

        let response = generate_output(
            &table,
            MethodId::new(0x10),
            CallStatus::SUCCESS,
            None,
            &cache,
            &heap,
        )
        .unwrap();

        let view = parse_response(response.as_bytes()).unwrap();
        assert_eq!(view.method, MethodId::new(0x10));
        assert!(view.status.is_success());
        assert!(view.context.is_none());

        let populated: Vec<_> = view
            .table
            .iter()
            .filter(|p| !p.value.is_invalid())
            .collect();
        assert_eq!(populated.len(), 1);
        assert_eq!(populated[0].index, 0);
        assert!(matches!(populated[0].value, ParamValue::I32(42)));
        assert!(populated[0].is_output);
    }

    #[test]
    fn non_output_slots_are_not_serialized() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let mut table = ParameterTable::new();
        table.fill_slot(0, ParamValue::I32(1)).unwrap(); // input
        table.set_output(1, ParamValue::I64(2)).unwrap();

        let response = generate_output(
            &table,
            MethodId::new(0x11),
            CallStatus::SUCCESS,
            None,
            &cache,
            &heap,
        )
        .unwrap();
        let view = parse_response(response.as_bytes()).unwrap();
        assert!(view.table.get(0).unwrap().value.is_invalid());
        assert!(matches!(view.table.get(1).unwrap().value, ParamValue::I64(2)));
    }

    #[test]
    fn scratch_capacity_is_a_hard_bound() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let mut table = ParameterTable::new();
        // MAX_PARAMS == MAX_I32_PARAMS, so fill every slot to reach the cap
        // and confirm the arena itself accepts exactly the maximum.
        for i in 0..MAX_I32_PARAMS {
            table.set_output(i as u32, ParamValue::I32(i as i32)).unwrap();
        }
        let response = generate_output(
            &table,
            MethodId::new(0x12),
            CallStatus::SUCCESS,
            None,
            &cache,
            &heap,
        )
        .unwrap();
        let view = parse_response(response.as_bytes()).unwrap();
        assert_eq!(view.table.outputs().count(), MAX_I32_PARAMS);
    }

    #[test]
    fn session_allocate_success_registers_and_embeds_context() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let table = ParameterTable::new();

        let mut ctx = SessionContext::new();
        let mut trailer = heap.alloc(10).unwrap();
        trailer.as_mut_slice().copy_from_slice(&[0xC7; 10]);
        ctx.attach_trailer(trailer);

        let response = generate_output(
            &table,
            MethodId::SESSION_ALLOCATE,
            CallStatus::SUCCESS,
            Some(&ctx),
            &cache,
            &heap,
        )
        .unwrap();

        assert_eq!(cache.len(), 1, "registered exactly once");
        let view = parse_response(response.as_bytes()).unwrap();
        let flat = view.context.expect("context entry present");
        assert_eq!(flat.len(), CTX_HEADER + 10);
        assert_eq!(&flat[CTX_HEADER..], &[0xC7; 10]);
    }

    #[test]
    fn session_allocate_failure_emits_empty_context_marker() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let table = ParameterTable::new();

        // Even with a live context supplied, a failed allocation reports the
        // empty marker and registers nothing.
        let ctx = SessionContext::new();
        for supplied in [None, Some(&ctx)] {
            let response = generate_output(
                &table,
                MethodId::SESSION_ALLOCATE,
                CallStatus::new(0xFFFF_0000),
                supplied,
                &cache,
                &heap,
            )
            .unwrap();
            let view = parse_response(response.as_bytes()).unwrap();
            let flat = view.context.expect("marker entry present");
            assert!(flat.is_empty());
            assert!(!view.status.is_success());
        }
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn session_allocate_success_without_context_is_contract_violation() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let table = ParameterTable::new();
        let err = generate_output(
            &table,
            MethodId::SESSION_ALLOCATE,
            CallStatus::SUCCESS,
            None,
            &cache,
            &heap,
        )
        .unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn cache_failure_aborts_response() {
        let heap = SecureHeap::unbounded();
        let cache = MemorySessionCache::new(); // not initialized
        let table = ParameterTable::new();
        let ctx = SessionContext::new();
        let err = generate_output(
            &table,
            MethodId::SESSION_ALLOCATE,
            CallStatus::SUCCESS,
            Some(&ctx),
            &cache,
            &heap,
        )
        .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn other_method_with_context_embeds_it() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let table = ParameterTable::new();
        let ctx = SessionContext::new();

        let response = generate_output(
            &table,
            MethodId::new(0x30),
            CallStatus::SUCCESS,
            Some(&ctx),
            &cache,
            &heap,
        )
        .unwrap();
        assert_eq!(cache.len(), 0, "only allocation registers");
        let view = parse_response(response.as_bytes()).unwrap();
        assert_eq!(view.context.map(<[u8]>::len), Some(CTX_HEADER));
    }

    #[test]
    fn allocation_failure_leaves_no_live_bytes() {
        // Budget fits the flattened context but not the response buffer.
        let heap = SecureHeap::with_budget(CTX_HEADER + 20);
        let cache = ready_cache();
        let table = ParameterTable::new();
        let ctx = SessionContext::new();

        let err = generate_output(
            &table,
            MethodId::new(0x31),
            CallStatus::SUCCESS,
            Some(&ctx),
            &cache,
            &heap,
        )
        .unwrap_err();
        assert!(matches!(err, MarshalError::OutOfMemory { .. }));
        assert_eq!(heap.in_use(), 0, "error path released everything");
    }

    #[test]
    fn blob_and_list_outputs_round_trip() {
        let heap = SecureHeap::unbounded();
        let cache = ready_cache();
        let mut table = ParameterTable::new();

        let blob = decode_blob(
            BlobKind::SecureHandle,
            &[1, 2, 3],
            DecodePolicy::Copy(&heap),
        )
        .unwrap();
        table.set_output(2, ParamValue::ByteBlob(blob)).unwrap();

        let raw: Vec<u8> = [4i64, 5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let list = decode_list(ElemWidth::Bits64, 2, &raw, DecodePolicy::Copy(&heap)).unwrap();
        table.set_output(5, ParamValue::I64List(list)).unwrap();

        let response = generate_output(
            &table,
            MethodId::new(0x20),
            CallStatus::SUCCESS,
            None,
            &cache,
            &heap,
        )
        .unwrap();
        let view = parse_response(response.as_bytes()).unwrap();

        match &view.table.get(2).unwrap().value {
            ParamValue::ByteBlob(b) => {
                assert_eq!(b.kind, BlobKind::SecureHandle);
                assert_eq!(b.bytes(), &[1, 2, 3]);
            }
            other => panic!("expected blob, got {other:?}"),
        }
        match &view.table.get(5).unwrap().value {
            ParamValue::I64List(l) => assert_eq!(l.to_i64_vec(), Some(vec![4, 5])),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn parse_response_requires_method_and_result() {
        use teeport_wire::ContainerBuilder;

        let mut buf = vec![0u8; 64];
        let mut b = ContainerBuilder::begin(&mut buf).unwrap();
        b.add_method(MethodId::new(1)).unwrap();
        let len = b.finalize().unwrap();
        buf.truncate(len);
        let err = parse_response(&buf).unwrap_err();
        assert!(matches!(err, MarshalError::ContainerCorrupt { .. }));
    }
}
