//! Trace-mode decoder: one kernel event carries a concatenated buffer of
//! fixed-width per-hop records, each optionally followed by a
//! variable-length opaque state snapshot.

use crate::netlink::Attribute;
use crate::node::{IoamNode, Snapshot};
use crate::trace_type::{bits, TraceType};
use crate::wire::{Cursor, DecodeError, MASK_24, MASK_56};

const IOAM6_EVENT_ATTR_TRACE_NAMESPACE: u16 = 1;
const IOAM6_EVENT_ATTR_TRACE_NODELEN: u16 = 2;
const IOAM6_EVENT_ATTR_TRACE_TYPE: u16 = 3;
const IOAM6_EVENT_ATTR_TRACE_DATA: u16 = 4;

/// Decodes a trace event's attribute list into per-hop records, in the
/// order the hops appear in the buffer (ingress first). All records share
/// the event's trace type. Any structural error abandons the whole event.
pub fn decode(attrs: &[Attribute<'_>]) -> Result<Vec<IoamNode>, DecodeError> {
    let mut node_len: Option<u8> = None;
    let mut trace_type: Option<TraceType> = None;
    let mut data: &[u8] = &[];

    for attr in attrs {
        match attr.kind {
            // Namespace is informational for trace events; nothing to keep.
            IOAM6_EVENT_ATTR_TRACE_NAMESPACE => {}
            IOAM6_EVENT_ATTR_TRACE_NODELEN => {
                node_len = Some(*attr.data.first().ok_or(DecodeError::Truncated("node length"))?);
            }
            IOAM6_EVENT_ATTR_TRACE_TYPE => {
                let word: [u8; 4] = attr
                    .data
                    .get(..4)
                    .and_then(|w| w.try_into().ok())
                    .ok_or(DecodeError::Truncated("trace type"))?;
                trace_type = Some(TraceType::from_kernel_word(&word));
            }
            IOAM6_EVENT_ATTR_TRACE_DATA => data = attr.data,
            other => tracing::debug!("ignoring unknown trace attribute {}", other),
        }
    }

    let node_len = node_len.ok_or(DecodeError::MissingAttribute("node length"))?;
    let trace_type = trace_type.ok_or(DecodeError::MissingAttribute("trace type"))?;
    // A zero node length is decodable when the snapshot bit is set (each
    // hop still consumes its snapshot region); without it no progress
    // through the buffer is possible.
    if node_len == 0 && !data.is_empty() && !trace_type.contains(bits::OPAQUE_SNAPSHOT) {
        return Err(DecodeError::InvalidNodeLength(node_len));
    }
    let chunk_len = node_len as usize * 4;

    let mut nodes = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let chunk = data
            .get(offset..offset + chunk_len)
            .ok_or(DecodeError::Truncated("node data"))?;
        let mut node = parse_node(chunk, trace_type)?;
        offset += chunk_len;

        if trace_type.contains(bits::OPAQUE_SNAPSHOT) {
            let (snapshot, consumed) = parse_snapshot(&data[offset..])?;
            node.snapshot = snapshot;
            offset += consumed;
        }

        nodes.push(node);
    }

    Ok(nodes)
}

/// Walks the fixed region of one hop record, bit by bit in wire order,
/// reading exactly the width each bit contributes. 24- and 56-bit values
/// sit in the top bytes of their 32/64-bit big-endian word.
fn parse_node(chunk: &[u8], trace_type: TraceType) -> Result<IoamNode, DecodeError> {
    let mut node = IoamNode {
        trace_type,
        ..Default::default()
    };
    let mut cur = Cursor::new(chunk);

    if trace_type.contains(bits::HOP_LIMIT_NODE_ID) {
        let word = cur.u32_be()?;
        node.hop_limit = (word >> 24) as u8;
        node.node_id = word & MASK_24;
    }
    if trace_type.contains(bits::INTERFACES) {
        node.ingress_id = cur.u16_be()?;
        node.egress_id = cur.u16_be()?;
    }
    if trace_type.contains(bits::TIMESTAMP_SECS) {
        node.timestamp_secs = cur.u32_be()?;
    }
    if trace_type.contains(bits::TIMESTAMP_FRAC) {
        node.timestamp_frac = cur.u32_be()?;
    }
    if trace_type.contains(bits::TRANSIT_DELAY) {
        node.transit_delay = cur.u32_be()?;
    }
    if trace_type.contains(bits::NAMESPACE_DATA) {
        node.namespace_data = cur.u32_be()?;
    }
    if trace_type.contains(bits::QUEUE_DEPTH) {
        node.queue_depth = cur.u32_be()?;
    }
    if trace_type.contains(bits::CHECKSUM_COMP) {
        node.checksum_comp = cur.u32_be()?;
    }
    if trace_type.contains(bits::HOP_LIMIT_NODE_ID_WIDE) {
        let word = cur.u64_be()?;
        node.hop_limit = (word >> 56) as u8;
        node.node_id_wide = word & MASK_56;
    }
    if trace_type.contains(bits::INTERFACES_WIDE) {
        node.ingress_id_wide = cur.u32_be()?;
        node.egress_id_wide = cur.u32_be()?;
    }
    if trace_type.contains(bits::NAMESPACE_DATA_WIDE) {
        node.namespace_data_wide = cur.u64_be()?;
    }
    if trace_type.contains(bits::BUFFER_OCCUPANCY) {
        node.buffer_occupancy = cur.u32_be()?;
    }

    Ok(node)
}

/// Snapshot region: one byte of length in 4-byte words sharing a 32-bit
/// word with the 24-bit schema id, then the payload. A zero length
/// consumes only the 4-byte word and attaches nothing.
fn parse_snapshot(data: &[u8]) -> Result<(Option<Snapshot>, usize), DecodeError> {
    let word: [u8; 4] = data
        .get(..4)
        .and_then(|w| w.try_into().ok())
        .ok_or(DecodeError::Truncated("snapshot header"))?;
    let len_words = word[0] as usize;
    if len_words == 0 {
        return Ok((None, 4));
    }

    let schema_id = u32::from_be_bytes(word) & MASK_24;
    let payload_len = len_words * 4;
    let payload = data.get(4..4 + payload_len).ok_or(DecodeError::SnapshotOverrun {
        declared: payload_len,
        remaining: data.len().saturating_sub(4),
    })?;

    Ok((
        Some(Snapshot {
            schema_id,
            data: payload.to_vec(),
        }),
        4 + payload_len,
    ))
}
