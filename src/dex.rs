//! Direct-Export decoder: a single hop's record arrives as discrete typed
//! attributes rather than a packed buffer. Namespace, flow id and
//! sequence number are little-endian; every data attribute is big-endian.
//! The asymmetry comes from two different kernel encoding paths and is
//! preserved as-is.

use crate::netlink::Attribute;
use crate::node::{DexInfo, IoamNode, Snapshot};
use crate::trace_type::bits;
use crate::wire::{
    read_u16_le, read_u32_be, read_u32_le, read_u64_be, DecodeError, MASK_24, MASK_56,
};

const IOAM6_EVENT_ATTR_OPTION_TYPE: u16 = 5;
const IOAM6_EVENT_ATTR_DEX_NAMESPACE: u16 = 6;
const IOAM6_EVENT_ATTR_DEX_FLOW_ID: u16 = 7;
const IOAM6_EVENT_ATTR_DEX_SEQ_NUM: u16 = 8;
const IOAM6_EVENT_ATTR_DEX_HOP_LIM_NODE_ID: u16 = 9;
const IOAM6_EVENT_ATTR_DEX_INTERFACES: u16 = 10;
const IOAM6_EVENT_ATTR_DEX_TIMESTAMP: u16 = 11;
const IOAM6_EVENT_ATTR_DEX_TIMESTAMP_FRAC: u16 = 12;
const IOAM6_EVENT_ATTR_DEX_NAMESPACE_SPECIFIC: u16 = 14;
const IOAM6_EVENT_ATTR_DEX_QUEUE_DEPTH: u16 = 15;
const IOAM6_EVENT_ATTR_DEX_HOP_LIM_NODE_ID_WIDE: u16 = 17;
const IOAM6_EVENT_ATTR_DEX_INTERFACES_WIDE: u16 = 18;
const IOAM6_EVENT_ATTR_DEX_NAMESPACE_SPECIFIC_WIDE: u16 = 19;
const IOAM6_EVENT_ATTR_DEX_OSS_SCID: u16 = 31;
const IOAM6_EVENT_ATTR_DEX_OSS_DATA: u16 = 32;

/// The IOAM option-type value identifying Direct Export.
const DEX_OPTION_TYPE: u8 = 4;

/// Decodes one Direct-Export event into a single canonical record. Each
/// observed data attribute sets its trace-type bit, so the record's mask
/// drives template building and encoding exactly like a trace record.
pub fn decode(attrs: &[Attribute<'_>]) -> Result<IoamNode, DecodeError> {
    let mut node = IoamNode::default();
    let mut dex = DexInfo::default();
    let mut option_type_seen = false;
    let mut oss_schema: Option<u32> = None;
    let mut oss_data: Option<Vec<u8>> = None;

    for attr in attrs {
        match attr.kind {
            IOAM6_EVENT_ATTR_OPTION_TYPE => {
                let value = *attr.data.first().ok_or(DecodeError::Truncated("option type"))?;
                if value != DEX_OPTION_TYPE {
                    return Err(DecodeError::NotDirectExport(value));
                }
                option_type_seen = true;
            }
            IOAM6_EVENT_ATTR_DEX_NAMESPACE => {
                dex.namespace = read_u16_le(attr.data, "dex namespace")?;
            }
            IOAM6_EVENT_ATTR_DEX_FLOW_ID => {
                dex.flow_id = Some(read_u32_le(attr.data, "dex flow id")?);
            }
            IOAM6_EVENT_ATTR_DEX_SEQ_NUM => {
                dex.seq_num = Some(read_u32_le(attr.data, "dex seq num")?);
            }
            IOAM6_EVENT_ATTR_DEX_HOP_LIM_NODE_ID => {
                let word = read_u32_be(attr.data, "hop limit + node id")?;
                node.hop_limit = (word >> 24) as u8;
                node.node_id = word & MASK_24;
                node.trace_type.insert(bits::HOP_LIMIT_NODE_ID);
            }
            IOAM6_EVENT_ATTR_DEX_INTERFACES => {
                let word = read_u32_be(attr.data, "interfaces")?;
                node.ingress_id = (word >> 16) as u16;
                node.egress_id = word as u16;
                node.trace_type.insert(bits::INTERFACES);
            }
            IOAM6_EVENT_ATTR_DEX_TIMESTAMP => {
                node.timestamp_secs = read_u32_be(attr.data, "timestamp")?;
                node.trace_type.insert(bits::TIMESTAMP_SECS);
            }
            IOAM6_EVENT_ATTR_DEX_TIMESTAMP_FRAC => {
                node.timestamp_frac = read_u32_be(attr.data, "timestamp frac")?;
                node.trace_type.insert(bits::TIMESTAMP_FRAC);
            }
            IOAM6_EVENT_ATTR_DEX_NAMESPACE_SPECIFIC => {
                node.namespace_data = read_u32_be(attr.data, "namespace data")?;
                node.trace_type.insert(bits::NAMESPACE_DATA);
            }
            IOAM6_EVENT_ATTR_DEX_QUEUE_DEPTH => {
                node.queue_depth = read_u32_be(attr.data, "queue depth")?;
                node.trace_type.insert(bits::QUEUE_DEPTH);
            }
            IOAM6_EVENT_ATTR_DEX_HOP_LIM_NODE_ID_WIDE => {
                let word = read_u64_be(attr.data, "wide hop limit + node id")?;
                node.hop_limit = (word >> 56) as u8;
                node.node_id_wide = word & MASK_56;
                node.trace_type.insert(bits::HOP_LIMIT_NODE_ID_WIDE);
            }
            IOAM6_EVENT_ATTR_DEX_INTERFACES_WIDE => {
                let word = read_u64_be(attr.data, "wide interfaces")?;
                node.ingress_id_wide = (word >> 32) as u32;
                node.egress_id_wide = word as u32;
                node.trace_type.insert(bits::INTERFACES_WIDE);
            }
            IOAM6_EVENT_ATTR_DEX_NAMESPACE_SPECIFIC_WIDE => {
                node.namespace_data_wide = read_u64_be(attr.data, "wide namespace data")?;
                node.trace_type.insert(bits::NAMESPACE_DATA_WIDE);
            }
            IOAM6_EVENT_ATTR_DEX_OSS_SCID => {
                oss_schema = Some(read_u32_be(attr.data, "snapshot schema")? & MASK_24);
            }
            IOAM6_EVENT_ATTR_DEX_OSS_DATA => {
                oss_data = Some(attr.data.to_vec());
            }
            other => tracing::debug!("ignoring unknown direct-export attribute {}", other),
        }
    }

    if !option_type_seen {
        return Err(DecodeError::MissingAttribute("option type"));
    }

    if oss_schema.is_some() || oss_data.is_some() {
        node.snapshot = Some(Snapshot {
            schema_id: oss_schema.unwrap_or(0),
            data: oss_data.unwrap_or_default(),
        });
        node.trace_type.insert(bits::OPAQUE_SNAPSHOT);
    }

    node.dex = Some(dex);
    Ok(node)
}
