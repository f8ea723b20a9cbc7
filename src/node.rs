use std::fmt;

use crate::trace_type::{bits, TraceType};

/// Variable-length, schema-tagged payload a hop may attach in addition to
/// its fixed fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// 24 bits used.
    pub schema_id: u32,
    pub data: Vec<u8>,
}

/// Direct-Export extras. Namespace always accompanies a DEX record; flow id
/// and sequence number are optional and not controlled by the bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DexInfo {
    pub namespace: u16,
    pub flow_id: Option<u32>,
    pub seq_num: Option<u32>,
}

/// One telemetry observation at one hop, the unified shape both decoders
/// produce and the IPFIX encoder consumes. A field is meaningful only when
/// its trace-type bit is set; unset fields stay zero and are never
/// serialized. Built once per decoded hop, consumed once, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IoamNode {
    pub trace_type: TraceType,
    pub hop_limit: u8,
    /// 24 bits used.
    pub node_id: u32,
    pub ingress_id: u16,
    pub egress_id: u16,
    pub timestamp_secs: u32,
    pub timestamp_frac: u32,
    pub transit_delay: u32,
    pub namespace_data: u32,
    pub queue_depth: u32,
    pub checksum_comp: u32,
    /// 56 bits used.
    pub node_id_wide: u64,
    pub ingress_id_wide: u32,
    pub egress_id_wide: u32,
    pub namespace_data_wide: u64,
    pub buffer_occupancy: u32,
    pub snapshot: Option<Snapshot>,
    /// `Some` for Direct-Export records, `None` for trace-mode records.
    pub dex: Option<DexInfo>,
}

impl IoamNode {
    pub fn is_dex(&self) -> bool {
        self.dex.is_some()
    }
}

/// Console rendering: one line per present field, mirroring the bit order
/// used everywhere else.
impl fmt::Display for IoamNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tt = self.trace_type;
        let mode = if self.is_dex() { "DEX" } else { "Trace" };
        writeln!(f, "IOAM {} node (trace type {:#08x})", mode, tt.raw())?;
        if let Some(dex) = &self.dex {
            writeln!(f, "  namespace: {}", dex.namespace)?;
            if let Some(id) = dex.flow_id {
                writeln!(f, "  flow id: {}", id)?;
            }
            if let Some(seq) = dex.seq_num {
                writeln!(f, "  seq num: {}", seq)?;
            }
        }
        if tt.contains(bits::HOP_LIMIT_NODE_ID) {
            writeln!(f, "  hop limit: {}, node id: {}", self.hop_limit, self.node_id)?;
        }
        if tt.contains(bits::INTERFACES) {
            writeln!(f, "  ingress: {}, egress: {}", self.ingress_id, self.egress_id)?;
        }
        if tt.contains(bits::TIMESTAMP_SECS) {
            writeln!(f, "  timestamp: {}s", self.timestamp_secs)?;
        }
        if tt.contains(bits::TIMESTAMP_FRAC) {
            writeln!(f, "  timestamp frac: {}", self.timestamp_frac)?;
        }
        if tt.contains(bits::TRANSIT_DELAY) {
            writeln!(f, "  transit delay: {}", self.transit_delay)?;
        }
        if tt.contains(bits::NAMESPACE_DATA) {
            writeln!(f, "  namespace data: {:#x}", self.namespace_data)?;
        }
        if tt.contains(bits::QUEUE_DEPTH) {
            writeln!(f, "  queue depth: {}", self.queue_depth)?;
        }
        if tt.contains(bits::CHECKSUM_COMP) {
            writeln!(f, "  checksum complement: {:#x}", self.checksum_comp)?;
        }
        if tt.contains(bits::HOP_LIMIT_NODE_ID_WIDE) {
            writeln!(
                f,
                "  hop limit: {}, node id (wide): {}",
                self.hop_limit, self.node_id_wide
            )?;
        }
        if tt.contains(bits::INTERFACES_WIDE) {
            writeln!(
                f,
                "  ingress (wide): {}, egress (wide): {}",
                self.ingress_id_wide, self.egress_id_wide
            )?;
        }
        if tt.contains(bits::NAMESPACE_DATA_WIDE) {
            writeln!(f, "  namespace data (wide): {:#x}", self.namespace_data_wide)?;
        }
        if tt.contains(bits::BUFFER_OCCUPANCY) {
            writeln!(f, "  buffer occupancy: {}", self.buffer_occupancy)?;
        }
        if let Some(snap) = &self.snapshot {
            writeln!(
                f,
                "  snapshot: schema {:#08x}, {} bytes",
                snap.schema_id,
                snap.data.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_shows_only_present_fields() {
        let node = IoamNode {
            trace_type: TraceType::new(bits::HOP_LIMIT_NODE_ID | bits::QUEUE_DEPTH),
            hop_limit: 63,
            node_id: 7,
            queue_depth: 1500,
            ..Default::default()
        };
        let out = node.to_string();
        assert!(out.contains("hop limit: 63, node id: 7"));
        assert!(out.contains("queue depth: 1500"));
        assert!(!out.contains("timestamp"));
        assert!(!out.contains("namespace"));
    }
}
