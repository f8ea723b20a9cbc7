/// IOAM trace-type bitmask: 24 significant bits, each enabling one field
/// group in a per-hop record. The bit order below is the wire order for
/// both decoding trace buffers and serializing IPFIX data records.
pub mod bits {
    /// Hop limit + 24-bit node id (4 bytes on the trace wire).
    pub const HOP_LIMIT_NODE_ID: u32 = 1 << 23;
    /// 16-bit ingress + 16-bit egress interface ids.
    pub const INTERFACES: u32 = 1 << 22;
    /// Timestamp, seconds part.
    pub const TIMESTAMP_SECS: u32 = 1 << 21;
    /// Timestamp, fractional part.
    pub const TIMESTAMP_FRAC: u32 = 1 << 20;
    /// Transit delay (trace mode only).
    pub const TRANSIT_DELAY: u32 = 1 << 19;
    /// Namespace-specific data.
    pub const NAMESPACE_DATA: u32 = 1 << 18;
    /// Queue depth.
    pub const QUEUE_DEPTH: u32 = 1 << 17;
    /// Checksum complement (trace mode only).
    pub const CHECKSUM_COMP: u32 = 1 << 16;
    /// Hop limit + 56-bit wide node id (8 bytes on the trace wire).
    pub const HOP_LIMIT_NODE_ID_WIDE: u32 = 1 << 15;
    /// 32-bit ingress + 32-bit egress interface ids.
    pub const INTERFACES_WIDE: u32 = 1 << 14;
    /// 64-bit namespace-specific data.
    pub const NAMESPACE_DATA_WIDE: u32 = 1 << 13;
    /// Buffer occupancy (trace mode only).
    pub const BUFFER_OCCUPANCY: u32 = 1 << 12;
    /// Opaque state snapshot follows the fixed region (variable length).
    pub const OPAQUE_SNAPSHOT: u32 = 1 << 1;
}

/// The field-presence bitmask carried by every canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceType(u32);

impl TraceType {
    pub fn new(raw: u32) -> Self {
        TraceType(raw)
    }

    /// Extracts the effective 24-bit mask from the raw 32-bit trace-type
    /// word of a kernel trace event. The word arrives via a netlink
    /// attribute whose low 8 bits are a reserved flags byte; reading it
    /// little-endian and shifting those bits out matches the kernel's
    /// encoding path.
    pub fn from_kernel_word(data: &[u8; 4]) -> Self {
        TraceType(u32::from_le_bytes(*data) >> 8)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn insert(&mut self, bit: u32) {
        self.0 |= bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_word_discards_flags_byte() {
        // Mask bits 23|22 shifted up by the 8-bit flags byte, stored LE.
        let raw = ((bits::HOP_LIMIT_NODE_ID | bits::INTERFACES) << 8) | 0xAB;
        let tt = TraceType::from_kernel_word(&raw.to_le_bytes());
        assert_eq!(tt.raw(), bits::HOP_LIMIT_NODE_ID | bits::INTERFACES);
        assert!(tt.contains(bits::HOP_LIMIT_NODE_ID));
        assert!(tt.contains(bits::INTERFACES));
        assert!(!tt.contains(bits::TIMESTAMP_SECS));
    }

    #[test]
    fn test_insert() {
        let mut tt = TraceType::default();
        assert_eq!(tt.raw(), 0);
        tt.insert(bits::QUEUE_DEPTH);
        tt.insert(bits::OPAQUE_SNAPSHOT);
        assert!(tt.contains(bits::QUEUE_DEPTH));
        assert!(tt.contains(bits::OPAQUE_SNAPSHOT));
        assert!(!tt.contains(bits::NAMESPACE_DATA));
    }
}
