#![forbid(unsafe_code)]

use crate::types::{record_crc32, EdgeId, NodeId, Result, SombraError, TokenId};

use super::codec::{be_u32, be_u64};

/// Size of one node record.
pub const NODE_RECORD_LEN: usize = 32;
/// Size of one edge record.
pub const EDGE_RECORD_LEN: usize = 48;

const FLAG_IN_USE: u8 = 0x01;
const FLAG_DENSE: u8 = 0x02;

/// One slot of `nodes.store`.
///
/// Layout: flags, 3 reserved bytes, label, first edge, property key,
/// property value, crc32 salted with the node id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    /// Whether the slot holds a live node.
    pub in_use: bool,
    /// Dense nodes keep their per-type degrees in the degrees store.
    pub dense: bool,
    /// Label token, or none.
    pub label: TokenId,
    /// Head of the node's edge chain.
    pub first_edge: EdgeId,
    /// Key of the node's single inline property, or none.
    pub prop_key: TokenId,
    /// Value of the inline property.
    pub prop_value: u64,
}

impl NodeRecord {
    /// An unused slot.
    pub fn unused() -> Self {
        Self {
            in_use: false,
            dense: false,
            label: TokenId(crate::types::NO_TOKEN),
            first_edge: EdgeId(crate::types::NIL),
            prop_key: TokenId(crate::types::NO_TOKEN),
            prop_value: 0,
        }
    }

    /// Returns the inline property if one is set.
    pub fn property(&self) -> Option<(TokenId, u64)> {
        (!self.prop_key.is_none()).then_some((self.prop_key, self.prop_value))
    }

    /// Encodes the record for slot `id`.
    pub fn encode(&self, id: NodeId) -> [u8; NODE_RECORD_LEN] {
        let mut buf = [0u8; NODE_RECORD_LEN];
        let mut flags = 0u8;
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if self.dense {
            flags |= FLAG_DENSE;
        }
        buf[0] = flags;
        buf[4..8].copy_from_slice(&self.label.0.to_be_bytes());
        buf[8..16].copy_from_slice(&self.first_edge.0.to_be_bytes());
        buf[16..20].copy_from_slice(&self.prop_key.0.to_be_bytes());
        buf[20..28].copy_from_slice(&self.prop_value.to_be_bytes());
        let crc = record_crc32(id.0, &buf[..28]);
        buf[28..32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Decodes slot `id`, failing with corruption on a checksum mismatch or
    /// unknown flag bits.
    pub fn decode(id: NodeId, src: &[u8]) -> Result<Self> {
        if src.len() != NODE_RECORD_LEN {
            return Err(SombraError::Corruption(format!(
                "node {id} record is {} bytes",
                src.len()
            )));
        }
        if record_crc32(id.0, &src[..28]) != be_u32(&src[28..32]) {
            return Err(SombraError::Corruption(format!(
                "node {id} record checksum mismatch"
            )));
        }
        let flags = src[0];
        if flags & !(FLAG_IN_USE | FLAG_DENSE) != 0 {
            return Err(SombraError::Corruption(format!(
                "node {id} has unknown flags 0x{flags:02X}"
            )));
        }
        Ok(Self {
            in_use: flags & FLAG_IN_USE != 0,
            dense: flags & FLAG_DENSE != 0,
            label: TokenId(be_u32(&src[4..8])),
            first_edge: EdgeId(be_u64(&src[8..16])),
            prop_key: TokenId(be_u32(&src[16..20])),
            prop_value: be_u64(&src[20..28]),
        })
    }
}

/// One slot of `edges.store`.
///
/// Each edge sits in the chains of both endpoints; `src_next` continues the
/// source's chain and `dst_next` the target's. A self-loop is linked once,
/// through `src_next`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeRecord {
    /// Whether the slot holds a live edge.
    pub in_use: bool,
    /// Relationship type token.
    pub edge_type: TokenId,
    /// Source node.
    pub src: NodeId,
    /// Target node.
    pub dst: NodeId,
    /// Next edge in the source node's chain.
    pub src_next: EdgeId,
    /// Next edge in the target node's chain.
    pub dst_next: EdgeId,
}

impl EdgeRecord {
    /// An unused slot.
    pub fn unused() -> Self {
        Self {
            in_use: false,
            edge_type: TokenId(crate::types::NO_TOKEN),
            src: NodeId(crate::types::NIL),
            dst: NodeId(crate::types::NIL),
            src_next: EdgeId(crate::types::NIL),
            dst_next: EdgeId(crate::types::NIL),
        }
    }

    /// Returns true when both endpoints are the same node.
    pub fn is_self_loop(&self) -> bool {
        self.src == self.dst
    }

    /// Next edge in `node`'s chain, or `None` if the edge does not touch `node`.
    pub fn next_for(&self, node: NodeId) -> Option<EdgeId> {
        if self.src == node {
            Some(self.src_next)
        } else if self.dst == node {
            Some(self.dst_next)
        } else {
            None
        }
    }

    /// Encodes the record for slot `id`.
    pub fn encode(&self, id: EdgeId) -> [u8; EDGE_RECORD_LEN] {
        let mut buf = [0u8; EDGE_RECORD_LEN];
        buf[0] = if self.in_use { FLAG_IN_USE } else { 0 };
        buf[4..8].copy_from_slice(&self.edge_type.0.to_be_bytes());
        buf[8..16].copy_from_slice(&self.src.0.to_be_bytes());
        buf[16..24].copy_from_slice(&self.dst.0.to_be_bytes());
        buf[24..32].copy_from_slice(&self.src_next.0.to_be_bytes());
        buf[32..40].copy_from_slice(&self.dst_next.0.to_be_bytes());
        let crc = record_crc32(id.0, &buf[..44]);
        buf[44..48].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Decodes slot `id`.
    pub fn decode(id: EdgeId, src: &[u8]) -> Result<Self> {
        if src.len() != EDGE_RECORD_LEN {
            return Err(SombraError::Corruption(format!(
                "edge {id} record is {} bytes",
                src.len()
            )));
        }
        if record_crc32(id.0, &src[..44]) != be_u32(&src[44..48]) {
            return Err(SombraError::Corruption(format!(
                "edge {id} record checksum mismatch"
            )));
        }
        let flags = src[0];
        if flags & !FLAG_IN_USE != 0 {
            return Err(SombraError::Corruption(format!(
                "edge {id} has unknown flags 0x{flags:02X}"
            )));
        }
        Ok(Self {
            in_use: flags & FLAG_IN_USE != 0,
            edge_type: TokenId(be_u32(&src[4..8])),
            src: NodeId(be_u64(&src[8..16])),
            dst: NodeId(be_u64(&src[16..24])),
            src_next: EdgeId(be_u64(&src[24..32])),
            dst_next: EdgeId(be_u64(&src[32..40])),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_moved_to_another_slot_fails_checksum() {
        let record = NodeRecord {
            in_use: true,
            dense: true,
            label: TokenId(2),
            first_edge: EdgeId(5),
            prop_key: TokenId(1),
            prop_value: 42,
        };
        let bytes = record.encode(NodeId(3));
        assert_eq!(NodeRecord::decode(NodeId(3), &bytes).unwrap(), record);
        assert!(NodeRecord::decode(NodeId(4), &bytes).is_err());
    }

    #[test]
    fn next_for_follows_the_matching_endpoint() {
        let edge = EdgeRecord {
            in_use: true,
            edge_type: TokenId(0),
            src: NodeId(1),
            dst: NodeId(2),
            src_next: EdgeId(10),
            dst_next: EdgeId(20),
        };
        assert_eq!(edge.next_for(NodeId(1)), Some(EdgeId(10)));
        assert_eq!(edge.next_for(NodeId(2)), Some(EdgeId(20)));
        assert_eq!(edge.next_for(NodeId(3)), None);
        let decoded = EdgeRecord::decode(EdgeId(0), &edge.encode(EdgeId(0))).unwrap();
        assert_eq!(decoded, edge);
    }
}
