#![forbid(unsafe_code)]

use std::path::Path;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{Result, SombraError, TxId};

use super::codec::{be_u16, be_u32, be_u64, crc32, write_atomically};

const META_MAGIC: [u8; 4] = *b"SOMM";
const META_VERSION: u16 = 1;

/// Encoded size of the meta store.
pub const META_LEN: usize = 64;

/// Contents of `meta.store`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreMeta {
    /// Last transaction applied to the store files.
    pub last_committed_tx: TxId,
    /// One past the highest node id ever allocated.
    pub node_high_id: u64,
    /// One past the highest edge id ever allocated.
    pub edge_high_id: u64,
}

impl StoreMeta {
    /// Encodes to the fixed on-disk layout.
    pub fn encode(&self) -> [u8; META_LEN] {
        let mut buf = [0u8; META_LEN];
        buf[0..4].copy_from_slice(&META_MAGIC);
        buf[4..6].copy_from_slice(&META_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&self.last_committed_tx.0.to_be_bytes());
        buf[16..24].copy_from_slice(&self.node_high_id.to_be_bytes());
        buf[24..32].copy_from_slice(&self.edge_high_id.to_be_bytes());
        let crc = crc32(&buf[..60]);
        buf[60..64].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Decodes and validates the on-disk layout.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != META_LEN {
            return Err(SombraError::Corruption(format!(
                "meta store is {} bytes, expected {META_LEN}",
                src.len()
            )));
        }
        if src[0..4] != META_MAGIC {
            return Err(SombraError::Corruption("meta store magic mismatch".into()));
        }
        let version = be_u16(&src[4..6]);
        if version != META_VERSION {
            return Err(SombraError::Corruption(format!(
                "meta store version {version} unsupported"
            )));
        }
        if crc32(&src[..60]) != be_u32(&src[60..64]) {
            return Err(SombraError::Corruption("meta store crc mismatch".into()));
        }
        Ok(Self {
            last_committed_tx: TxId(be_u64(&src[8..16])),
            node_high_id: be_u64(&src[16..24]),
            edge_high_id: be_u64(&src[24..32]),
        })
    }
}

/// Reads the meta store directly, without a page cache.
///
/// Used before anything else is opened, e.g. by the recovery check.
pub fn read_meta(path: &Path) -> Result<StoreMeta> {
    let io = StdFileIo::open_read_only(path)?;
    let len = io.len()?;
    if len != META_LEN as u64 {
        return Err(SombraError::Corruption(format!(
            "meta store is {len} bytes, expected {META_LEN}"
        )));
    }
    let mut buf = [0u8; META_LEN];
    io.read_at(0, &mut buf)?;
    StoreMeta::decode(&buf)
}

/// Writes the meta store.
pub fn write_meta(path: &Path, meta: &StoreMeta) -> Result<()> {
    write_atomically(path, &meta.encode())?;
    Ok(())
}
