#![forbid(unsafe_code)]

use crate::types::{Result, SombraError, TokenId};

use super::codec::{be_u16, be_u32, crc32};

const SCHEMA_MAGIC: [u8; 4] = *b"SOMS";
const SCHEMA_VERSION: u16 = 1;
const SCHEMA_HEADER_LEN: usize = 12;

/// Definition of one property index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Index id; entries live in `index-<id>.store`.
    pub id: u32,
    /// Label of indexed nodes.
    pub label: TokenId,
    /// Indexed property key.
    pub property_key: TokenId,
    /// Provider name, e.g. `native-btree-1.0`.
    pub provider: String,
}

/// Encodes `schema.store`.
pub fn encode_schema(indexes: &[IndexDescriptor]) -> Result<Vec<u8>> {
    let count = u32::try_from(indexes.len())
        .map_err(|_| SombraError::Invalid("too many indexes".into()))?;
    let mut buf = Vec::new();
    buf.extend_from_slice(&SCHEMA_MAGIC);
    buf.extend_from_slice(&SCHEMA_VERSION.to_be_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&count.to_be_bytes());
    for index in indexes {
        let provider_len = u16::try_from(index.provider.len())
            .map_err(|_| SombraError::Invalid("provider name too long".into()))?;
        buf.extend_from_slice(&index.id.to_be_bytes());
        buf.extend_from_slice(&index.label.0.to_be_bytes());
        buf.extend_from_slice(&index.property_key.0.to_be_bytes());
        buf.extend_from_slice(&provider_len.to_be_bytes());
        buf.extend_from_slice(index.provider.as_bytes());
    }
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    Ok(buf)
}

/// Decodes `schema.store`.
pub fn decode_schema(src: &[u8]) -> Result<Vec<IndexDescriptor>> {
    if src.len() < SCHEMA_HEADER_LEN + 4 {
        return Err(SombraError::Corruption("schema store truncated".into()));
    }
    let (body, trailer) = src.split_at(src.len() - 4);
    if crc32(body) != be_u32(trailer) {
        return Err(SombraError::Corruption("schema store crc mismatch".into()));
    }
    if body[0..4] != SCHEMA_MAGIC || be_u16(&body[4..6]) != SCHEMA_VERSION {
        return Err(SombraError::Corruption("schema store header invalid".into()));
    }
    let count = be_u32(&body[8..12]) as usize;
    let mut indexes = Vec::with_capacity(count.min(1024));
    let mut cursor = SCHEMA_HEADER_LEN;
    for _ in 0..count {
        let fixed = body
            .get(cursor..cursor + 14)
            .ok_or_else(|| SombraError::Corruption("schema entry truncated".into()))?;
        let provider_len = be_u16(&fixed[12..14]) as usize;
        let provider = body
            .get(cursor + 14..cursor + 14 + provider_len)
            .ok_or_else(|| SombraError::Corruption("schema provider truncated".into()))?;
        indexes.push(IndexDescriptor {
            id: be_u32(&fixed[0..4]),
            label: TokenId(be_u32(&fixed[4..8])),
            property_key: TokenId(be_u32(&fixed[8..12])),
            provider: String::from_utf8(provider.to_vec()).map_err(|_| {
                SombraError::Corruption("schema provider name is not utf-8".into())
            })?,
        });
        cursor += 14 + provider_len;
    }
    if cursor != body.len() {
        return Err(SombraError::Corruption("schema store has trailing bytes".into()));
    }
    Ok(indexes)
}
