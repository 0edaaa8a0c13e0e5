#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::lifecycle::Lifecycle;
use crate::types::{Result, SombraError, TokenId};

use super::codec::{be_u16, be_u32, crc32};
use super::primary::PrimaryStore;

const TOKENS_MAGIC: [u8; 4] = *b"SOMT";
const TOKENS_VERSION: u16 = 1;
const TOKENS_HEADER_LEN: usize = 12;

/// Namespace a token belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Node label.
    Label,
    /// Property key.
    PropertyKey,
    /// Relationship type.
    RelationshipType,
}

impl TokenKind {
    fn tag(self) -> u8 {
        match self {
            TokenKind::Label => 1,
            TokenKind::PropertyKey => 2,
            TokenKind::RelationshipType => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(TokenKind::Label),
            2 => Ok(TokenKind::PropertyKey),
            3 => Ok(TokenKind::RelationshipType),
            other => Err(SombraError::Corruption(format!(
                "unknown token kind tag {other}"
            ))),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenKind::Label => "label",
            TokenKind::PropertyKey => "property key",
            TokenKind::RelationshipType => "relationship type",
        })
    }
}

/// One named token as stored in `tokens.store`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    /// Namespace.
    pub kind: TokenKind,
    /// Id referenced by records.
    pub id: TokenId,
    /// Name.
    pub name: String,
}

/// Encodes the token store.
pub fn encode_tokens(tokens: &[TokenRecord]) -> Result<Vec<u8>> {
    let count = u32::try_from(tokens.len())
        .map_err(|_| SombraError::Invalid("too many tokens".into()))?;
    let mut buf = Vec::with_capacity(TOKENS_HEADER_LEN + tokens.len() * 16 + 4);
    buf.extend_from_slice(&TOKENS_MAGIC);
    buf.extend_from_slice(&TOKENS_VERSION.to_be_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&count.to_be_bytes());
    for token in tokens {
        let name_len = u16::try_from(token.name.len())
            .map_err(|_| SombraError::Invalid(format!("token name too long: {}", token.name)))?;
        buf.push(token.kind.tag());
        buf.extend_from_slice(&token.id.0.to_be_bytes());
        buf.extend_from_slice(&name_len.to_be_bytes());
        buf.extend_from_slice(token.name.as_bytes());
    }
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    Ok(buf)
}

/// Decodes the token store.
pub fn decode_tokens(src: &[u8]) -> Result<Vec<TokenRecord>> {
    if src.len() < TOKENS_HEADER_LEN + 4 {
        return Err(SombraError::Corruption("token store truncated".into()));
    }
    let (body, trailer) = src.split_at(src.len() - 4);
    if crc32(body) != be_u32(trailer) {
        return Err(SombraError::Corruption("token store crc mismatch".into()));
    }
    if body[0..4] != TOKENS_MAGIC {
        return Err(SombraError::Corruption("token store magic mismatch".into()));
    }
    let version = be_u16(&body[4..6]);
    if version != TOKENS_VERSION {
        return Err(SombraError::Corruption(format!(
            "token store version {version} unsupported"
        )));
    }
    let count = be_u32(&body[8..12]) as usize;
    let mut tokens = Vec::with_capacity(count.min(4096));
    let mut cursor = TOKENS_HEADER_LEN;
    for _ in 0..count {
        if body.len() < cursor + 7 {
            return Err(SombraError::Corruption("token entry truncated".into()));
        }
        let kind = TokenKind::from_tag(body[cursor])?;
        let id = TokenId(be_u32(&body[cursor + 1..cursor + 5]));
        let name_len = be_u16(&body[cursor + 5..cursor + 7]) as usize;
        cursor += 7;
        let name_bytes = body
            .get(cursor..cursor + name_len)
            .ok_or_else(|| SombraError::Corruption("token name truncated".into()))?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| SombraError::Corruption(format!("token {id} name is not utf-8")))?;
        cursor += name_len;
        tokens.push(TokenRecord { kind, id, name });
    }
    if cursor != body.len() {
        return Err(SombraError::Corruption(format!(
            "token store has {} trailing bytes",
            body.len() - cursor
        )));
    }
    Ok(tokens)
}

/// Names of one token namespace.
#[derive(Debug, Default)]
pub struct TokenHolder {
    names: HashMap<TokenId, String>,
}

impl TokenHolder {
    /// Name for `id`, if the token exists.
    pub fn name(&self, id: TokenId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Returns true if `id` exists.
    pub fn contains(&self, id: TokenId) -> bool {
        self.names.contains_key(&id)
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true when the namespace is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// All tokens as loaded at startup.
#[derive(Debug, Default)]
pub struct TokenSet {
    labels: TokenHolder,
    property_keys: TokenHolder,
    relationship_types: TokenHolder,
    duplicates: Vec<String>,
}

impl TokenSet {
    /// Builds the holders, remembering every duplicate id or name.
    pub fn from_records(records: Vec<TokenRecord>) -> Self {
        let mut set = TokenSet::default();
        let mut seen_names: HashMap<(TokenKind, String), TokenId> = HashMap::new();
        for record in records {
            if let Some(previous) = seen_names.get(&(record.kind, record.name.clone())) {
                set.duplicates.push(format!(
                    "{} name '{}' is used by both token {} and token {}",
                    record.kind, record.name, previous, record.id
                ));
            } else {
                seen_names.insert((record.kind, record.name.clone()), record.id);
            }
            let holder = set.holder_mut(record.kind);
            if holder.names.contains_key(&record.id) {
                set.duplicates.push(format!(
                    "{} token {} is defined more than once",
                    record.kind, record.id
                ));
                continue;
            }
            set.holder_mut(record.kind).names.insert(record.id, record.name);
        }
        set
    }

    fn holder_mut(&mut self, kind: TokenKind) -> &mut TokenHolder {
        match kind {
            TokenKind::Label => &mut self.labels,
            TokenKind::PropertyKey => &mut self.property_keys,
            TokenKind::RelationshipType => &mut self.relationship_types,
        }
    }

    /// Holder for `kind`.
    pub fn holder(&self, kind: TokenKind) -> &TokenHolder {
        match kind {
            TokenKind::Label => &self.labels,
            TokenKind::PropertyKey => &self.property_keys,
            TokenKind::RelationshipType => &self.relationship_types,
        }
    }

    /// Node labels.
    pub fn labels(&self) -> &TokenHolder {
        &self.labels
    }

    /// Property keys.
    pub fn property_keys(&self) -> &TokenHolder {
        &self.property_keys
    }

    /// Relationship types.
    pub fn relationship_types(&self) -> &TokenHolder {
        &self.relationship_types
    }

    /// Descriptions of duplicate ids or names found while loading.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }
}

/// Read-only token holders, loaded from the primary store when started.
pub struct TokenHolders {
    source: Arc<PrimaryStore>,
    loaded: RwLock<Option<Arc<TokenSet>>>,
}

impl TokenHolders {
    /// Holders that will load from `source`.
    pub fn new(source: Arc<PrimaryStore>) -> Self {
        Self {
            source,
            loaded: RwLock::new(None),
        }
    }

    /// The loaded tokens; unavailable before start.
    pub fn tokens(&self) -> Result<Arc<TokenSet>> {
        self.loaded
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SombraError::Unavailable("tokens have not been loaded".into()))
    }
}

impl Lifecycle for TokenHolders {
    fn name(&self) -> &str {
        "token-holders"
    }

    fn start(&self) -> Result<()> {
        let set = TokenSet::from_records(self.source.read_tokens()?);
        debug!(
            labels = set.labels.len(),
            property_keys = set.property_keys.len(),
            relationship_types = set.relationship_types.len(),
            duplicates = set.duplicates.len(),
            "tokens.loaded"
        );
        *self.loaded.write() = Some(Arc::new(set));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.loaded.write().take();
        Ok(())
    }
}
