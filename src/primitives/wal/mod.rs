#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::memory::MemoryTracker;
use crate::types::{Checksum, Crc32Fast, Result, SombraError, TxId};

const WAL_MAGIC: [u8; 4] = *b"SOMW";
const WAL_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 24;
const MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
struct FileHeader {
    start_tx: TxId,
}

impl FileHeader {
    fn encode(&self) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        buf[0..4].copy_from_slice(&WAL_MAGIC);
        buf[4..6].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&self.start_tx.0.to_be_bytes());
        let crc = compute_crc32(&[&buf[..28]]);
        buf[28..32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    fn decode(src: &[u8; FILE_HEADER_LEN]) -> Result<Self> {
        if src[0..4] != WAL_MAGIC {
            return Err(SombraError::Corruption("wal magic mismatch".into()));
        }
        let version = u16::from_be_bytes([src[4], src[5]]);
        if version != WAL_FORMAT_VERSION {
            return Err(SombraError::Corruption(format!(
                "wal format version {version} unsupported"
            )));
        }
        if src[6..8] != [0, 0] {
            return Err(SombraError::Corruption(
                "wal reserved header bytes non-zero".into(),
            ));
        }
        let stored_crc = be_u32(&src[28..32]);
        if compute_crc32(&[&src[..28]]) != stored_crc {
            return Err(SombraError::Corruption("wal header crc mismatch".into()));
        }
        Ok(Self {
            start_tx: TxId(be_u64(&src[8..16])),
        })
    }
}

#[derive(Clone, Debug)]
struct FrameHeader {
    tx_id: TxId,
    payload_len: u32,
    payload_crc32: u32,
}

impl FrameHeader {
    fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..8].copy_from_slice(&self.tx_id.0.to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.payload_crc32.to_be_bytes());
        let crc = compute_crc32(&[&buf[..20]]);
        buf[20..24].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Returns `None` for a header that fails its checksum, which marks a
    /// torn write at the tail of the log.
    fn decode(src: &[u8; FRAME_HEADER_LEN]) -> Option<Self> {
        let stored_crc = be_u32(&src[20..24]);
        if compute_crc32(&[&src[..20]]) != stored_crc {
            return None;
        }
        Some(Self {
            tx_id: TxId(be_u64(&src[0..8])),
            payload_len: be_u32(&src[8..12]),
            payload_crc32: be_u32(&src[12..16]),
        })
    }
}

/// What a scan of the log found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogTail {
    /// Transaction id the log was started at.
    pub start_tx: Option<TxId>,
    /// Number of complete, checksummed frames.
    pub frames: u64,
    /// Highest transaction id among valid frames.
    pub last_tx: Option<TxId>,
    /// Transaction ids of every valid frame, in log order.
    pub tx_ids: Vec<TxId>,
    /// Byte offset after the last valid frame.
    pub valid_up_to: u64,
    /// True when bytes after `valid_up_to` did not form a valid frame.
    pub torn_tail: bool,
}

impl LogTail {
    /// Counts frames whose transaction is newer than `last_committed`.
    pub fn unapplied_after(&self, last_committed: TxId) -> usize {
        self.tx_ids.iter().filter(|tx| **tx > last_committed).count()
    }
}

/// Reads every valid frame of the log at `path`.
///
/// Returns `Ok(None)` when no log exists. A log whose file header is damaged
/// is an error; a damaged frame simply ends the log.
pub fn scan_log(path: &Path, memory: &MemoryTracker) -> Result<Option<LogTail>> {
    let io = match StdFileIo::open_read_only(path) {
        Ok(io) => io,
        Err(SombraError::MissingFile(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    let len = io.len()?;
    if len == 0 {
        return Ok(Some(LogTail::default()));
    }
    if len < FILE_HEADER_LEN as u64 {
        return Err(SombraError::Corruption(format!(
            "wal header truncated ({len} bytes)"
        )));
    }
    let mut header = [0u8; FILE_HEADER_LEN];
    io.read_at(0, &mut header)?;
    let header = FileHeader::decode(&header)?;

    let mut tail = LogTail {
        start_tx: Some(header.start_tx),
        valid_up_to: FILE_HEADER_LEN as u64,
        ..LogTail::default()
    };
    let mut offset = FILE_HEADER_LEN as u64;
    while offset < len {
        if len - offset < FRAME_HEADER_LEN as u64 {
            tail.torn_tail = true;
            break;
        }
        let mut raw = [0u8; FRAME_HEADER_LEN];
        io.read_at(offset, &mut raw)?;
        let Some(frame) = FrameHeader::decode(&raw) else {
            tail.torn_tail = true;
            break;
        };
        let payload_start = offset + FRAME_HEADER_LEN as u64;
        if frame.payload_len > MAX_FRAME_PAYLOAD
            || len - payload_start < u64::from(frame.payload_len)
        {
            tail.torn_tail = true;
            break;
        }
        let _reservation = memory.reserve(u64::from(frame.payload_len))?;
        let mut payload = vec![0u8; frame.payload_len as usize];
        io.read_at(payload_start, &mut payload)?;
        if compute_crc32(&[&payload]) != frame.payload_crc32 {
            tail.torn_tail = true;
            break;
        }
        tail.frames += 1;
        tail.tx_ids.push(frame.tx_id);
        tail.last_tx = tail.last_tx.max(Some(frame.tx_id));
        offset = payload_start + u64::from(frame.payload_len);
        tail.valid_up_to = offset;
    }
    debug!(
        path = %path.display(),
        frames = tail.frames,
        torn_tail = tail.torn_tail,
        "wal.scanned"
    );
    Ok(Some(tail))
}

/// Appends transaction frames to a log.
///
/// Used by tooling and tests to produce logs; the checker itself only reads.
pub struct LogWriter {
    file: File,
}

impl LogWriter {
    /// Creates (or truncates) a log starting at `start_tx`.
    pub fn create(path: &Path, start_tx: TxId) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&FileHeader { start_tx }.encode())?;
        Ok(Self { file })
    }

    /// Opens an existing log and positions at its end.
    pub fn open_append(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self { file })
    }

    /// Appends one frame carrying `payload` for `tx_id`.
    pub fn append(&mut self, tx_id: TxId, payload: &[u8]) -> Result<()> {
        let payload_len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_PAYLOAD)
            .ok_or_else(|| SombraError::Invalid("wal payload too large".into()))?;
        let header = FrameHeader {
            tx_id,
            payload_len,
            payload_crc32: compute_crc32(&[payload]),
        };
        self.file.write_all(&header.encode())?;
        self.file.write_all(payload)?;
        Ok(())
    }

    /// Flushes frames to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn compute_crc32(chunks: &[&[u8]]) -> u32 {
    let mut hasher = Crc32Fast::default();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(raw)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}
