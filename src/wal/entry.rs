//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries, their framing, and
//! the segment header.

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::schema::SchemaDelta;
use crate::types::WireValue;

/// Magic bytes opening every segment
pub const SEGMENT_MAGIC: &[u8; 4] = b"AWAL";

/// Segment header: Magic (4) + Compression flag (1)
pub const SEGMENT_HEADER_SIZE: usize = 5;

/// Compression flag: body is a plain frame stream
pub const FLAG_PLAIN: u8 = 0;

/// Compression flag: body is one snappy raw block
pub const FLAG_SNAPPY: u8 = 1;

/// Frame header: Len (4) + CRC (4)
pub const HEADER_SIZE: usize = 8;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Global, gap-free, monotonically increasing id (assigned on append)
    pub id: u64,

    /// Table the entry belongs to
    pub table_name: String,

    /// Columns added or extended by this update
    pub schema_delta: Option<SchemaDelta>,

    /// Records to apply, columns keyed by wire index
    pub records: Vec<WireRecord>,
}

/// A record as logged: columns by wire index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub columns: Vec<WireColumn>,
}

/// One logged column; `value: None` is an explicit null
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireColumn {
    /// Column index, or -1 for the tombstone marker
    pub index: i32,
    pub value: Option<WireValue>,
}

impl WalEntry {
    /// New entry; the id is filled in by `WalManager::append`
    pub fn new(
        table_name: impl Into<String>,
        schema_delta: Option<SchemaDelta>,
        records: Vec<WireRecord>,
    ) -> Self {
        Self {
            id: 0,
            table_name: table_name.into(),
            schema_delta,
            records,
        }
    }

    /// Serialize into a complete frame: `[len][crc][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            AtlasError::validation(format!("WAL entry of {} bytes is too large", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&compute_crc(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Deserialize one complete frame
    pub fn deserialize(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_SIZE {
            return Err(AtlasError::corruption(format!(
                "frame of {} bytes is shorter than its header",
                frame.len()
            )));
        }
        let (len, crc) = parse_frame_header(&frame[..HEADER_SIZE]);
        let payload = &frame[HEADER_SIZE..];
        if payload.len() != len as usize {
            return Err(AtlasError::corruption(format!(
                "frame declares {} payload bytes, found {}",
                len,
                payload.len()
            )));
        }
        Self::decode_payload(payload, crc)
    }

    /// Check the CRC of `payload` and decode it
    pub fn decode_payload(payload: &[u8], expected_crc: u32) -> Result<Self> {
        let actual = compute_crc(payload);
        if actual != expected_crc {
            return Err(AtlasError::corruption(format!(
                "CRC mismatch: expected {:08x}, got {:08x}",
                expected_crc, actual
            )));
        }
        bincode::deserialize(payload)
            .map_err(|e| AtlasError::corruption(format!("undecodable entry: {}", e)))
    }
}

/// CRC32 of a frame payload
pub fn compute_crc(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Split a frame header into (payload length, crc)
pub(crate) fn parse_frame_header(header: &[u8]) -> (u32, u32) {
    let mut len = [0u8; 4];
    let mut crc = [0u8; 4];
    len.copy_from_slice(&header[0..4]);
    crc.copy_from_slice(&header[4..8]);
    (u32::from_le_bytes(len), u32::from_le_bytes(crc))
}

/// Segment header bytes for the given compression flag
pub fn segment_header(compressed: bool) -> [u8; SEGMENT_HEADER_SIZE] {
    let mut header = [0u8; SEGMENT_HEADER_SIZE];
    header[..4].copy_from_slice(SEGMENT_MAGIC);
    header[4] = if compressed { FLAG_SNAPPY } else { FLAG_PLAIN };
    header
}

/// Validate a segment header, returning whether the body is compressed
pub fn parse_segment_header(header: &[u8]) -> Result<bool> {
    if header.len() < SEGMENT_HEADER_SIZE {
        return Err(AtlasError::corruption(format!(
            "segment is {} bytes, shorter than its header",
            header.len()
        )));
    }
    if &header[..4] != SEGMENT_MAGIC {
        return Err(AtlasError::corruption(format!(
            "invalid segment magic: expected AWAL, got {:?}",
            &header[..4]
        )));
    }
    match header[4] {
        FLAG_PLAIN => Ok(false),
        FLAG_SNAPPY => Ok(true),
        other => Err(AtlasError::corruption(format!(
            "unknown segment compression flag {}",
            other
        ))),
    }
}

/// Build a full segment image from a plain frame stream, compressing the
/// body when asked and when it actually shrinks
pub fn encode_segment(body: &[u8], compress: bool) -> Result<Vec<u8>> {
    if compress && !body.is_empty() {
        let compressed = snap::raw::Encoder::new()
            .compress_vec(body)
            .map_err(|e| AtlasError::Serialization(format!("snappy compression failed: {}", e)))?;
        if compressed.len() < body.len() {
            let mut out = Vec::with_capacity(SEGMENT_HEADER_SIZE + compressed.len());
            out.extend_from_slice(&segment_header(true));
            out.extend_from_slice(&compressed);
            return Ok(out);
        }
    }
    let mut out = Vec::with_capacity(SEGMENT_HEADER_SIZE + body.len());
    out.extend_from_slice(&segment_header(false));
    out.extend_from_slice(body);
    Ok(out)
}

/// Inflate a snappy-compressed segment body
pub fn decompress_body(body: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(body)
        .map_err(|e| AtlasError::corruption(format!("snappy decompression failed: {}", e)))
}
