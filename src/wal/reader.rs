//! WAL Entry Reader
//!
//! Streams entries out of an ordered list of segments.
//!
//! ## State Machine
//! ```text
//! OPEN(segment) ──► read header ──► [decompress body] ──► STREAM(frames)
//!      ▲                                                        │
//!      └───────────────── end of segment: next index ◄──────────┘
//! ```
//!
//! A bad or short header is fatal wherever it appears. A torn or corrupt
//! frame is fatal too, unless it sits in the *last* segment and the reader
//! was told to ignore the last corrupted entry; then the stream just ends.

use std::fs::File;
use std::io::{self, BufReader, Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::error::{AtlasError, Result};

use super::entry::{decompress_body, parse_frame_header, parse_segment_header};
use super::{WalEntry, HEADER_SIZE, SEGMENT_HEADER_SIZE};

/// Where segment bytes come from (local cache or object store)
pub trait SegmentSource {
    /// Open segment `index` for sequential reading
    fn open_segment(&self, index: u64) -> Result<Box<dyn Read + Send>>;
}

/// Reads segments from a local cache directory
pub struct LocalSegmentSource {
    dir: PathBuf,
    buffer_size: usize,
}

impl LocalSegmentSource {
    pub fn new(dir: &Path, buffer_size: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            buffer_size,
        }
    }
}

impl SegmentSource for LocalSegmentSource {
    fn open_segment(&self, index: u64) -> Result<Box<dyn Read + Send>> {
        let file = File::open(super::segment_path(&self.dir, index))?;
        Ok(Box::new(BufReader::with_capacity(self.buffer_size, file)))
    }
}

/// A corrupt tail that was skipped instead of failing the read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TornTail {
    /// Segment holding the torn entry
    pub segment: u64,
    /// Bytes of that segment up to and including the last good entry
    pub valid_len: u64,
}

/// Forward-only, lazy reader over a list of segments
pub struct WalEntryReader<S: SegmentSource> {
    source: S,
    indices: Vec<u64>,
    /// Position in `indices` of the open (or next) segment
    position: usize,
    current: Option<Box<dyn Read + Send>>,
    /// Bytes consumed from the current segment through the last good frame
    valid_len: u64,
    ignore_last_corrupted_entry: bool,
    torn_tail: Option<TornTail>,
    /// Entry read ahead by `has_next`
    pending: Option<Result<WalEntry>>,
    finished: bool,
}

impl<S: SegmentSource> WalEntryReader<S> {
    pub fn new(source: S, indices: Vec<u64>, ignore_last_corrupted_entry: bool) -> Self {
        Self {
            source,
            indices,
            position: 0,
            current: None,
            valid_len: 0,
            ignore_last_corrupted_entry,
            torn_tail: None,
            pending: None,
            finished: false,
        }
    }

    /// Is there another entry (or error) to take?
    pub fn has_next(&mut self) -> bool {
        if self.pending.is_none() {
            self.pending = self.read_next();
        }
        self.pending.is_some()
    }

    /// Index of the segment the cursor is in
    pub fn current_segment_index(&self) -> Option<u64> {
        self.indices.get(self.position).copied()
    }

    /// The tolerated corrupt tail, if the stream ended on one
    pub fn torn_tail(&self) -> Option<TornTail> {
        self.torn_tail
    }

    fn read_next(&mut self) -> Option<Result<WalEntry>> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    fn step(&mut self) -> Result<Option<WalEntry>> {
        loop {
            let index = match self.indices.get(self.position) {
                Some(&index) => index,
                None => return Ok(None),
            };

            if self.current.is_none() {
                self.current = Some(self.open(index)?);
                self.valid_len = SEGMENT_HEADER_SIZE as u64;
            }

            match self.read_frame() {
                Ok(Some(entry)) => return Ok(Some(entry)),
                Ok(None) => {
                    self.current = None;
                    self.position += 1;
                }
                Err(AtlasError::WalCorruption(msg)) => {
                    let is_last = self.position + 1 == self.indices.len();
                    if is_last && self.ignore_last_corrupted_entry {
                        tracing::warn!(
                            segment = index,
                            valid_len = self.valid_len,
                            "ignoring corrupted last entry: {}",
                            msg
                        );
                        self.torn_tail = Some(TornTail {
                            segment: index,
                            valid_len: self.valid_len,
                        });
                        self.current = None;
                        self.position = self.indices.len();
                        return Ok(None);
                    }
                    return Err(AtlasError::corruption(format!("segment {}: {}", index, msg)));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open a segment and position it at its first frame
    fn open(&self, index: u64) -> Result<Box<dyn Read + Send>> {
        let mut reader = self.source.open_segment(index)?;

        let mut header = [0u8; SEGMENT_HEADER_SIZE];
        let n = read_full(reader.as_mut(), &mut header)?;
        let compressed = parse_segment_header(&header[..n])
            .map_err(|e| AtlasError::corruption(format!("segment {}: {}", index, e)))?;

        if compressed {
            let mut body = Vec::new();
            reader.read_to_end(&mut body)?;
            let plain = decompress_body(&body)
                .map_err(|e| AtlasError::corruption(format!("segment {}: {}", index, e)))?;
            return Ok(Box::new(Cursor::new(plain)));
        }
        Ok(reader)
    }

    /// Read one frame; `Ok(None)` at a clean end of segment
    fn read_frame(&mut self) -> Result<Option<WalEntry>> {
        let reader = match self.current.as_mut() {
            Some(r) => r,
            None => return Ok(None),
        };

        let mut header = [0u8; HEADER_SIZE];
        let n = read_full(reader.as_mut(), &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            return Err(AtlasError::corruption(format!(
                "truncated frame header ({} of {} bytes)",
                n, HEADER_SIZE
            )));
        }

        let (len, crc) = parse_frame_header(&header);
        let mut payload = Vec::new();
        reader.as_mut().take(len as u64).read_to_end(&mut payload)?;
        if payload.len() < len as usize {
            return Err(AtlasError::corruption(format!(
                "truncated entry ({} of {} bytes)",
                payload.len(),
                len
            )));
        }

        let entry = WalEntry::decode_payload(&payload, crc)?;
        self.valid_len += (HEADER_SIZE + payload.len()) as u64;
        Ok(Some(entry))
    }
}

impl<S: SegmentSource> Iterator for WalEntryReader<S> {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.pending.take() {
            Some(item) => Some(item),
            None => self.read_next(),
        }
    }
}

/// Fill `buf` as far as the reader allows, returning the bytes read
fn read_full(reader: &mut (dyn Read + Send), buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
