//! Durable ledger log.
//!
//! # File Format
//! ```text
//! [Header: 16 bytes][Frame][Frame][Frame]...
//! ```
//!
//! Header: magic `RPLG`, version u32 (1), reserved u64 (0).
//!
//! Frame: `[seq:8][type:2][len:4][crc64:8][payload:len]`, little endian. The
//! checksum covers seq, type, len and payload.
//!
//! A torn final frame (crash mid-append) is dropped on open. A bad frame
//! anywhere else is corruption and opening fails.

use crate::error::{PersistenceError, Result};
use crc64fast::Digest;
use replica_kernel::types::{EntryType, LedgerEntry, SeqNo};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: [u8; 4] = *b"RPLG";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub seq_no: u64,
    pub entry_type: u16,
    pub payload_len: u32,
    pub checksum: u64,
}

impl FrameHeader {
    pub const SIZE: usize = 8 + 2 + 4 + 8; // 22 bytes

    pub fn for_entry(entry: &LedgerEntry) -> Self {
        let entry_type = entry.entry_type.code();
        let payload_len = entry.payload.len() as u32;
        Self {
            seq_no: entry.seq_no,
            entry_type,
            payload_len,
            checksum: frame_checksum(entry.seq_no, entry_type, payload_len, &entry.payload),
        }
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            seq_no: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            entry_type: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            payload_len: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
            checksum: u64::from_le_bytes(buf[14..22].try_into().unwrap()),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.seq_no.to_le_bytes());
        buf[8..10].copy_from_slice(&self.entry_type.to_le_bytes());
        buf[10..14].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[14..22].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }
}

fn frame_checksum(seq_no: u64, entry_type: u16, payload_len: u32, payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&seq_no.to_le_bytes());
    digest.write(&entry_type.to_le_bytes());
    digest.write(&payload_len.to_le_bytes());
    digest.write(payload);
    digest.sum64()
}

fn header_bytes() -> [u8; HEADER_SIZE as usize] {
    let mut buf = [0u8; HEADER_SIZE as usize];
    buf[0..4].copy_from_slice(&MAGIC);
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf
}

fn validate_header(buf: &[u8]) -> Result<()> {
    if buf.len() < HEADER_SIZE as usize {
        return Err(PersistenceError::InvalidFormat("ledger file shorter than header".into()));
    }
    if buf[0..4] != MAGIC {
        return Err(PersistenceError::InvalidMagic);
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(PersistenceError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Result of scanning a ledger file.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub entries: Vec<LedgerEntry>,
    /// End offset of every good frame, in order.
    pub frame_ends: Vec<u64>,
    /// Bytes after the last good frame that were ignored.
    pub torn_tail: u64,
}

/// Decode every frame of an in-memory ledger file.
pub fn scan_bytes(buf: &[u8]) -> Result<Scan> {
    validate_header(buf)?;

    let mut scan = Scan::default();
    let mut offset = HEADER_SIZE as usize;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < FrameHeader::SIZE {
            scan.torn_tail = remaining as u64;
            break;
        }

        let header = FrameHeader::from_bytes(buf[offset..offset + FrameHeader::SIZE].try_into().unwrap());
        let body_start = offset + FrameHeader::SIZE;
        let body_end = body_start + header.payload_len as usize;
        if body_end > buf.len() {
            scan.torn_tail = remaining as u64;
            break;
        }

        let payload = &buf[body_start..body_end];
        let found = frame_checksum(header.seq_no, header.entry_type, header.payload_len, payload);
        if found != header.checksum {
            if body_end == buf.len() {
                // Last frame, payload partially written before a crash.
                scan.torn_tail = remaining as u64;
                break;
            }
            return Err(PersistenceError::Corrupted {
                offset: offset as u64,
                reason: format!("checksum mismatch: expected {}, found {}", header.checksum, found),
            });
        }

        let expected = scan.entries.len() as u64 + 1;
        if header.seq_no != expected {
            return Err(PersistenceError::Corrupted {
                offset: offset as u64,
                reason: format!("expected seq {}, found {}", expected, header.seq_no),
            });
        }

        scan.entries.push(LedgerEntry::new(
            header.seq_no,
            EntryType::from_code(header.entry_type),
            payload.to_vec(),
        ));
        scan.frame_ends.push(body_end as u64);
        offset = body_end;
    }

    Ok(scan)
}

/// Read a ledger file without opening it for writing.
pub fn read_entries(path: impl AsRef<Path>) -> Result<Scan> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    scan_bytes(&buf)
}

/// Append-only ledger file writer.
///
/// Every append is fsync'd before returning.
pub struct LedgerFile {
    path: PathBuf,
    file: File,
    frame_ends: Vec<u64>,
    /// Next write stops after this many bytes and fails.
    #[cfg(test)]
    short_write: Option<usize>,
}

impl LedgerFile {
    /// Open or create a ledger file, returning the entries already in it.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<LedgerEntry>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let scan = if buf.is_empty() {
            file.write_all(&header_bytes())?;
            file.sync_all()?;
            Scan::default()
        } else {
            scan_bytes(&buf)?
        };

        if scan.torn_tail > 0 {
            let good = scan.frame_ends.last().copied().unwrap_or(HEADER_SIZE);
            tracing::warn!(
                "Dropping {} torn bytes at end of {:?} (keeping {} entries)",
                scan.torn_tail,
                path,
                scan.entries.len()
            );
            file.set_len(good)?;
            file.sync_all()?;
        }

        Ok((
            Self {
                path,
                file,
                frame_ends: scan.frame_ends,
                #[cfg(test)]
                short_write: None,
            },
            scan.entries,
        ))
    }

    /// Number of entries on disk.
    pub fn len(&self) -> SeqNo {
        self.frame_ends.len() as SeqNo
    }

    pub fn is_empty(&self) -> bool {
        self.frame_ends.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries that directly follow what is on disk, with one fsync.
    pub fn append_batch(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut expected = self.len() + 1;
        let start = self.frame_ends.last().copied().unwrap_or(HEADER_SIZE);
        let mut end = start;
        let mut buf = Vec::new();
        let mut ends = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.seq_no != expected {
                return Err(PersistenceError::InvalidFormat(format!(
                    "append out of order: expected seq {}, got {}",
                    expected, entry.seq_no
                )));
            }
            buf.extend_from_slice(&FrameHeader::for_entry(entry).to_bytes());
            buf.extend_from_slice(&entry.payload);
            end += (FrameHeader::SIZE + entry.payload.len()) as u64;
            ends.push(end);
            expected += 1;
        }

        if let Err(e) = self.write_frames(&buf) {
            // Cut any partial frame so later appends stay contiguous.
            if let Err(undo) = self.file.set_len(start).and_then(|_| self.file.sync_all()) {
                tracing::error!("Could not roll {:?} back to {} bytes: {}", self.path, start, undo);
            }
            return Err(e.into());
        }
        self.frame_ends.extend(ends);
        Ok(())
    }

    fn write_frames(&mut self, buf: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        let buf = match self.short_write.take() {
            Some(limit) => {
                self.file.write_all(&buf[..limit.min(buf.len())])?;
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"));
            }
            None => buf,
        };
        self.file.write_all(buf)?;
        self.file.sync_data()
    }

    pub fn append(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.append_batch(std::slice::from_ref(entry))
    }

    /// Keep the first `len` entries, discard the rest.
    pub fn truncate(&mut self, len: SeqNo) -> Result<()> {
        let len = len.min(self.len()) as usize;
        let end = if len == 0 { HEADER_SIZE } else { self.frame_ends[len - 1] };
        self.file.set_len(end)?;
        self.file.sync_all()?;
        self.frame_ends.truncate(len);
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
