//! Projection snapshots.
//!
//! ```text
//! [magic:4 "RPSN"][version:4][applied_seq:8][ledger_root:32][body_len:8][crc64:8][body]
//! ```
//!
//! The body is the bincode encoding of a `ProjectionStore`. `ledger_root` is
//! the ledger root at `applied_seq`, so a loader can tell whether the snapshot
//! still belongs to the ledger next to it.

use crate::error::{PersistenceError, Result};
use crc64fast::Digest;
use replica_kernel::projection::ProjectionStore;
use replica_kernel::types::{Hash32, SeqNo};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub applied_seq: SeqNo,
    pub ledger_root: Hash32,
    pub body_len: u64,
    pub checksum: u64,
}

impl SnapshotHeader {
    pub const SIZE: usize = 4 + 4 + 8 + 32 + 8 + 8; // 64 bytes
    pub const MAGIC: [u8; 4] = *b"RPSN";
    pub const VERSION: u32 = 1;

    pub fn new(applied_seq: SeqNo, ledger_root: Hash32, body: &[u8]) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            applied_seq,
            ledger_root,
            body_len: body.len() as u64,
            checksum: body_checksum(body),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.applied_seq.to_le_bytes());
        buf[16..48].copy_from_slice(&self.ledger_root);
        buf[48..56].copy_from_slice(&self.body_len.to_le_bytes());
        buf[56..64].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != Self::MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }

        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != Self::VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }

        Ok(Self {
            magic,
            version,
            applied_seq: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            ledger_root: buf[16..48].try_into().unwrap(),
            body_len: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
            checksum: u64::from_le_bytes(buf[56..64].try_into().unwrap()),
        })
    }
}

fn body_checksum(body: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(body);
    digest.sum64()
}

/// A loaded snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub ledger_root: Hash32,
    pub store: ProjectionStore,
}

/// Write the store atomically: temp file, fsync, rename.
pub fn save(path: impl AsRef<Path>, store: &ProjectionStore, ledger_root: Hash32) -> Result<()> {
    let path = path.as_ref();
    let body = bincode::serde::encode_to_vec(store, bincode::config::standard())
        .map_err(|e| PersistenceError::InvalidFormat(format!("snapshot encode: {}", e)))?;
    let header = SnapshotHeader::new(store.applied_seq(), ledger_root, &body);

    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    tracing::debug!(
        "Saved projection snapshot at seq {} ({} bytes) to {:?}",
        store.applied_seq(),
        body.len(),
        path
    );
    Ok(())
}

/// Load a snapshot. `Ok(None)` if there is none.
pub fn load(path: impl AsRef<Path>) -> Result<Option<Snapshot>> {
    let mut file = match File::open(path.as_ref()) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let header = SnapshotHeader::read_from(&mut file)?;
    let mut body = Vec::new();
    file.read_to_end(&mut body)?;

    if body.len() as u64 != header.body_len {
        return Err(PersistenceError::InvalidFormat(format!(
            "snapshot body is {} bytes, header says {}",
            body.len(),
            header.body_len
        )));
    }
    let found = body_checksum(&body);
    if found != header.checksum {
        return Err(PersistenceError::ChecksumMismatch {
            expected: header.checksum,
            found,
        });
    }

    let (store, _): (ProjectionStore, usize) =
        bincode::serde::decode_from_slice(&body, bincode::config::standard())
            .map_err(|e| PersistenceError::InvalidFormat(format!("snapshot decode: {}", e)))?;

    if store.applied_seq() != header.applied_seq {
        return Err(PersistenceError::InvalidFormat(format!(
            "snapshot header seq {} does not match body seq {}",
            header.applied_seq,
            store.applied_seq()
        )));
    }

    Ok(Some(Snapshot {
        ledger_root: header.ledger_root,
        store,
    }))
}

/// Delete a snapshot if present.
pub fn remove(path: impl AsRef<Path>) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_kernel::fixtures::sample_ledger;
    use replica_kernel::replay::rebuild_full;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_header_serialization() {
        let header = SnapshotHeader::new(100, [0xAA; 32], b"body");
        let bytes = header.to_bytes();

        let mut reader = &bytes[..];
        let decoded = SnapshotHeader::read_from(&mut reader).unwrap();

        assert_eq!(header, decoded);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = [0u8; SnapshotHeader::SIZE];
        bytes[0..4].copy_from_slice(b"BADM");
        let mut reader = &bytes[..];
        let result = SnapshotHeader::read_from(&mut reader);
        assert!(matches!(result, Err(PersistenceError::InvalidMagic)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("projection.snap");
        let ledger = sample_ledger(40);
        let store = rebuild_full(&ledger).unwrap();

        save(&path, &store, ledger.root()).unwrap();
        let loaded = load(&path).unwrap().unwrap();

        assert_eq!(loaded.ledger_root, ledger.root());
        assert_eq!(loaded.store, store);
        assert_eq!(loaded.store.digests(), store.digests());
    }

    #[test]
    fn test_missing_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("projection.snap");
        assert!(load(&path).unwrap().is_none());
        remove(&path).unwrap();
    }

    #[test]
    fn test_corrupted_body_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("projection.snap");
        let ledger = sample_ledger(10);
        save(&path, &rebuild_full(&ledger).unwrap(), ledger.root()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(load(&path), Err(PersistenceError::ChecksumMismatch { .. })));
    }
}
