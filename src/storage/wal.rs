//! Write-ahead log framing (spec §4.D, §6): `length(u32) | checksum(u64) |
//! payload` frames, one per committed mutation. Replay stops and truncates
//! at the first checksum mismatch or short frame.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::error::{EngineError, Result};

const FRAME_HEADER_LEN: usize = 4 + 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    Put(Entry),
    Delete(String),
}

fn checksum(payload: &[u8]) -> u64 {
    let hash = blake3::hash(payload);
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("8 bytes"))
}

/// Appends commit frames to (and replays them from) a log file. With no
/// path the log is a no-op, matching an engine run purely in memory.
pub struct Wal {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl Wal {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(EngineError::backend)?;
        Ok(Self {
            path: Some(path),
            file: Some(file),
        })
    }

    /// Appends one commit frame. Fsyncs before returning, matching spec
    /// §4.D's "durable before commit returns" guarantee.
    pub fn append(&mut self, op: &WalOp) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let payload = serde_json::to_vec(op).map_err(EngineError::backend)?;
        let sum = checksum(&payload);
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&sum.to_le_bytes());
        frame.extend_from_slice(&payload);
        file.write_all(&frame).map_err(EngineError::backend)?;
        file.sync_data().map_err(EngineError::backend)?;
        Ok(())
    }

    /// Reads every valid frame from the start of the log. On hitting a
    /// short read, a length that overruns the file, or a checksum mismatch,
    /// stops and truncates the file at that offset (the partial record is
    /// discarded, per spec §4.D recovery).
    pub fn replay(&mut self) -> Result<Vec<WalOp>> {
        let Some(path) = self.path.clone() else {
            return Ok(Vec::new());
        };
        let mut buf = Vec::new();
        {
            let mut reader = OpenOptions::new()
                .read(true)
                .open(&path)
                .map_err(EngineError::backend)?;
            reader.read_to_end(&mut buf).map_err(EngineError::backend)?;
        }

        let mut ops = Vec::new();
        let mut pos = 0usize;
        while pos + FRAME_HEADER_LEN <= buf.len() {
            let len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            let expected = u64::from_le_bytes(buf[pos + 4..pos + 12].try_into().unwrap());
            let payload_start = pos + FRAME_HEADER_LEN;
            let payload_end = payload_start + len;
            if payload_end > buf.len() {
                break;
            }
            let payload = &buf[payload_start..payload_end];
            if checksum(payload) != expected {
                break;
            }
            match serde_json::from_slice::<WalOp>(payload) {
                Ok(op) => ops.push(op),
                Err(_) => break,
            }
            pos = payload_end;
        }

        if pos < buf.len() {
            tracing::warn!(
                valid_bytes = pos,
                total_bytes = buf.len(),
                "wal recovery: truncating partial commit record tail"
            );
            if let Some(file) = self.file.as_mut() {
                file.set_len(pos as u64).map_err(EngineError::backend)?;
                file.seek(SeekFrom::End(0)).map_err(EngineError::backend)?;
            }
        }
        Ok(ops)
    }

    /// Truncates the log (spec §4.D: checkpoint truncates the log after
    /// flushing the in-memory index to the main store file).
    pub fn truncate(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.set_len(0).map_err(EngineError::backend)?;
            file.seek(SeekFrom::Start(0)).map_err(EngineError::backend)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::normalize;

    #[test]
    fn replays_committed_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut wal = Wal::open(&path).unwrap();
        let e1 = Entry::new(normalize("uid=alice,dc=example,dc=com").unwrap());
        let e2 = Entry::new(normalize("uid=bob,dc=example,dc=com").unwrap());
        wal.append(&WalOp::Put(e1.clone())).unwrap();
        wal.append(&WalOp::Put(e2.clone())).unwrap();
        wal.append(&WalOp::Delete(e1.dn.as_str().to_string())).unwrap();

        let mut reopened = Wal::open(&path).unwrap();
        let ops = reopened.replay().unwrap();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], WalOp::Put(e) if e.dn == e1.dn));
        assert!(matches!(&ops[2], WalOp::Delete(d) if d == e1.dn.as_str()));
    }

    #[test]
    fn truncates_at_first_corrupt_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut wal = Wal::open(&path).unwrap();
        let e1 = Entry::new(normalize("uid=alice,dc=example,dc=com").unwrap());
        wal.append(&WalOp::Put(e1)).unwrap();

        // Corrupt the frame by flipping a payload byte after the checksum.
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(FRAME_HEADER_LEN as u64)).unwrap();
            file.write_all(&[0xffu8]).unwrap();
        }

        let mut reopened = Wal::open(&path).unwrap();
        let ops = reopened.replay().unwrap();
        assert!(ops.is_empty());

        // Replay truncates the corrupt tail so a subsequent append starts clean.
        let e2 = Entry::new(normalize("uid=bob,dc=example,dc=com").unwrap());
        reopened.append(&WalOp::Put(e2.clone())).unwrap();
        let ops_after = Wal::open(&path).unwrap().replay().unwrap();
        assert_eq!(ops_after.len(), 1);
        assert!(matches!(&ops_after[0], WalOp::Put(e) if e.dn == e2.dn));
    }

    #[test]
    fn in_memory_wal_is_a_no_op() {
        let mut wal = Wal::in_memory();
        let e = Entry::new(normalize("uid=alice,dc=example,dc=com").unwrap());
        wal.append(&WalOp::Put(e)).unwrap();
        assert!(wal.replay().unwrap().is_empty());
    }
}
