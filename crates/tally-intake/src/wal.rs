use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IntakeError, Result};

/// One record of the intake outbox.
///
/// On-disk framing:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized WalRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    /// An event entered the queue under `seq`.
    Enqueued { seq: u64, payload: Vec<u8> },
    /// The consumer is done with these sequence numbers.
    Acked { seqs: Vec<u64> },
}

/// When appended bytes reach the disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Flush to the OS and let it decide.
    #[default]
    OsDefault,
}

const HEADER_SIZE: u64 = 8;

struct WalWriter {
    writer: BufWriter<File>,
    offset: u64,
}

/// Append-only, CRC-checked log backing the intake queue.
///
/// Recovery reads front to back. A record whose CRC does not match is
/// skipped; a length that runs past the end of the file marks a torn tail
/// and ends recovery.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync: SyncMode,
}

impl WriteAheadLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path, sync: SyncMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                writer: BufWriter::new(file),
                offset,
            }),
            sync,
        })
    }

    /// Append one record, returning its byte offset.
    pub fn append(&self, record: &WalRecord) -> Result<u64> {
        let frame = encode_frame(record)?;
        let mut w = self.lock()?;
        let at = w.offset;

        w.writer.write_all(&frame)?;
        w.writer.flush()?;
        if self.sync == SyncMode::EveryWrite {
            w.writer.get_ref().sync_data()?;
        }
        w.offset += frame.len() as u64;

        debug!(offset = at, len = frame.len(), "wal append");
        Ok(at)
    }

    /// Every intact record, in append order.
    pub fn recover(&self) -> Result<Vec<WalRecord>> {
        // Make buffered appends visible to the reader.
        self.lock()?.writer.flush()?;
        read_records(&self.path)
    }

    /// Replace the log's contents with `records`.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new file intact.
    pub fn rewrite(&self, records: &[WalRecord]) -> Result<()> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for record in records {
                out.write_all(&encode_frame(record)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        let mut w = self.lock()?;
        w.writer.flush()?;
        fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.offset = file.metadata()?.len();
        w.writer = BufWriter::new(file);

        debug!(records = records.len(), offset = w.offset, "wal rewritten");
        Ok(())
    }

    /// Current end of the log in bytes.
    pub fn offset(&self) -> Result<u64> {
        Ok(self.lock()?.offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| IntakeError::LockPoisoned)
    }
}

fn encode_frame(record: &WalRecord) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| IntakeError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| IntakeError::Serialization(format!("record too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE as usize + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read every intact record from a log file without opening it for writing.
pub fn read_records(path: &Path) -> Result<Vec<WalRecord>> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE <= file_len {
        let mut header = [0u8; HEADER_SIZE as usize];
        match file.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE + u64::from(length) > file_len {
            warn!(offset, length, file_len, "torn wal record; stopping recovery");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload)?;
        offset += HEADER_SIZE + u64::from(length);

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "wal CRC mismatch; skipping record"
            );
            continue;
        }

        match bincode::deserialize::<WalRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => warn!(offset, error = %e, "undecodable wal record; skipping"),
        }
    }

    debug!(recovered = records.len(), "wal read complete");
    Ok(records)
}

/// Fold a record stream into the events still awaiting an ack, keyed by
/// sequence number.
pub fn pending_from(records: &[WalRecord]) -> BTreeMap<u64, Vec<u8>> {
    let mut pending = BTreeMap::new();
    for record in records {
        match record {
            WalRecord::Enqueued { seq, payload } => {
                pending.insert(*seq, payload.clone());
            }
            WalRecord::Acked { seqs } => {
                for seq in seqs {
                    pending.remove(seq);
                }
            }
        }
    }
    pending
}
