//! Persistent file-backed KV store with WAL and checkpoint support.
//!
//! Uses an in-memory BTreeMap as read cache, a write-ahead log (WAL) for durability,
//! and checkpoint files for fast recovery. Each `write_batch` is a single
//! length-prefixed WAL frame, so a batch is replayed whole or not at all.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::kvstore::{apply_ops, lock_err, map_has_prefix, scan_map, BatchOp, KvPair, KvStore, Value};

const WAL_FILENAME: &str = "wal.bin";
const CHECKPOINT_FILENAME: &str = "checkpoint.bin";

#[derive(Debug, Serialize, Deserialize, Clone)]
enum WalOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl From<BatchOp> for WalOp {
    fn from(op: BatchOp) -> Self {
        match op {
            BatchOp::Put { key, value } => WalOp::Put { key, value },
            BatchOp::Delete { key } => WalOp::Delete { key },
        }
    }
}

impl From<WalOp> for BatchOp {
    fn from(op: WalOp) -> Self {
        match op {
            WalOp::Put { key, value } => BatchOp::Put { key, value },
            WalOp::Delete { key } => BatchOp::Delete { key },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WalRecord {
    seq: u64,
    ops: Vec<WalOp>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    seq: u64,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Persistent file-backed KV store.
///
/// On open, loads the last checkpoint and replays the WAL records written after it.
pub struct PersistentKvStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    wal: Arc<Mutex<WalWriter>>,
    dir: PathBuf,
}

struct WalWriter {
    file: File,
    seq: u64,
}

impl WalWriter {
    fn new(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(WalWriter { file, seq: 0 })
    }

    fn append(&mut self, record: &WalRecord) -> std::io::Result<()> {
        let encoded = bincode::serialize(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut frame = Vec::with_capacity(encoded.len() + 4);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        self.file.write_all(&frame)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl PersistentKvStore {
    /// Opens or creates a persistent KV store in the given directory.
    ///
    /// Loads the checkpoint if available, then replays WAL records for recovery.
    /// A torn frame at the tail of the log (crash mid-append) is discarded.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let wal_path = dir.join(WAL_FILENAME);
        let checkpoint_path = dir.join(CHECKPOINT_FILENAME);

        let mut data = BTreeMap::new();
        let checkpoint_seq = load_checkpoint(&checkpoint_path, &mut data)?;
        let (last_seq, valid_len) = replay_wal(&wal_path, checkpoint_seq, &mut data)?;

        let mut wal = WalWriter::new(&wal_path)?;
        if wal.file.metadata()?.len() > valid_len {
            tracing::warn!(
                path = %wal_path.display(),
                valid_len,
                "discarding torn WAL tail"
            );
            wal.file.set_len(valid_len)?;
            wal.file.sync_all()?;
        }
        wal.seq = last_seq.max(checkpoint_seq);

        tracing::info!(
            dir = %dir.display(),
            keys = data.len(),
            seq = wal.seq,
            "opened persistent kv store"
        );

        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            wal: Arc::new(Mutex::new(wal)),
            dir: dir.to_path_buf(),
        })
    }
}

fn load_checkpoint(path: &Path, data: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut contents = Vec::new();
    File::open(path)?.read_to_end(&mut contents)?;
    if contents.is_empty() {
        return Ok(0);
    }

    let checkpoint: Checkpoint = bincode::deserialize(&contents)
        .map_err(|e| FsError::Store(format!("failed to deserialize checkpoint: {}", e)))?;
    data.extend(checkpoint.entries);
    Ok(checkpoint.seq)
}

/// Replays records newer than `after_seq`. Returns the highest sequence seen and
/// the byte length of the well-formed prefix of the log.
fn replay_wal(
    path: &Path,
    after_seq: u64,
    data: &mut BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<(u64, u64)> {
    if !path.exists() {
        return Ok((after_seq, 0));
    }

    let mut file = File::open(path)?;
    let mut max_seq = after_seq;
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(FsError::Io(e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        match file.read_exact(&mut frame) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(FsError::Io(e)),
        }

        // A frame that does not decode was cut short by a crash; stop there.
        let record: WalRecord = match bincode::deserialize(&frame) {
            Ok(record) => record,
            Err(_) => break,
        };
        valid_len += 4 + len as u64;

        if record.seq <= after_seq {
            continue;
        }
        max_seq = max_seq.max(record.seq);
        apply_ops(data, record.ops.into_iter().map(BatchOp::from).collect());
    }

    Ok((max_seq, valid_len))
}

impl KvStore for PersistentKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        let data = self.data.read().map_err(lock_err)?;
        Ok(data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let data = self.data.read().map_err(lock_err)?;
        Ok(scan_map(&data, prefix))
    }

    fn has_prefix(&self, prefix: &[u8]) -> Result<bool> {
        let data = self.data.read().map_err(lock_err)?;
        Ok(map_has_prefix(&data, prefix))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        // The WAL lock is held until the batch is applied so log order matches memory order.
        let mut wal = self.wal.lock().map_err(lock_err)?;
        let record = WalRecord {
            seq: wal.seq + 1,
            ops: ops.iter().cloned().map(WalOp::from).collect(),
        };
        wal.append(&record)?;
        wal.seq = record.seq;

        let mut data = self.data.write().map_err(lock_err)?;
        apply_ops(&mut data, ops);
        Ok(())
    }

    /// Creates a checkpoint of the current state and truncates the WAL.
    fn checkpoint(&self) -> Result<()> {
        let mut wal = self.wal.lock().map_err(lock_err)?;
        let checkpoint = {
            let data = self.data.read().map_err(lock_err)?;
            Checkpoint {
                seq: wal.seq,
                entries: data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            }
        };

        let encoded = bincode::serialize(&checkpoint)
            .map_err(|e| FsError::Store(format!("failed to serialize checkpoint: {}", e)))?;

        let checkpoint_path = self.dir.join(CHECKPOINT_FILENAME);
        let mut tmp_path = checkpoint_path.clone();
        tmp_path.set_extension("tmp");

        {
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(&encoded)?;
            tmp_file.sync_all()?;
        }
        fs::rename(&tmp_path, &checkpoint_path)?;
        wal.truncate()?;

        tracing::info!(
            seq = checkpoint.seq,
            keys = checkpoint.entries.len(),
            "kv checkpoint written"
        );
        Ok(())
    }
}
