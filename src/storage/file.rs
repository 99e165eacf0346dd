//! Durable counter store: an in-memory map backed by a snapshot and a journal.
//!
//! Every batch is appended to `counters.journal` as one checksummed record
//! before it becomes visible. A checkpoint writes the whole map to
//! `counters.snap` (through a temp file and a rename) and truncates the
//! journal. Opening the store loads the snapshot and replays every journal
//! record newer than it; a torn record at the tail is cut off.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegrankError};
use crate::segment::partition::IntervalKey;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::{CounterDelta, CounterStore};

pub const SNAPSHOT_FILE: &str = "counters.snap";
pub const SNAPSHOT_TEMP_FILE: &str = "counters.snap.tmp";
pub const JOURNAL_FILE: &str = "counters.journal";

const SNAPSHOT_MAGIC: u32 = 0x5347_5253; // "SGRS"
const SNAPSHOT_VERSION: u8 = 1;
const RECORD_HEADER_LEN: usize = 8;

pub type SeqNumber = u64;

fn default_sync_writes() -> bool {
    true
}

fn default_checkpoint_interval() -> usize {
    1024
}

/// Configuration for [`FileCounterStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCounterStoreConfig {
    pub directory: PathBuf,
    /// fsync the journal after every batch.
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
    /// Journal records between automatic checkpoints; 0 disables them.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
}

impl FileCounterStoreConfig {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        FileCounterStoreConfig {
            directory: directory.as_ref().to_path_buf(),
            sync_writes: default_sync_writes(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }

    pub fn sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }
}

/// Header fields of a counter snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub version: u8,
    pub created_at: DateTime<Utc>,
    pub last_seq: SeqNumber,
    pub entries: usize,
}

#[derive(Debug)]
struct Journal {
    file: File,
    len: u64,
    last_seq: SeqNumber,
    records_since_checkpoint: usize,
    // Set when a failed append could not be cut back off the file.
    poisoned: bool,
}

/// A counter store that survives restarts.
#[derive(Debug)]
pub struct FileCounterStore {
    config: FileCounterStoreConfig,
    counters: RwLock<AHashMap<IntervalKey, i64>>,
    // Lock order: journal, then counters.
    journal: Mutex<Journal>,
}

impl FileCounterStore {
    /// Open (or create) the store in `config.directory` and recover its state.
    pub fn open(config: FileCounterStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;
        if !config.directory.is_dir() {
            return Err(SegrankError::config(format!(
                "not a directory: {}",
                config.directory.display()
            )));
        }

        let snapshot_path = config.directory.join(SNAPSHOT_FILE);
        let (mut counters, snapshot_seq) = match read_snapshot(&snapshot_path)? {
            Some((info, entries)) => {
                log::debug!(
                    "loaded snapshot with {} counters at seq {} (written {})",
                    info.entries,
                    info.last_seq,
                    info.created_at
                );
                (entries.into_iter().collect(), info.last_seq)
            }
            None => (AHashMap::new(), 0),
        };

        let journal_path = config.directory.join(JOURNAL_FILE);
        let replay = replay_journal(&journal_path, snapshot_seq, &mut counters)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;
        if file.metadata()?.len() > replay.valid_len {
            log::warn!(
                "truncating torn journal tail at byte {} of {}",
                replay.valid_len,
                journal_path.display()
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }

        log::info!(
            "opened counter store at {}: {} counters, snapshot seq {}, {} journal records replayed",
            config.directory.display(),
            counters.len(),
            snapshot_seq,
            replay.applied
        );

        Ok(FileCounterStore {
            counters: RwLock::new(counters),
            journal: Mutex::new(Journal {
                file,
                len: replay.valid_len,
                last_seq: replay.last_seq.max(snapshot_seq),
                records_since_checkpoint: replay.records,
                poisoned: false,
            }),
            config,
        })
    }

    pub fn config(&self) -> &FileCounterStoreConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Sequence number of the last durable batch.
    pub fn last_seq(&self) -> SeqNumber {
        self.journal.lock().last_seq
    }

    /// Journal records written since the last checkpoint.
    pub fn journal_records(&self) -> usize {
        self.journal.lock().records_since_checkpoint
    }

    /// Header of the snapshot on disk, if any.
    pub fn snapshot_info(&self) -> Result<Option<SnapshotInfo>> {
        let path = self.config.directory.join(SNAPSHOT_FILE);
        Ok(read_snapshot(&path)?.map(|(info, _)| info))
    }

    /// Write the whole map to a fresh snapshot and empty the journal.
    pub fn checkpoint(&self) -> Result<()> {
        let mut journal = self.journal.lock();
        let entries: Vec<(IntervalKey, i64)> = self
            .counters
            .read()
            .iter()
            .map(|(key, count)| (*key, *count))
            .collect();
        self.write_checkpoint(&mut journal, &entries)
    }

    fn write_checkpoint(&self, journal: &mut Journal, entries: &[(IntervalKey, i64)]) -> Result<()> {
        write_snapshot(&self.config.directory, journal.last_seq, entries)?;
        journal.file.set_len(0)?;
        journal.file.sync_all()?;
        journal.len = 0;
        journal.records_since_checkpoint = 0;
        if journal.poisoned {
            log::info!("journal emptied by checkpoint; accepting batches again");
            journal.poisoned = false;
        }
        log::debug!(
            "checkpointed {} counters at seq {}",
            entries.len(),
            journal.last_seq
        );
        Ok(())
    }

    fn append_record(&self, journal: &mut Journal, seq: SeqNumber, deltas: &[CounterDelta]) -> Result<()> {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_varint(seq)?;
        writer.write_varint(deltas.len() as u64)?;
        for (key, delta) in deltas {
            writer.write_counter(key, *delta)?;
        }
        let checksum = writer.checksum();
        let payload = writer.into_inner();

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        record.write_u32::<LittleEndian>(payload.len() as u32)?;
        record.write_u32::<LittleEndian>(checksum)?;
        record.extend_from_slice(&payload);

        let written = journal.file.write_all(&record).and_then(|_| {
            if self.config.sync_writes {
                journal.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // Drop whatever part of the record reached the file.
            if let Err(truncate_err) = journal.file.set_len(journal.len) {
                log::error!(
                    "failed to roll back partial journal record, refusing further batches: {truncate_err}"
                );
                journal.poisoned = true;
            }
            return Err(e.into());
        }
        journal.len += record.len() as u64;
        Ok(())
    }
}

impl CounterStore for FileCounterStore {
    fn name(&self) -> &str {
        "file-counters"
    }

    fn apply_batch(&self, deltas: &[CounterDelta]) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let mut journal = self.journal.lock();
        if journal.poisoned {
            return Err(SegrankError::other(format!(
                "journal in {} has an unrecoverable partial record; checkpoint to recover",
                self.config.directory.display()
            )));
        }
        let seq = journal.last_seq + 1;
        self.append_record(&mut journal, seq, deltas)?;
        journal.last_seq = seq;
        journal.records_since_checkpoint += 1;

        {
            let mut counters = self.counters.write();
            for (key, delta) in deltas {
                *counters.entry(*key).or_insert(0) += delta;
            }
        }

        let interval = self.config.checkpoint_interval;
        if interval > 0 && journal.records_since_checkpoint >= interval {
            let entries: Vec<(IntervalKey, i64)> = self
                .counters
                .read()
                .iter()
                .map(|(key, count)| (*key, *count))
                .collect();
            // The batch is already durable in the journal.
            if let Err(e) = self.write_checkpoint(&mut journal, &entries) {
                log::warn!("automatic checkpoint failed: {e}");
            }
        }
        Ok(())
    }

    fn get(&self, key: &IntervalKey) -> Result<i64> {
        Ok(self.counters.read().get(key).copied().unwrap_or(0))
    }

    fn get_many(&self, keys: &[IntervalKey]) -> Result<Vec<i64>> {
        let counters = self.counters.read();
        Ok(keys
            .iter()
            .map(|key| counters.get(key).copied().unwrap_or(0))
            .collect())
    }

    fn entries(&self) -> Result<Vec<(IntervalKey, i64)>> {
        Ok(self
            .counters
            .read()
            .iter()
            .map(|(key, count)| (*key, *count))
            .collect())
    }

    fn replace_all(&self, entries: Vec<(IntervalKey, i64)>) -> Result<()> {
        let mut journal = self.journal.lock();
        journal.last_seq += 1;
        self.write_checkpoint(&mut journal, &entries)?;
        *self.counters.write() = entries.into_iter().collect();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.counters.read().len())
    }

    fn sync(&self) -> Result<()> {
        self.journal.lock().file.sync_data()?;
        Ok(())
    }
}

struct Replay {
    valid_len: u64,
    last_seq: SeqNumber,
    records: usize,
    applied: usize,
}

fn replay_journal(
    path: &Path,
    after_seq: SeqNumber,
    counters: &mut AHashMap<IntervalKey, i64>,
) -> Result<Replay> {
    let mut replay = Replay {
        valid_len: 0,
        last_seq: after_seq,
        records: 0,
        applied: 0,
    };
    if !path.exists() {
        return Ok(replay);
    }

    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut offset = 0usize;
    while offset < bytes.len() {
        let Some(header) = bytes.get(offset..offset + RECORD_HEADER_LEN) else {
            break;
        };
        let mut header = Cursor::new(header);
        let len = header.read_u32::<LittleEndian>()? as usize;
        let checksum = header.read_u32::<LittleEndian>()?;

        let start = offset + RECORD_HEADER_LEN;
        let Some(payload) = bytes.get(start..start + len) else {
            break;
        };
        if crc32fast::hash(payload) != checksum {
            log::warn!("journal record at byte {offset} fails its checksum");
            break;
        }

        let (seq, deltas) = decode_record(payload)?;
        if seq > after_seq {
            for (key, delta) in deltas {
                *counters.entry(key).or_insert(0) += delta;
            }
            replay.applied += 1;
        }
        replay.last_seq = replay.last_seq.max(seq);
        replay.records += 1;
        offset = start + len;
    }

    replay.valid_len = offset as u64;
    Ok(replay)
}

fn decode_record(payload: &[u8]) -> Result<(SeqNumber, Vec<CounterDelta>)> {
    let mut reader = StructReader::new(payload);
    let seq = reader.read_varint()?;
    let count = reader.read_varint()? as usize;
    let mut deltas = Vec::with_capacity(count.min(payload.len()));
    for _ in 0..count {
        deltas.push(reader.read_counter()?);
    }
    Ok((seq, deltas))
}

fn write_snapshot(directory: &Path, last_seq: SeqNumber, entries: &[(IntervalKey, i64)]) -> Result<()> {
    let temp_path = directory.join(SNAPSHOT_TEMP_FILE);
    let file = File::create(&temp_path)?;

    let mut writer = StructWriter::new(BufWriter::new(file));
    writer.write_u32(SNAPSHOT_MAGIC)?;
    writer.write_u8(SNAPSHOT_VERSION)?;
    writer.write_i64(Utc::now().timestamp_millis())?;
    writer.write_varint(last_seq)?;
    writer.write_varint(entries.len() as u64)?;
    for (key, count) in entries {
        writer.write_counter(key, *count)?;
    }
    let file = writer.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    fs::rename(&temp_path, directory.join(SNAPSHOT_FILE))?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<Option<(SnapshotInfo, Vec<(IntervalKey, i64)>)>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let mut reader = StructReader::new(Cursor::new(bytes));

    let magic = reader.read_u32()?;
    if magic != SNAPSHOT_MAGIC {
        return Err(SegrankError::codec(format!(
            "{} is not a counter snapshot",
            path.display()
        )));
    }
    let version = reader.read_u8()?;
    if version != SNAPSHOT_VERSION {
        return Err(SegrankError::codec(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let created_millis = reader.read_i64()?;
    let last_seq = reader.read_varint()?;
    let count = reader.read_varint()? as usize;

    let mut entries = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        entries.push(reader.read_counter()?);
    }
    reader.verify_checksum()?;

    let created_at = Utc
        .timestamp_millis_opt(created_millis)
        .single()
        .unwrap_or_default();
    let info = SnapshotInfo {
        version,
        created_at,
        last_seq,
        entries: entries.len(),
    };
    Ok(Some((info, entries)))
}
