//! Durable backend: an in-memory map rebuilt from an append-only log on open.
//!
//! Every [`WriteBatch`] becomes one frame:
//! `len: u32 LE ‖ len check ‖ blake3(len ‖ payload) ‖ payload`, where the payload is the
//! JSON-encoded batch and the len check is the first four bytes of `blake3(len)`. Only a
//! frame at the end of the log with an intact header may be incomplete; it is dropped and
//! truncated on the next open. Anything else that does not verify is reported as corruption.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::store::backend::{KvBackend, WriteBatch};
use crate::store::memory::MemoryBackend;

const LEN_BYTES: usize = 4;
const LEN_CHECK_BYTES: usize = 4;
const HASH_BYTES: usize = 32;
const HEADER_BYTES: usize = LEN_BYTES + LEN_CHECK_BYTES + HASH_BYTES;
/// Largest payload a frame may declare.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
/// Entries per frame when compaction rewrites the log.
const COMPACT_FRAME_OPS: usize = 512;

#[derive(Debug)]
struct LogFile {
    file: File,
    /// Bytes of complete frames in the file.
    len: u64,
}

#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    memory: MemoryBackend,
    log: Mutex<LogFile>,
    sync_writes: bool,
}

impl FileBackend {
    /// Opens (or creates) the log at `path` and replays it.
    pub fn open(path: impl Into<PathBuf>, sync_writes: bool) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StorageError::io("creating log directory", e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io("opening grant log", e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| StorageError::io("reading grant log", e))?;

        let memory = MemoryBackend::new();
        let (valid_len, frames) = replay(&buf, &memory)?;
        if valid_len < buf.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = buf.len() - valid_len,
                "truncating incomplete frame at end of grant log"
            );
            file.set_len(valid_len as u64)
                .map_err(|e| StorageError::io("truncating grant log", e))?;
        }
        info!(path = %path.display(), frames, entries = memory.len(), "opened grant log");

        Ok(FileBackend {
            path,
            memory,
            log: Mutex::new(LogFile { file, len: valid_len as u64 }),
            sync_writes,
        })
    }

    /// Opens the log at `path` with the flush policy from `config`.
    pub fn open_with_config(path: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self, StorageError> {
        Self::open(path, config.sync_writes)
    }

    pub fn sync_writes(&self) -> bool {
        self.sync_writes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the log in bytes.
    pub fn log_len(&self) -> u64 {
        self.log.lock().len
    }

    /// Rewrites the log so it holds only the live entries, then swaps it in with a rename.
    /// Writers wait for the duration; readers do not.
    pub fn compact(&self) -> Result<(), StorageError> {
        let mut log = self.log.lock();
        let entries = self.memory.snapshot();
        let tmp_path = self.path.with_extension("compact");

        let mut out = File::create(&tmp_path).map_err(|e| StorageError::io("creating compaction file", e))?;
        let mut written = 0u64;
        for chunk in entries.chunks(COMPACT_FRAME_OPS) {
            let mut batch = WriteBatch::new();
            for (key, value) in chunk {
                batch.put(key.clone(), value.clone());
            }
            let frame = encode_frame(&batch)?;
            out.write_all(&frame)
                .map_err(|e| StorageError::io("writing compaction file", e))?;
            written += frame.len() as u64;
        }
        out.sync_all().map_err(|e| StorageError::io("syncing compaction file", e))?;
        drop(out);

        fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::io("replacing grant log", e))?;
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io("reopening grant log", e))?;
        let before = log.len;
        *log = LogFile { file, len: written };
        info!(path = %self.path.display(), before, after = written, entries = entries.len(), "compacted grant log");
        Ok(())
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.memory.get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(&batch)?;
        let mut log = self.log.lock();
        let mut result = log.file.write_all(&frame);
        if result.is_ok() && self.sync_writes {
            result = log.file.sync_data();
        }
        if let Err(e) = result {
            // Drop whatever part of the frame made it to disk so later frames stay readable.
            let len = log.len;
            if let Err(trunc) = log.file.set_len(len) {
                warn!(error = %trunc, "failed to roll back partial grant log frame");
            }
            return Err(StorageError::io("appending to grant log", e));
        }
        log.len += frame.len() as u64;
        debug!(ops = batch.len(), bytes = frame.len(), "appended grant log frame");
        // Applied under the log lock so replay order matches the order readers saw.
        self.memory.apply(batch);
        Ok(())
    }

    fn range(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.memory.range(lower, upper, limit)
    }
}

fn encode_frame(batch: &WriteBatch) -> Result<Vec<u8>, StorageError> {
    let payload = serde_json::to_vec(batch).map_err(|e| StorageError::Encoding(e.to_string()))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(StorageError::Encoding(format!("batch of {} bytes is too large", payload.len())));
    }
    let len = (payload.len() as u32).to_le_bytes();
    let mut frame = Vec::with_capacity(HEADER_BYTES + payload.len());
    frame.extend_from_slice(&len);
    frame.extend_from_slice(&len_check(&len));
    frame.extend_from_slice(frame_hash(&len, &payload).as_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn len_check(len: &[u8; LEN_BYTES]) -> [u8; LEN_CHECK_BYTES] {
    let mut out = [0u8; LEN_CHECK_BYTES];
    out.copy_from_slice(&blake3::hash(len).as_bytes()[..LEN_CHECK_BYTES]);
    out
}

fn frame_hash(len: &[u8; LEN_BYTES], payload: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(len);
    hasher.update(payload);
    hasher.finalize()
}

/// Applies every complete frame in `buf` to `memory`. Returns the byte length of the
/// complete frames and how many there were.
///
/// Stops early only for a torn tail: fewer than a header's worth of bytes, or a verified
/// header whose payload runs past the end of `buf`.
fn replay(buf: &[u8], memory: &MemoryBackend) -> Result<(usize, usize), StorageError> {
    let mut offset = 0;
    let mut frames = 0;
    while buf.len() - offset >= HEADER_BYTES {
        let header = &buf[offset..offset + HEADER_BYTES];
        let mut len_bytes = [0u8; LEN_BYTES];
        len_bytes.copy_from_slice(&header[..LEN_BYTES]);
        let (check, hash) = header[LEN_BYTES..].split_at(LEN_CHECK_BYTES);
        if check != len_check(&len_bytes) {
            return Err(StorageError::Corrupt(format!(
                "grant log frame header at offset {offset} fails its check"
            )));
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(StorageError::Corrupt(format!(
                "grant log frame at offset {offset} declares {len} bytes"
            )));
        }
        let start = offset + HEADER_BYTES;
        if buf.len() - start < len {
            break;
        }
        let payload = &buf[start..start + len];
        if frame_hash(&len_bytes, payload).as_bytes()[..] != *hash {
            return Err(StorageError::Corrupt(format!(
                "grant log checksum mismatch in frame at offset {offset}"
            )));
        }
        let batch: WriteBatch = serde_json::from_slice(payload)
            .map_err(|e| StorageError::Corrupt(format!("undecodable frame at offset {offset}: {e}")))?;
        memory.apply(batch);
        offset = start + len;
        frames += 1;
    }
    Ok((offset, frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(backend: &FileBackend, key: u8, value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.put(vec![key], value.to_vec());
        backend.write(batch).unwrap();
    }

    #[test]
    fn test_reopen_replays_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.log");
        {
            let backend = FileBackend::open(&path, true).unwrap();
            put(&backend, 1, b"a");
            put(&backend, 2, b"b");
            let mut batch = WriteBatch::new();
            batch.delete(vec![1]);
            backend.write(batch).unwrap();
        }
        let backend = FileBackend::open(&path, true).unwrap();
        assert_eq!(backend.get(&[1]).unwrap(), None);
        assert_eq!(backend.get(&[2]).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.log");
        let good_len = {
            let backend = FileBackend::open(&path, false).unwrap();
            put(&backend, 1, b"a");
            backend.log_len()
        };
        let mut frame = {
            let mut batch = WriteBatch::new();
            batch.put(vec![2], b"b".to_vec());
            encode_frame(&batch).unwrap()
        };
        frame.truncate(frame.len() - 3);
        OpenOptions::new().append(true).open(&path).unwrap().write_all(&frame).unwrap();

        let backend = FileBackend::open(&path, false).unwrap();
        assert_eq!(backend.log_len(), good_len);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(backend.get(&[1]).unwrap(), Some(b"a".to_vec()));
        assert_eq!(backend.get(&[2]).unwrap(), None);
    }

    #[test]
    fn test_flipped_payload_byte_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.log");
        {
            let backend = FileBackend::open(&path, false).unwrap();
            put(&backend, 1, b"a");
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(FileBackend::open(&path, false), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_damaged_length_mid_log_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.log");
        {
            let backend = FileBackend::open(&path, false).unwrap();
            for key in 1..=3u8 {
                put(&backend, key, b"v");
            }
        }
        let mut bytes = fs::read(&path).unwrap();
        let original_len = bytes.len() as u64;
        // High byte of the first frame's length.
        bytes[3] = 0x7f;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(FileBackend::open(&path, false), Err(StorageError::Corrupt(_))));
        assert_eq!(fs::metadata(&path).unwrap().len(), original_len);
    }

    #[test]
    fn test_oversized_declared_length_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.log");
        let len = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes();
        let mut frame = len.to_vec();
        frame.extend_from_slice(&len_check(&len));
        frame.extend_from_slice(&[0u8; HASH_BYTES]);
        fs::write(&path, &frame).unwrap();

        assert!(matches!(FileBackend::open(&path, false), Err(StorageError::Corrupt(_))));
        assert_eq!(fs::metadata(&path).unwrap().len(), frame.len() as u64);
    }

    #[test]
    fn test_open_with_config_uses_flush_policy() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig { sync_writes: false, ..StoreConfig::default() };
        let backend = FileBackend::open_with_config(dir.path().join("grants.log"), &config).unwrap();
        assert!(!backend.sync_writes());
        put(&backend, 1, b"a");
        assert_eq!(backend.get(&[1]).unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_compact_keeps_live_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grants.log");
        let backend = FileBackend::open(&path, false).unwrap();
        for round in 0..20u8 {
            put(&backend, 1, &[round]);
        }
        put(&backend, 2, b"keep");
        let before = backend.log_len();
        backend.compact().unwrap();
        assert!(backend.log_len() < before);
        put(&backend, 3, b"after");
        drop(backend);

        let reopened = FileBackend::open(&path, false).unwrap();
        assert_eq!(reopened.get(&[1]).unwrap(), Some(vec![19]));
        assert_eq!(reopened.get(&[2]).unwrap(), Some(b"keep".to_vec()));
        assert_eq!(reopened.get(&[3]).unwrap(), Some(b"after".to_vec()));
    }
}
