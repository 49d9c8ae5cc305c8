//! Durable record directory
//!
//! Layout: `<root>/tx/<gtrid>_<bqual>.json`, one file per record.
//!
//! Each file is an envelope `{"checksum": crc32(body), "body": "<record json>"}`
//! written with the atomic pattern:
//! 1. Write a uniquely named temp file in the same directory
//! 2. fsync the temp file
//! 3. Rename over the final name
//! 4. fsync the directory
//!
//! A record file is either the old or the new version, never a torn one.
//! Removal of the file is the completion point of a transaction.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::xa::Xid;

use super::errors::{ObjectStoreError, ObjectStoreResult};
use super::record::TxLogRecord;

const RECORD_DIR: &str = "tx";
const RECORD_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: u32,
    body: String,
}

fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Replace `path` with `bytes` atomically and durably
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = parent.join(format!(".{}.{}.{}", file_name, Uuid::new_v4().simple(), TEMP_EXT));

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    // fsync the directory so the rename itself is durable
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// The coordinator's store of in-doubt transaction records
#[derive(Debug, Clone)]
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    /// Open (creating if needed) the store under `root`.
    ///
    /// Temp files left by an interrupted write are deleted.
    pub fn open(root: &Path) -> ObjectStoreResult<Self> {
        let dir = root.join(RECORD_DIR);
        fs::create_dir_all(&dir).map_err(|e| {
            ObjectStoreError::io(format!("cannot create {}", dir.display()), e)
        })?;

        let store = Self { dir };
        for entry in store.entries()? {
            if entry.extension().and_then(|e| e.to_str()) == Some(TEMP_EXT) {
                let _ = fs::remove_file(&entry);
            }
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, xid: &Xid) -> PathBuf {
        self.dir.join(format!("{}.{}", xid.file_stem(), RECORD_EXT))
    }

    fn entries(&self) -> ObjectStoreResult<Vec<PathBuf>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|e| {
            ObjectStoreError::io(format!("cannot list {}", self.dir.display()), e)
        })?;

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                ObjectStoreError::io(format!("cannot list {}", self.dir.display()), e)
            })?;
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    /// Write or replace the record for `record.xid`
    pub fn write(&self, record: &TxLogRecord) -> ObjectStoreResult<()> {
        let body = serde_json::to_string(record)
            .map_err(|e| ObjectStoreError::serialization(e.to_string()))?;
        let envelope = Envelope {
            checksum: compute_checksum(body.as_bytes()),
            body,
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| ObjectStoreError::serialization(e.to_string()))?;

        let path = self.path_for(&record.xid);
        write_file_atomic(&path, &bytes)
            .map_err(|e| ObjectStoreError::io(format!("cannot write {}", path.display()), e))
    }

    /// Read the record for `xid`, `None` if there is none
    pub fn read(&self, xid: &Xid) -> ObjectStoreResult<Option<TxLogRecord>> {
        self.read_path(&self.path_for(xid))
    }

    fn read_path(&self, path: &Path) -> ObjectStoreResult<Option<TxLogRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ObjectStoreError::io(
                    format!("cannot read {}", path.display()),
                    e,
                ))
            }
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| ObjectStoreError::corrupt(path, e.to_string()))?;
        if compute_checksum(envelope.body.as_bytes()) != envelope.checksum {
            return Err(ObjectStoreError::corrupt(path, "checksum mismatch"));
        }
        let record = serde_json::from_str(&envelope.body)
            .map_err(|e| ObjectStoreError::corrupt(path, e.to_string()))?;
        Ok(Some(record))
    }

    /// Remove the record. Returns false if it was already gone, which
    /// means someone else completed the transaction.
    pub fn remove(&self, xid: &Xid) -> ObjectStoreResult<bool> {
        let path = self.path_for(xid);
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Ok(dir) = File::open(&self.dir) {
                    let _ = dir.sync_all();
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ObjectStoreError::io(
                format!("cannot remove {}", path.display()),
                e,
            )),
        }
    }

    /// All records, ordered by creation time.
    ///
    /// Records removed while listing are skipped.
    pub fn list(&self) -> ObjectStoreResult<Vec<TxLogRecord>> {
        let mut records = Vec::new();
        for path in self.entries()? {
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(record) = self.read_path(&path)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    pub fn is_empty(&self) -> ObjectStoreResult<bool> {
        Ok(self
            .entries()?
            .iter()
            .all(|p| p.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT)))
    }

    /// Every participant branch referenced by any record
    pub fn referenced_branches(&self) -> ObjectStoreResult<HashSet<Xid>> {
        Ok(self
            .list()?
            .into_iter()
            .flat_map(|r| r.participants.into_iter().map(|p| p.branch))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::record::{ParticipantRecord, RecordState};
    use tempfile::TempDir;

    fn sample(node: &str) -> TxLogRecord {
        let xid = Xid::new_global(node);
        let branch = xid.branch(node);
        TxLogRecord::new(
            xid,
            RecordState::Committing,
            vec![ParticipantRecord::pending("db", branch, false)],
        )
    }

    #[test]
    fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        assert!(store.is_empty().unwrap());

        let record = sample("n1");
        store.write(&record).unwrap();
        assert!(!store.is_empty().unwrap());
        assert_eq!(store.read(&record.xid).unwrap(), Some(record.clone()));

        assert!(store.remove(&record.xid).unwrap());
        assert!(!store.remove(&record.xid).unwrap());
        assert_eq!(store.read(&record.xid).unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_rewrite_replaces_record() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        let mut record = sample("n1");
        store.write(&record).unwrap();
        record.state = RecordState::Heuristic;
        store.write(&record).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, RecordState::Heuristic);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let record = sample("n1");
        store.write(&record).unwrap();

        let path = store.path_for(&record.xid);
        let content = fs::read_to_string(&path).unwrap();
        let mut envelope: Envelope = serde_json::from_str(&content).unwrap();
        envelope.body = envelope.body.replace("committing", "heuristic");
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let err = store.read(&record.xid).unwrap_err();
        assert_eq!(err.code(), crate::objectstore::ObjectStoreErrorCode::Corrupt);
    }

    #[test]
    fn test_open_removes_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let stale = store.dir().join(".x.json.abc.tmp");
        fs::write(&stale, b"partial").unwrap();

        let store = ObjectStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_referenced_branches() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let a = sample("n1");
        let b = sample("n1");
        store.write(&a).unwrap();
        store.write(&b).unwrap();

        let refs = store.referenced_branches().unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&a.participants[0].branch));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let record = sample("n1");
        {
            let store = ObjectStore::open(dir.path()).unwrap();
            store.write(&record).unwrap();
        }
        let store = ObjectStore::open(dir.path()).unwrap();
        assert_eq!(store.list().unwrap(), vec![record]);
    }
}
