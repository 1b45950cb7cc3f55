//! Persistence layer for the vote store

use crate::error::StorageError;
use crate::store::{
    check_deadline, AlternateRow, FlagChange, FlagRow, LockChange, LockRow, VoteRow, VoteStore,
    VoteWrite,
};
use crate::types::{Deadline, NamespaceId, VoterId};
use serde::de::DeserializeOwned;
use std::path::Path;

const VOTE_PREFIX: &str = "vote";
const LOCK_PREFIX: &str = "lock";
const ALT_PREFIX: &str = "alt";
const FLAG_PREFIX: &str = "flag";

/// Sled-based implementation of VoteStore
///
/// One tree, keys `<kind>\0<namespace>\0<path>[\0<suffix>]`, bincode rows.
pub struct SledVoteStore {
    db: sled::Db,
}

impl SledVoteStore {
    /// Open (or create) a store at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::Unavailable(format!("Failed to open sled database: {}", e))
        })?;
        Ok(Self { db })
    }

    /// Store that lives only as long as the process
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::Unavailable(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    fn namespace_prefix(kind: &str, namespace: &NamespaceId) -> Vec<u8> {
        format!("{}\0{}\0", kind, namespace).into_bytes()
    }

    fn path_key(kind: &str, namespace: &NamespaceId, path: &str) -> Vec<u8> {
        format!("{}\0{}\0{}", kind, namespace, path).into_bytes()
    }

    fn vote_key(namespace: &NamespaceId, path: &str, voter: VoterId) -> Vec<u8> {
        // Fixed width keeps a path's rows contiguous and ordered by voter
        format!("{}\0{}\0{}\0{:010}", VOTE_PREFIX, namespace, path, voter.0).into_bytes()
    }

    fn alternate_key(namespace: &NamespaceId, path: &str, value: &str) -> Vec<u8> {
        format!("{}\0{}\0{}\0{}", ALT_PREFIX, namespace, path, value).into_bytes()
    }

    fn scan<T: DeserializeOwned>(&self, prefix: Vec<u8>) -> Result<Vec<T>, StorageError> {
        let mut rows = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (_, value) = item
                .map_err(|e| StorageError::Unavailable(format!("Failed to iterate store: {}", e)))?;
            let row: T = bincode::deserialize(&value)
                .map_err(|e| StorageError::Corrupt(format!("Failed to deserialize row: {}", e)))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn encode<T: serde::Serialize>(row: &T) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(row)
            .map_err(|e| StorageError::Corrupt(format!("Failed to serialize row: {}", e)))
    }
}

impl VoteStore for SledVoteStore {
    fn query_votes(&self, namespace: &NamespaceId) -> Result<Vec<VoteRow>, StorageError> {
        self.scan(Self::namespace_prefix(VOTE_PREFIX, namespace))
    }

    fn query_locks(&self, namespace: &NamespaceId) -> Result<Vec<LockRow>, StorageError> {
        self.scan(Self::namespace_prefix(LOCK_PREFIX, namespace))
    }

    fn query_alternates(&self, namespace: &NamespaceId) -> Result<Vec<AlternateRow>, StorageError> {
        self.scan(Self::namespace_prefix(ALT_PREFIX, namespace))
    }

    fn query_flags(&self) -> Result<Vec<FlagRow>, StorageError> {
        self.scan(format!("{}\0", FLAG_PREFIX).into_bytes())
    }

    fn persist_vote(&self, write: &VoteWrite, deadline: Deadline) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();

        for row in &write.upserts {
            batch.insert(
                Self::vote_key(&row.namespace, &row.path, row.voter),
                Self::encode(row)?,
            );
        }
        for voter in &write.deletes {
            batch.remove(Self::vote_key(&write.namespace, &write.path, *voter));
        }
        match &write.lock {
            Some(LockChange::Set(row)) => {
                batch.insert(
                    Self::path_key(LOCK_PREFIX, &write.namespace, &write.path),
                    Self::encode(row)?,
                );
            }
            Some(LockChange::Clear) => {
                batch.remove(Self::path_key(LOCK_PREFIX, &write.namespace, &write.path));
            }
            None => {}
        }
        if let Some(alternate) = &write.alternate {
            batch.insert(
                Self::alternate_key(&write.namespace, &write.path, &alternate.value),
                Self::encode(alternate)?,
            );
        }
        if write.clear_flag {
            batch.remove(Self::path_key(FLAG_PREFIX, &write.namespace, &write.path));
        }

        check_deadline(deadline, "persist_vote")?;
        self.db
            .apply_batch(batch)
            .map_err(|e| StorageError::Unavailable(format!("Failed to apply batch: {}", e)))?;
        Ok(())
    }

    fn persist_flag(&self, change: &FlagChange, deadline: Deadline) -> Result<(), StorageError> {
        check_deadline(deadline, "persist_flag")?;
        match change {
            FlagChange::Set(row) => {
                self.db.insert(
                    Self::path_key(FLAG_PREFIX, &row.namespace, &row.path),
                    Self::encode(row)?,
                )?;
            }
            FlagChange::Clear { namespace, path } => {
                self.db.remove(Self::path_key(FLAG_PREFIX, namespace, path))?;
            }
        }
        Ok(())
    }
}
