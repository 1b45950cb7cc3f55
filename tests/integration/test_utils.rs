//! Shared test utilities for integration tests
//!
//! A small voter roster, a locale tree and builders for services backed by the
//! in-memory collaborators, plus vote stores that fail or misbehave on demand.

use ballotbox::error::StorageError;
use ballotbox::namespace::{ChangeListener, NamespaceDirectory, ValueChange};
use ballotbox::resolver::BaselineValue;
use ballotbox::store::{
    AlternateRow, FlagChange, FlagRow, LockRow, MemoryBaselineStore, MemoryForumIndex,
    MemoryPathSource, MemoryVoteStore, VoteRow, VoteStore, VoteWrite,
};
use ballotbox::types::{Deadline, NamespaceId, VoterId};
use ballotbox::voter::{Level, Organization, StaticVoterSource, VoterInfo, VoterRegistry};
use ballotbox::{BallotConfig, BallotService};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PATH: &str = "//ldml/greeting";
pub const OTHER_PATH: &str = "//ldml/farewell";

pub const ADMIN: VoterId = VoterId(2);
pub const A: VoterId = VoterId(10);
pub const B: VoterId = VoterId(11);
pub const GUEST: VoterId = VoterId(30);
pub const TC1: VoterId = VoterId(20);
pub const TC2: VoterId = VoterId(21);

/// Global mutex serializing tests that touch process environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub fn roster() -> Vec<VoterInfo> {
    vec![
        VoterInfo::new(ADMIN, "admin", Organization::tc("committee"), Level::Admin),
        VoterInfo::new(A, "A", Organization::new("alpha"), Level::Vetter),
        VoterInfo::new(B, "B", Organization::new("beta"), Level::Vetter),
        VoterInfo::new(GUEST, "G", Organization::new("gamma"), Level::Guest),
        VoterInfo::new(TC1, "T1", Organization::tc("committee"), Level::Tc),
        VoterInfo::new(TC2, "T2", Organization::tc("consortium"), Level::Tc),
    ]
}

pub fn ns(id: &str) -> NamespaceId {
    NamespaceId::from(id)
}

/// Everything a test may want to poke at behind a service
pub struct Harness {
    pub service: BallotService,
    pub voters: Arc<StaticVoterSource>,
    pub baseline: Arc<MemoryBaselineStore>,
    pub paths: Arc<MemoryPathSource>,
    pub forum: Arc<MemoryForumIndex>,
    pub tree: Arc<NamespaceDirectory>,
}

pub struct HarnessBuilder {
    config: BallotConfig,
    votes: Arc<dyn VoteStore>,
    baselines: Vec<(NamespaceId, String, BaselineValue)>,
    locales: Vec<String>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: BallotConfig::default(),
            votes: Arc::new(MemoryVoteStore::new()),
            baselines: vec![(ns("fr"), PATH.to_string(), BaselineValue::new("bonjour"))],
            locales: vec!["fr".to_string(), "fr_CA".to_string(), "de".to_string()],
        }
    }

    pub fn config(mut self, config: BallotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn votes(mut self, votes: Arc<dyn VoteStore>) -> Self {
        self.votes = votes;
        self
    }

    pub fn baseline(mut self, namespace: &str, path: &str, value: &str) -> Self {
        self.baselines
            .push((ns(namespace), path.to_string(), BaselineValue::new(value)));
        self
    }

    pub fn without_baselines(mut self) -> Self {
        self.baselines.clear();
        self
    }

    pub fn build(self) -> Harness {
        let voters = Arc::new(StaticVoterSource::new(roster()));
        let baseline = Arc::new(MemoryBaselineStore::new());
        for (namespace, path, value) in self.baselines {
            baseline.insert(namespace, path, value);
        }
        let paths = Arc::new(MemoryPathSource::new([PATH, OTHER_PATH]));
        let forum = Arc::new(MemoryForumIndex::new());
        let tree = Arc::new(NamespaceDirectory::from_locales(
            self.locales,
            &self.config.voting.read_only_namespaces,
        ));
        let service = BallotService::builder(self.config)
            .tree(tree.clone())
            .baseline(baseline.clone())
            .vote_store(self.votes)
            .paths(paths.clone())
            .forum(forum.clone())
            .voters(Arc::new(VoterRegistry::load(voters.clone()).unwrap()))
            .build()
            .unwrap();
        Harness {
            service,
            voters,
            baseline,
            paths,
            forum,
            tree,
        }
    }
}

/// Default harness: `fr` carries baseline `bonjour` for [`PATH`]
pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}

/// Vote store that can be told to fail reads or writes, or to stall loads
#[derive(Default)]
pub struct FlakyVoteStore {
    pub inner: MemoryVoteStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub load_delay_ms: AtomicUsize,
    pub vote_queries: AtomicUsize,
}

impl FlakyVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_read(&self) -> Result<(), StorageError> {
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl VoteStore for FlakyVoteStore {
    fn query_votes(&self, namespace: &NamespaceId) -> Result<Vec<VoteRow>, StorageError> {
        self.vote_queries.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        self.inner.query_votes(namespace)
    }

    fn query_locks(&self, namespace: &NamespaceId) -> Result<Vec<LockRow>, StorageError> {
        self.check_read()?;
        self.inner.query_locks(namespace)
    }

    fn query_alternates(&self, namespace: &NamespaceId) -> Result<Vec<AlternateRow>, StorageError> {
        self.check_read()?;
        self.inner.query_alternates(namespace)
    }

    fn query_flags(&self) -> Result<Vec<FlagRow>, StorageError> {
        self.check_read()?;
        self.inner.query_flags()
    }

    fn persist_vote(&self, write: &VoteWrite, deadline: Deadline) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.persist_vote(write, deadline)
    }

    fn persist_flag(&self, change: &FlagChange, deadline: Deadline) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.persist_flag(change, deadline)
    }
}

/// Vote store returning fixed rows, duplicates included
pub struct FixedRowsStore {
    pub rows: Vec<VoteRow>,
}

impl VoteStore for FixedRowsStore {
    fn query_votes(&self, namespace: &NamespaceId) -> Result<Vec<VoteRow>, StorageError> {
        Ok(self
            .rows
            .iter()
            .filter(|row| &row.namespace == namespace)
            .cloned()
            .collect())
    }

    fn query_locks(&self, _namespace: &NamespaceId) -> Result<Vec<LockRow>, StorageError> {
        Ok(Vec::new())
    }

    fn query_alternates(&self, _namespace: &NamespaceId) -> Result<Vec<AlternateRow>, StorageError> {
        Ok(Vec::new())
    }

    fn query_flags(&self) -> Result<Vec<FlagRow>, StorageError> {
        Ok(Vec::new())
    }

    fn persist_vote(&self, _write: &VoteWrite, _deadline: Deadline) -> Result<(), StorageError> {
        Ok(())
    }

    fn persist_flag(&self, _change: &FlagChange, _deadline: Deadline) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Listener that records every change it sees
#[derive(Default)]
pub struct RecordingListener {
    pub changes: Mutex<Vec<ValueChange>>,
}

impl RecordingListener {
    pub fn paths(&self) -> BTreeSet<String> {
        self.changes
            .lock()
            .unwrap()
            .iter()
            .map(|change| change.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.changes.lock().unwrap().len()
    }
}

impl ChangeListener for RecordingListener {
    fn value_changed(&self, change: &ValueChange) {
        self.changes.lock().unwrap().push(change.clone());
    }
}

/// Run `f` with environment variables set, restoring them afterwards
pub fn with_env<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(key, _)| (key.to_string(), std::env::var(key).ok()))
        .collect();
    for (key, value) in vars {
        std::env::set_var(key, value);
    }

    let result = f();

    for (key, original) in saved {
        match original {
            Some(value) => std::env::set_var(&key, value),
            None => std::env::remove_var(&key),
        }
    }
    result
}
