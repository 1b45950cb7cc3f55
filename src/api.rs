//! Ballot Service
//!
//! Facade over the namespace cache: every operation takes a namespace id,
//! finds (or constructs) the working set and forwards the call.

use crate::cache::NamespaceCache;
use crate::concurrency::NamespaceLockManager;
use crate::config::BallotConfig;
use crate::error::BallotError;
use crate::lock::PermanentLockTable;
use crate::namespace::{
    ChangeListener, FlagTable, ListenerSet, NamespaceContext, NamespaceDirectory, NamespaceState,
    NamespaceTree, NamespaceWorkingSet, StampRegistry, VoteOutcome,
};
use crate::path::PathRegistry;
use crate::resolver::{ConsensusResolver, ResolvedValue};
use crate::store::{
    BaselineStore, ForumIndex, MemoryBaselineStore, MemoryForumIndex, PathSource, SledVoteStore,
    VoteStore,
};
use crate::types::{Deadline, NamespaceId, VoteKind, VoterId};
use crate::voter::VoterDirectory;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// A vote as submitted by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub namespace: NamespaceId,
    pub voter: VoterId,
    pub path: String,
    /// `None` withdraws the voter's vote
    pub value: Option<String>,
    pub override_weight: Option<u32>,
    pub kind: VoteKind,
}

impl VoteRequest {
    pub fn new(
        namespace: impl Into<NamespaceId>,
        voter: VoterId,
        path: impl Into<String>,
        value: Option<&str>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            voter,
            path: path.into(),
            value: value.map(str::to_string),
            override_weight: None,
            kind: VoteKind::Direct,
        }
    }

    pub fn with_override(mut self, weight: u32) -> Self {
        self.override_weight = Some(weight);
        self
    }

    pub fn with_kind(mut self, kind: VoteKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Ballot service
///
/// Cheap to clone; clones share the cache and every collaborator.
#[derive(Clone)]
pub struct BallotService {
    cache: NamespaceCache,
    config: Arc<BallotConfig>,
}

impl BallotService {
    pub fn builder(config: BallotConfig) -> BallotServiceBuilder {
        BallotServiceBuilder::new(config)
    }

    pub fn config(&self) -> &BallotConfig {
        &self.config
    }

    pub fn cache(&self) -> &NamespaceCache {
        &self.cache
    }

    /// Working set for a namespace, loading it if needed
    pub fn namespace(&self, id: &NamespaceId) -> Result<Arc<NamespaceWorkingSet>, BallotError> {
        self.cache.get(id)
    }

    /// Cast, replace or withdraw a vote
    pub fn vote(&self, request: &VoteRequest, deadline: Deadline) -> Result<VoteOutcome, BallotError> {
        let set = self.cache.get(&request.namespace)?;
        let result = set.vote_for(
            request.voter,
            &request.path,
            request.value.as_deref(),
            request.override_weight,
            request.kind,
            deadline,
        );
        self.evict_if_poisoned(&request.namespace, result)
    }

    pub fn unvote(
        &self,
        namespace: &NamespaceId,
        voter: VoterId,
        path: &str,
        deadline: Deadline,
    ) -> Result<VoteOutcome, BallotError> {
        let set = self.cache.get(namespace)?;
        self.evict_if_poisoned(namespace, set.unvote_for(voter, path, deadline))
    }

    /// Re-cast the voter's current value without its override
    pub fn revote(
        &self,
        namespace: &NamespaceId,
        voter: VoterId,
        path: &str,
        deadline: Deadline,
    ) -> Result<VoteOutcome, BallotError> {
        let set = self.cache.get(namespace)?;
        self.evict_if_poisoned(namespace, set.revote_for(voter, path, deadline))
    }

    /// Full resolution: value, source, status and tally
    pub fn resolve(&self, namespace: &NamespaceId, path: &str) -> Result<ResolvedValue, BallotError> {
        let set = self.cache.get(namespace)?;
        self.evict_if_poisoned(namespace, set.get_resolver(path))
    }

    /// Winning value with inheritance applied
    pub fn winning_value(
        &self,
        namespace: &NamespaceId,
        path: &str,
    ) -> Result<Option<String>, BallotError> {
        Ok(self
            .resolve(namespace, path)?
            .effective_value()
            .map(str::to_string))
    }

    /// Distinct candidate values for a path
    pub fn values(
        &self,
        namespace: &NamespaceId,
        path: &str,
    ) -> Result<Option<BTreeSet<String>>, BallotError> {
        let set = self.cache.get(namespace)?;
        self.evict_if_poisoned(namespace, set.get_values(path))
    }

    pub fn flag(
        &self,
        namespace: &NamespaceId,
        path: &str,
        voter: VoterId,
        deadline: Deadline,
    ) -> Result<bool, BallotError> {
        let set = self.cache.get(namespace)?;
        self.evict_if_poisoned(namespace, set.flag_for_review(path, voter, deadline))
    }

    pub fn unflag(
        &self,
        namespace: &NamespaceId,
        path: &str,
        voter: VoterId,
        deadline: Deadline,
    ) -> Result<bool, BallotError> {
        let set = self.cache.get(namespace)?;
        self.evict_if_poisoned(namespace, set.clear_flag(path, voter, deadline))
    }

    pub fn is_flagged(&self, namespace: &NamespaceId, path: &str) -> Result<bool, BallotError> {
        let set = self.cache.get(namespace)?;
        let result = set.ensure_healthy().map(|()| set.is_flagged(path));
        self.evict_if_poisoned(namespace, result)
    }

    /// Change stamp, loading the namespace if it is not resident
    pub fn stamp(&self, namespace: &NamespaceId) -> Result<u64, BallotError> {
        Ok(self.cache.get(namespace)?.stamp())
    }

    pub fn residency(&self, namespace: &NamespaceId) -> NamespaceState {
        self.cache.residency(namespace)
    }

    /// Locked paths of a namespace, sorted
    pub fn locked_paths(&self, namespace: &NamespaceId) -> Result<Vec<String>, BallotError> {
        self.cache.get(namespace)?;
        let ctx = self.cache.context();
        let mut paths = ctx
            .locks
            .locked_paths(namespace)
            .into_iter()
            .map(|id| ctx.registry.path_for(id).map(|path| path.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        paths.sort();
        Ok(paths)
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.cache.context().listeners.add(listener);
    }

    /// Reload the voter directory
    pub fn refresh_voters(&self) -> Result<(), BallotError> {
        self.cache.context().voters.refresh()
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    fn evict_if_poisoned<T>(
        &self,
        namespace: &NamespaceId,
        result: Result<T, BallotError>,
    ) -> Result<T, BallotError> {
        if let Err(BallotError::InternalInconsistency { detail, .. }) = &result {
            warn!(namespace = %namespace, detail = %detail, "Evicting inconsistent namespace");
            self.cache.invalidate(namespace);
        }
        result
    }
}

/// Assembles a [`BallotService`] from configuration and collaborators
///
/// The valid-path source and the voter directory are required. The namespace
/// tree defaults to a root-only tree, the baseline and forum to empty memory
/// stores, and the vote store to a sled database at `store.path`.
pub struct BallotServiceBuilder {
    config: BallotConfig,
    tree: Option<Arc<dyn NamespaceTree>>,
    baseline: Option<Arc<dyn BaselineStore>>,
    votes: Option<Arc<dyn VoteStore>>,
    paths: Option<Arc<dyn PathSource>>,
    forum: Option<Arc<dyn ForumIndex>>,
    voters: Option<Arc<dyn VoterDirectory>>,
}

impl BallotServiceBuilder {
    pub fn new(config: BallotConfig) -> Self {
        Self {
            config,
            tree: None,
            baseline: None,
            votes: None,
            paths: None,
            forum: None,
            voters: None,
        }
    }

    pub fn tree(mut self, tree: Arc<dyn NamespaceTree>) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn baseline(mut self, baseline: Arc<dyn BaselineStore>) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn vote_store(mut self, votes: Arc<dyn VoteStore>) -> Self {
        self.votes = Some(votes);
        self
    }

    pub fn paths(mut self, paths: Arc<dyn PathSource>) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn forum(mut self, forum: Arc<dyn ForumIndex>) -> Self {
        self.forum = Some(forum);
        self
    }

    pub fn voters(mut self, voters: Arc<dyn VoterDirectory>) -> Self {
        self.voters = Some(voters);
        self
    }

    pub fn build(self) -> Result<BallotService, BallotError> {
        self.config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            BallotError::ConfigError(messages.join("; "))
        })?;
        let paths = self
            .paths
            .ok_or_else(|| BallotError::ConfigError("a valid-path source is required".to_string()))?;
        let voters = self
            .voters
            .ok_or_else(|| BallotError::ConfigError("a voter directory is required".to_string()))?;
        let votes: Arc<dyn VoteStore> = match self.votes {
            Some(votes) => votes,
            None => Arc::new(SledVoteStore::new(&self.config.store.path)?),
        };
        let tree: Arc<dyn NamespaceTree> = match self.tree {
            Some(tree) => tree,
            None => Arc::new(NamespaceDirectory::new()),
        };
        let baseline: Arc<dyn BaselineStore> = match self.baseline {
            Some(baseline) => baseline,
            None => Arc::new(MemoryBaselineStore::new()),
        };
        let forum: Arc<dyn ForumIndex> = match self.forum {
            Some(forum) => forum,
            None => Arc::new(MemoryForumIndex::new()),
        };

        let config = self.config;
        let ctx = Arc::new(NamespaceContext {
            tree,
            baseline,
            votes,
            paths,
            forum,
            voters,
            registry: Arc::new(PathRegistry::new()),
            locks: Arc::new(PermanentLockTable::new()),
            flags: Arc::new(FlagTable::new()),
            lock_manager: Arc::new(NamespaceLockManager::new()),
            stamps: Arc::new(StampRegistry::new()),
            listeners: ListenerSet::default(),
            resolver: ConsensusResolver::new(config.voting.required_votes),
            voting: config.voting.clone(),
            persist_timeout: config.store.persist_timeout(),
            load_timeout: config.cache.load_timeout(),
        });
        let cache = NamespaceCache::new(ctx, config.cache.clone());
        info!(
            max_namespaces = config.cache.max_namespaces,
            phase = ?config.voting.phase,
            "Ballot service ready"
        );
        Ok(BallotService {
            cache,
            config: Arc::new(config),
        })
    }
}
