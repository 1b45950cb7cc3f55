//! Namespace Working Set
//!
//! Per-namespace aggregate behind the Ballot Box contract: baseline values,
//! vote ledgers, the valid-path set, and a resolving read path that asks the
//! parent namespace (by id, through the cache) for inherited values.
//!
//! Votes run inside the namespace's exclusive section. A vote is validated,
//! applied to a tentative copy of the path's ledger, resolved, persisted in one
//! store write, and only then committed to memory. Readers see either the old
//! or the new state of a path, never a mix.
//!
//! Once the cache evicts an instance it is retired: calls made through a
//! retired instance are forwarded to the resident one, so only one instance
//! per namespace ever commits.

use crate::config::VotingPhase;
use crate::error::{BallotError, VoteRejection};
use crate::ledger::VoteLedger;
use crate::lock::{plan_lock, LockEntry, LockOutcome, LockRequest};
use crate::namespace::flags::FlagInfo;
use crate::namespace::stamp::ChangeStamp;
use crate::namespace::tree::NamespaceRecord;
use crate::namespace::{InheritanceSource, NamespaceContext, NamespaceState, ValueChange};
use crate::resolver::{BaselineValue, ResolvedValue, ResolverInput};
use crate::store::{
    check_deadline, AlternateRow, FlagChange, FlagRow, LockChange, LockRow, PathVisibility,
    VoteRow, VoteWrite,
};
use crate::types::{Deadline, NamespaceId, PathId, Timestamp, VoteKind, VoterId};
use crate::voter::{VoterInfo, LOCKING_VOTES, PERMANENT_VOTES};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use unicode_normalization::UnicodeNormalization;

/// Result of an accepted vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    /// False when the vote matched what the voter already held
    pub applied: bool,
    /// Resolution of the path after the vote
    pub resolved: ResolvedValue,
    /// Whether the resolved value or its source changed
    pub changed: bool,
    pub lock: LockOutcome,
    /// Namespace change stamp after the vote
    pub stamp: u64,
}

#[derive(Default)]
struct LedgerState {
    ledgers: HashMap<PathId, VoteLedger>,
    valid_paths: HashSet<PathId>,
    /// Bumped on every commit to a path; memoized resolutions carry it
    versions: HashMap<PathId, u64>,
}

impl LedgerState {
    fn version_of(&self, path: PathId) -> u64 {
        self.versions.get(&path).copied().unwrap_or(0)
    }
}

struct Memo {
    version: u64,
    voters_generation: u64,
    bailey: Option<String>,
    resolved: ResolvedValue,
}

/// A vote that passed validation
struct Ballot {
    voter: VoterInfo,
    path_id: PathId,
    path: String,
    value: Option<String>,
    override_weight: Option<u32>,
    kind: VoteKind,
    /// Path enters the valid set with this vote
    new_path: bool,
}

/// Tentative effects of a ballot, not yet visible to anyone
struct Plan {
    ledger: VoteLedger,
    lock_request: Option<LockRequest>,
    lock_outcome: LockOutcome,
    lock_entry: Option<LockEntry>,
    write: VoteWrite,
}

pub struct NamespaceWorkingSet {
    id: NamespaceId,
    parent: Option<NamespaceId>,
    /// This namespace followed by its ancestors
    lineage: Vec<NamespaceId>,
    read_only: bool,
    ctx: Arc<NamespaceContext>,
    inheritance: Weak<dyn InheritanceSource>,
    baselines: HashMap<PathId, BaselineValue>,
    state: RwLock<LedgerState>,
    memo: Mutex<HashMap<PathId, Memo>>,
    stamp: ChangeStamp,
    poisoned: AtomicBool,
    retired: AtomicBool,
}

impl std::fmt::Debug for NamespaceWorkingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceWorkingSet")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl NamespaceWorkingSet {
    /// Load a namespace from the stores
    ///
    /// The caller holds the namespace's exclusive section and has already made
    /// the parent resident.
    pub(crate) fn load(
        ctx: Arc<NamespaceContext>,
        record: NamespaceRecord,
        lineage: Vec<NamespaceId>,
        inheritance: Weak<dyn InheritanceSource>,
    ) -> Result<Self, BallotError> {
        let deadline = Deadline::after(ctx.load_timeout);
        let id = record.id.clone();
        let read_only = record.read_only || ctx.voting.read_only_namespaces.contains(&id);

        let mut valid_paths = HashSet::new();
        let mut baselines = HashMap::new();
        for path in ctx.paths.paths_for(&id)? {
            let path_id = ctx.registry.id_for(&path);
            valid_paths.insert(path_id);
            if let Some(baseline) = ctx.baseline.read_baseline(&id, &path)? {
                baselines.insert(path_id, baseline);
            }
        }
        check_deadline(deadline, "load baselines")?;

        let mut ledgers: HashMap<PathId, VoteLedger> = HashMap::new();
        let mut locks = Vec::new();
        if !read_only {
            let rows = ctx.votes.query_votes(&id)?;
            let mut snapshot = ctx.voters.snapshot();
            if rows.iter().any(|row| snapshot.get(row.voter).is_none()) {
                ctx.voters.refresh()?;
                snapshot = ctx.voters.snapshot();
            }
            for row in rows {
                let Some(path_id) = Self::stored_path(&ctx, &id, &valid_paths, &row.path) else {
                    continue;
                };
                if snapshot.get(row.voter).is_none() {
                    warn!(
                        namespace = %id,
                        voter = %row.voter,
                        path = %row.path,
                        "Skipping stored vote from unknown voter"
                    );
                    continue;
                }
                let ledger = ledgers.entry(path_id).or_default();
                if ledger.did_vote(row.voter) {
                    return Err(BallotError::inconsistency(
                        &id,
                        format!("duplicate vote by {} on {}", row.voter, row.path),
                    ));
                }
                ledger.set_vote(
                    row.voter,
                    Some(row.value),
                    row.override_weight,
                    row.cast_at,
                    row.kind,
                );
            }
            check_deadline(deadline, "load votes")?;

            for row in ctx.votes.query_locks(&id)? {
                let Some(path_id) = Self::stored_path(&ctx, &id, &valid_paths, &row.path) else {
                    continue;
                };
                locks.push((path_id, row.value, row.locked_at));
            }
            for row in ctx.votes.query_alternates(&id)? {
                if let Some(path_id) = Self::stored_path(&ctx, &id, &valid_paths, &row.path) {
                    ledgers.entry(path_id).or_default().add_other_value(row.value);
                }
            }
            check_deadline(deadline, "load locks")?;
        }

        if !ctx.flags.is_loaded() {
            let rows = ctx.votes.query_flags()?;
            let registry = &ctx.registry;
            ctx.flags.load_once(rows.into_iter().map(|row| {
                (
                    row.namespace,
                    registry.id_for(&row.path),
                    FlagInfo {
                        flagged_by: row.flagged_by,
                        flagged_at: row.flagged_at,
                    },
                )
            }));
        }

        let lock_count = locks.len();
        ctx.locks.replace_namespace(&id, locks);

        let stamp = ctx.stamps.handle(&id);
        let stamp_value = stamp.bump();
        info!(
            namespace = %id,
            paths = valid_paths.len(),
            ledgers = ledgers.len(),
            locks = lock_count,
            read_only,
            stamp = stamp_value,
            "Namespace loaded"
        );

        Ok(Self {
            id,
            parent: record.parent,
            lineage,
            read_only,
            ctx,
            inheritance,
            baselines,
            state: RwLock::new(LedgerState {
                ledgers,
                valid_paths,
                versions: HashMap::new(),
            }),
            memo: Mutex::new(HashMap::new()),
            stamp,
            poisoned: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        })
    }

    /// Map a stored row's path to a loadable id, or explain why it is skipped
    fn stored_path(
        ctx: &NamespaceContext,
        namespace: &NamespaceId,
        valid_paths: &HashSet<PathId>,
        path: &str,
    ) -> Option<PathId> {
        let Some(path_id) = ctx.registry.lookup(path).filter(|id| valid_paths.contains(id)) else {
            warn!(namespace = %namespace, path, "Skipping stored row for invalid path");
            return None;
        };
        if ctx.paths.visibility(namespace, path) == PathVisibility::Deprecated {
            warn!(namespace = %namespace, path, "Skipping stored row for deprecated path");
            return None;
        }
        Some(path_id)
    }

    pub fn id(&self) -> &NamespaceId {
        &self.id
    }

    pub fn parent(&self) -> Option<&NamespaceId> {
        self.parent.as_ref()
    }

    pub fn lineage(&self) -> &[NamespaceId] {
        &self.lineage
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Whether the cache has dropped this instance
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn state(&self) -> NamespaceState {
        if self.is_poisoned() {
            NamespaceState::Poisoned
        } else if self.read_only {
            NamespaceState::ReadOnly
        } else {
            NamespaceState::Live
        }
    }

    /// Current change stamp
    pub fn stamp(&self) -> u64 {
        self.stamp.current()
    }

    /// Valid paths, sorted
    pub fn valid_paths(&self) -> Vec<String> {
        let ids: Vec<PathId> = self.state.read().valid_paths.iter().copied().collect();
        let mut paths: Vec<String> = ids
            .into_iter()
            .filter_map(|id| self.ctx.registry.path_for(id).ok())
            .map(|path| path.to_string())
            .collect();
        paths.sort();
        paths
    }

    pub fn is_valid_path(&self, path: &str) -> bool {
        self.valid_path_id(path).is_ok()
    }

    pub fn baseline(&self, path: &str) -> Option<BaselineValue> {
        let path_id = self.ctx.registry.lookup(path)?;
        self.baselines.get(&path_id).cloned()
    }

    /// Copy of the path's ledger, if it holds anything
    pub fn ledger(&self, path: &str) -> Option<VoteLedger> {
        let path_id = self.ctx.registry.lookup(path)?;
        self.state.read().ledgers.get(&path_id).cloned()
    }

    pub fn vote_value(&self, voter: VoterId, path: &str) -> Option<String> {
        let path_id = self.ctx.registry.lookup(path)?;
        self.state
            .read()
            .ledgers
            .get(&path_id)
            .and_then(|ledger| ledger.vote_value(voter).map(str::to_string))
    }

    /// Cast, replace or (with `None`) withdraw a vote
    pub fn vote_for(
        &self,
        voter: VoterId,
        path: &str,
        value: Option<&str>,
        override_weight: Option<u32>,
        kind: VoteKind,
        deadline: Deadline,
    ) -> Result<VoteOutcome, BallotError> {
        let gate = self.ctx.lock_manager.get_lock(&self.id);
        let guard = gate.write();
        if self.is_retired() {
            drop(guard);
            return self
                .successor()?
                .vote_for(voter, path, value, override_weight, kind, deadline);
        }

        let ballot = self.validate(voter, path, value, override_weight, kind)?;
        let previous = self.resolve_id(ballot.path_id)?;
        let now = Utc::now();

        let Some(plan) = self.plan(&ballot, now)? else {
            debug!(namespace = %self.id, voter = %voter, path, "Identical vote ignored");
            return Ok(VoteOutcome {
                applied: false,
                resolved: previous,
                changed: false,
                lock: LockOutcome::default(),
                stamp: self.stamp.current(),
            });
        };

        let bailey = self.bailey_for(ballot.path_id)?;
        let (resolved, voters_generation) = self.resolve_input(ResolverInput {
            baseline: self.baselines.get(&ballot.path_id),
            bailey: bailey.as_deref(),
            ledger: Some(&plan.ledger),
            lock: plan.lock_entry.as_ref(),
        })?;

        self.ctx
            .votes
            .persist_vote(&plan.write, deadline.or_after(self.ctx.persist_timeout))?;

        let lock = plan.lock_outcome;
        let stamp = self.commit(&ballot, plan, bailey, &resolved, voters_generation, now)?;
        drop(guard);

        let changed = previous.value != resolved.value || previous.source != resolved.source;
        debug!(
            namespace = %self.id,
            voter = %voter,
            path,
            value = ?ballot.value,
            override_weight = ?ballot.override_weight,
            changed,
            stamp,
            "Vote applied"
        );
        if changed {
            self.ctx.listeners.notify(&ValueChange {
                namespace: self.id.clone(),
                path: ballot.path.clone(),
                path_id: ballot.path_id,
                previous,
                current: resolved.clone(),
                stamp,
            });
        }

        Ok(VoteOutcome {
            applied: true,
            resolved,
            changed,
            lock,
            stamp,
        })
    }

    /// Withdraw the voter's vote
    pub fn unvote_for(
        &self,
        voter: VoterId,
        path: &str,
        deadline: Deadline,
    ) -> Result<VoteOutcome, BallotError> {
        self.vote_for(voter, path, None, None, VoteKind::Direct, deadline)
    }

    /// Re-cast the voter's current value without its override
    ///
    /// Only a vote carrying an override changes: it drops back to the voter's
    /// level weight. A plain vote is already in that form, so the outcome is
    /// not applied. With no vote on record this is an abstention.
    pub fn revote_for(
        &self,
        voter: VoterId,
        path: &str,
        deadline: Deadline,
    ) -> Result<VoteOutcome, BallotError> {
        if self.is_retired() {
            return self.successor()?.revote_for(voter, path, deadline);
        }
        let (value, kind) = {
            let path_id = self.valid_path_id(path)?;
            let state = self.state.read();
            match state.ledgers.get(&path_id).and_then(|ledger| ledger.vote(voter)) {
                Some(record) => (Some(record.value.clone()), record.kind),
                None => (None, VoteKind::Direct),
            }
        };
        self.vote_for(voter, path, value.as_deref(), None, kind, deadline)
    }

    /// Current resolution of a path
    pub fn get_resolver(&self, path: &str) -> Result<ResolvedValue, BallotError> {
        if self.is_retired() {
            return self.successor()?.get_resolver(path);
        }
        let path_id = self.valid_path_id(path)?;
        self.resolve_id(path_id)
    }

    /// Distinct candidate values: baseline, lock, cast votes and superseded
    /// proposals
    pub fn get_values(&self, path: &str) -> Result<Option<BTreeSet<String>>, BallotError> {
        if self.is_retired() {
            return self.successor()?.get_values(path);
        }
        self.ensure_healthy()?;
        let path_id = self.valid_path_id(path)?;
        let mut values = BTreeSet::new();
        if let Some(baseline) = self.baselines.get(&path_id) {
            values.insert(baseline.value.clone());
        }
        if let Some(lock) = self.ctx.locks.active_lock(&self.id, path_id) {
            values.extend(lock.locked_value().map(str::to_string));
        }
        if let Some(ledger) = self.state.read().ledgers.get(&path_id) {
            values.extend(ledger.votes().map(|(_, record)| record.value.clone()));
            values.extend(ledger.other_values().iter().cloned());
        }
        Ok((!values.is_empty()).then_some(values))
    }

    pub fn is_flagged(&self, path: &str) -> bool {
        self.ctx
            .registry
            .lookup(path)
            .map_or(false, |path_id| self.ctx.flags.is_flagged(&self.id, path_id))
    }

    /// Flag a path for review; false if it already was
    pub fn flag_for_review(
        &self,
        path: &str,
        voter: VoterId,
        deadline: Deadline,
    ) -> Result<bool, BallotError> {
        let gate = self.ctx.lock_manager.get_lock(&self.id);
        let guard = gate.write();
        if self.is_retired() {
            drop(guard);
            return self.successor()?.flag_for_review(path, voter, deadline);
        }
        self.ensure_healthy()?;

        let info = self.lookup_voter(voter)?;
        if let Some(why) = info.modify_denial(&self.lineage) {
            return Err(BallotError::rejected(&self.id, VoteRejection::NoPermission(why)));
        }
        let path_id = self.valid_path_id(path)?;
        if self.ctx.flags.is_flagged(&self.id, path_id) {
            return Ok(false);
        }

        let flagged_at = Utc::now();
        self.ctx.votes.persist_flag(
            &FlagChange::Set(FlagRow {
                namespace: self.id.clone(),
                path: path.to_string(),
                flagged_by: voter,
                flagged_at,
            }),
            deadline.or_after(self.ctx.persist_timeout),
        )?;
        self.ctx.flags.set(
            &self.id,
            path_id,
            FlagInfo {
                flagged_by: voter,
                flagged_at,
            },
        );
        self.stamp.bump();
        debug!(namespace = %self.id, path, voter = %voter, "Path flagged for review");
        Ok(true)
    }

    /// Remove a review flag (TC and above); false if there was none
    pub fn clear_flag(
        &self,
        path: &str,
        voter: VoterId,
        deadline: Deadline,
    ) -> Result<bool, BallotError> {
        let gate = self.ctx.lock_manager.get_lock(&self.id);
        let guard = gate.write();
        if self.is_retired() {
            drop(guard);
            return self.successor()?.clear_flag(path, voter, deadline);
        }
        self.ensure_healthy()?;

        let info = self.lookup_voter(voter)?;
        if !info.level.is_tc_or_stronger() {
            return Err(BallotError::rejected(
                &self.id,
                VoteRejection::NoPermission(format!("{} may not clear review flags", info.name)),
            ));
        }
        let path_id = self.valid_path_id(path)?;
        if !self.ctx.flags.is_flagged(&self.id, path_id) {
            return Ok(false);
        }

        self.ctx.votes.persist_flag(
            &FlagChange::Clear {
                namespace: self.id.clone(),
                path: path.to_string(),
            },
            deadline.or_after(self.ctx.persist_timeout),
        )?;
        self.ctx.flags.clear(&self.id, path_id);
        self.stamp.bump();
        Ok(true)
    }

    /// Mark the namespace unusable until it is rebuilt from the stores
    pub(crate) fn poison(&self, detail: impl Into<String>) -> BallotError {
        let detail = detail.into();
        self.poisoned.store(true, Ordering::Release);
        error!(namespace = %self.id, detail = %detail, "Namespace poisoned");
        BallotError::inconsistency(&self.id, detail)
    }

    /// Called by the cache when it drops this instance
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Instance the cache now holds for this namespace
    fn successor(&self) -> Result<Arc<NamespaceWorkingSet>, BallotError> {
        let source = self.inheritance.upgrade().ok_or(BallotError::CacheShutdown)?;
        debug!(namespace = %self.id, "Forwarding from retired instance");
        source.working_set(&self.id)
    }

    pub(crate) fn ensure_healthy(&self) -> Result<(), BallotError> {
        if self.is_poisoned() {
            Err(BallotError::inconsistency(&self.id, "namespace is poisoned"))
        } else {
            Ok(())
        }
    }

    fn valid_path_id(&self, path: &str) -> Result<PathId, BallotError> {
        self.ctx
            .registry
            .lookup(path)
            .filter(|id| self.state.read().valid_paths.contains(id))
            .ok_or_else(|| BallotError::InvalidPath {
                namespace: self.id.clone(),
                path: path.to_string(),
            })
    }

    /// Voter from the directory, refreshing it once if unknown
    fn lookup_voter(&self, voter: VoterId) -> Result<VoterInfo, BallotError> {
        if let Some(info) = self.ctx.voters.snapshot().get(voter) {
            return Ok(info.clone());
        }
        self.ctx.voters.refresh()?;
        self.ctx.voters.snapshot().get_or_error(voter).cloned()
    }

    /// Checks run in order; the first failure rejects the vote
    fn validate(
        &self,
        voter: VoterId,
        path: &str,
        value: Option<&str>,
        override_weight: Option<u32>,
        kind: VoteKind,
    ) -> Result<Ballot, BallotError> {
        self.ensure_healthy()?;
        if self.read_only {
            return Err(BallotError::rejected(&self.id, VoteRejection::NamespaceReadOnly));
        }

        let info = self.lookup_voter(voter)?;
        if self.ctx.voting.phase == VotingPhase::Closed && !info.level.is_admin() {
            return Err(BallotError::rejected(&self.id, VoteRejection::PhaseClosed));
        }
        if let Some(why) = info.modify_denial(&self.lineage) {
            return Err(BallotError::rejected(&self.id, VoteRejection::NoPermission(why)));
        }

        let elevated = info.level.is_tc_or_stronger();
        let (path_id, new_path) = match self.valid_path_id(path) {
            Ok(id) => (id, false),
            Err(_) if value.is_none() && elevated => (self.ctx.registry.id_for(path), true),
            Err(err) => return Err(err),
        };
        match self.ctx.paths.visibility(&self.id, path) {
            PathVisibility::Visible => {}
            PathVisibility::Deprecated => {
                return Err(BallotError::rejected(
                    &self.id,
                    VoteRejection::NoPermission(format!("{} is deprecated", path)),
                ));
            }
            PathVisibility::Hidden | PathVisibility::ReadOnly if !elevated => {
                return Err(BallotError::rejected(
                    &self.id,
                    VoteRejection::NoPermission(format!("{} is not open for voting", path)),
                ));
            }
            PathVisibility::Hidden | PathVisibility::ReadOnly => {}
        }

        let override_weight = match kind {
            VoteKind::AutoImport => None,
            _ => override_weight,
        };
        if let Some(weight) = override_weight {
            if !info.level.can_vote_with_count(&info.organization, weight) {
                return Err(BallotError::rejected(
                    &self.id,
                    VoteRejection::NoPermission(format!(
                        "{:?} may not vote with weight {}",
                        info.level, weight
                    )),
                ));
            }
        }
        if override_weight == Some(PERMANENT_VOTES)
            && value.is_some()
            && self.ctx.forum.post_count(&self.id, path)? == 0
        {
            return Err(BallotError::rejected(&self.id, VoteRejection::ForumPostRequired));
        }

        let value = value.map(|v| v.nfc().collect::<String>());
        if let Some(value) = &value {
            let limit = self.ctx.voting.value_limits.limit_for(&self.lineage, path);
            let length = value.chars().count();
            if length > limit {
                return Err(BallotError::rejected(
                    &self.id,
                    VoteRejection::ValueTooLong { length, limit },
                ));
            }
        }

        Ok(Ballot {
            voter: info,
            path_id,
            path: path.to_string(),
            value,
            override_weight,
            kind,
            new_path,
        })
    }

    /// Tentative ledger, lock and store effects of a ballot; `None` if it
    /// changes nothing
    fn plan(&self, ballot: &Ballot, now: Timestamp) -> Result<Option<Plan>, BallotError> {
        let (mut ledger, current_lock) = {
            let state = self.state.read();
            (
                state.ledgers.get(&ballot.path_id).cloned().unwrap_or_default(),
                self.ctx.locks.entry(&self.id, ballot.path_id),
            )
        };
        let locked = current_lock.as_ref().map_or(false, LockEntry::is_active);
        let mut write = VoteWrite::new(self.id.clone(), ballot.path.clone());
        let mut lock_request = None;
        let voter = ballot.voter.id;

        if ballot.override_weight == Some(LOCKING_VOTES) {
            lock_request = Some(match &ballot.value {
                Some(value) => LockRequest::lock(value.clone()),
                None => LockRequest::unlock(),
            });
        } else {
            let identical = match (ledger.vote(voter), &ballot.value) {
                (None, None) => true,
                (Some(record), Some(value)) => {
                    &record.value == value
                        && record.override_weight == ballot.override_weight
                        && record.kind == ballot.kind
                }
                _ => false,
            };
            let releases_lock = ballot.override_weight == Some(PERMANENT_VOTES)
                && ballot.value.is_none()
                && locked;
            if identical && !releases_lock && !ballot.new_path {
                return Ok(None);
            }

            let previous = ledger.set_vote(
                voter,
                ballot.value.clone(),
                ballot.override_weight,
                now,
                ballot.kind,
            );
            match &ballot.value {
                Some(value) => write.upserts.push(VoteRow {
                    namespace: self.id.clone(),
                    path: ballot.path.clone(),
                    voter,
                    value: value.clone(),
                    override_weight: ballot.override_weight,
                    cast_at: now,
                    kind: ballot.kind,
                }),
                None => write.deletes.push(voter),
            }
            if let (Some(previous), Some(value)) = (&previous, &ballot.value) {
                if &previous.value != value {
                    ledger.add_other_value(previous.value.clone());
                    write.alternate = Some(AlternateRow {
                        namespace: self.id.clone(),
                        path: ballot.path.clone(),
                        value: previous.value.clone(),
                    });
                }
            }

            if ballot.override_weight == Some(PERMANENT_VOTES) {
                match &ballot.value {
                    Some(value)
                        if ledger.count_overrides_for_value(value, PERMANENT_VOTES)
                            >= self.ctx.voting.permanent_votes_to_lock =>
                    {
                        lock_request = Some(LockRequest::lock(value.clone()).with_clean_slate());
                    }
                    None if releases_lock => lock_request = Some(LockRequest::unlock()),
                    _ => {}
                }
            }
        }

        let mut lock_outcome = LockOutcome::default();
        let mut lock_entry = current_lock.clone();
        if let Some(request) = &lock_request {
            let (outcome, next) = plan_lock(current_lock.as_ref(), request, now);
            if outcome.is_noop() && ballot.override_weight == Some(LOCKING_VOTES) {
                return Ok(None);
            }
            if outcome.did_clean_slate {
                let purged = ledger.remove_overrides_matching(PERMANENT_VOTES);
                write.upserts.retain(|row| !purged.contains(&row.voter));
                write.deletes.extend(purged);
            }
            match (&request.value, outcome.did_lock, outcome.did_unlock) {
                (Some(value), true, _) => {
                    write.lock = Some(LockChange::Set(LockRow {
                        namespace: self.id.clone(),
                        path: ballot.path.clone(),
                        value: value.clone(),
                        locked_at: now,
                    }));
                }
                (_, _, true) => write.lock = Some(LockChange::Clear),
                _ => {}
            }
            lock_outcome = outcome;
            lock_entry = next;
        }
        write.deletes.sort();
        write.deletes.dedup();

        if ballot.voter.level.is_tc_or_stronger()
            && self.ctx.flags.is_flagged(&self.id, ballot.path_id)
        {
            write.clear_flag = true;
        }

        Ok(Some(Plan {
            ledger,
            lock_request,
            lock_outcome,
            lock_entry,
            write,
        }))
    }

    /// Publish a persisted plan; returns the new change stamp
    fn commit(
        &self,
        ballot: &Ballot,
        plan: Plan,
        bailey: Option<String>,
        resolved: &ResolvedValue,
        voters_generation: u64,
        now: Timestamp,
    ) -> Result<u64, BallotError> {
        let path_id = ballot.path_id;
        let mut state = self.state.write();
        if ballot.new_path {
            state.valid_paths.insert(path_id);
        }
        if plan.ledger.has_content() {
            state.ledgers.insert(path_id, plan.ledger);
        } else {
            state.ledgers.remove(&path_id);
        }
        let version = {
            let version = state.versions.entry(path_id).or_insert(0);
            *version += 1;
            *version
        };

        if let Some(request) = &plan.lock_request {
            let applied = self.ctx.locks.apply_lock(&self.id, path_id, request, now);
            if applied != plan.lock_outcome {
                drop(state);
                return Err(self.poison(format!(
                    "lock table diverged on {}: planned {:?}, applied {:?}",
                    ballot.path, plan.lock_outcome, applied
                )));
            }
        }
        if plan.write.clear_flag && self.ctx.flags.clear(&self.id, path_id) {
            debug!(namespace = %self.id, path = %ballot.path, "Review flag cleared by vote");
        }

        self.memo.lock().insert(
            path_id,
            Memo {
                version,
                voters_generation,
                bailey,
                resolved: resolved.clone(),
            },
        );
        Ok(self.stamp.bump())
    }

    /// Effective value the parent chain provides for a path
    fn bailey_for(&self, path_id: PathId) -> Result<Option<String>, BallotError> {
        let Some(parent) = &self.parent else {
            return Ok(None);
        };
        let source = self.inheritance.upgrade().ok_or(BallotError::CacheShutdown)?;
        let parent = source.working_set(parent)?;
        Ok(parent
            .resolve_id(path_id)?
            .effective_value()
            .map(str::to_string))
    }

    /// Resolve a path by id, reusing the memoized result while it is current
    pub(crate) fn resolve_id(&self, path_id: PathId) -> Result<ResolvedValue, BallotError> {
        self.ensure_healthy()?;
        let bailey = self.bailey_for(path_id)?;
        let voters_generation = self.ctx.voters.snapshot().generation();
        let version = self.state.read().version_of(path_id);
        if let Some(memo) = self.memo.lock().get(&path_id) {
            if memo.version == version
                && memo.voters_generation == voters_generation
                && memo.bailey == bailey
            {
                return Ok(memo.resolved.clone());
            }
        }

        let (resolved, version, voters_generation) = {
            let state = self.state.read();
            let lock = self.ctx.locks.active_lock(&self.id, path_id);
            let (resolved, generation) = self.resolve_input(ResolverInput {
                baseline: self.baselines.get(&path_id),
                bailey: bailey.as_deref(),
                ledger: state.ledgers.get(&path_id),
                lock: lock.as_ref(),
            })?;
            (resolved, state.version_of(path_id), generation)
        };

        let mut memos = self.memo.lock();
        let stale = memos
            .get(&path_id)
            .map_or(false, |existing| existing.version > version);
        if !stale {
            memos.insert(
                path_id,
                Memo {
                    version,
                    voters_generation,
                    bailey,
                    resolved: resolved.clone(),
                },
            );
        }
        Ok(resolved)
    }

    /// Run the resolver, refreshing the voter directory once on an unknown voter
    fn resolve_input(&self, input: ResolverInput<'_>) -> Result<(ResolvedValue, u64), BallotError> {
        let snapshot = self.ctx.voters.snapshot();
        match self.ctx.resolver.resolve(input, &snapshot) {
            Err(BallotError::UnknownVoter(voter)) => {
                debug!(namespace = %self.id, voter = %voter, "Unknown voter; refreshing directory");
                self.ctx.voters.refresh()?;
                let snapshot = self.ctx.voters.snapshot();
                let resolved = self.ctx.resolver.resolve(input, &snapshot)?;
                Ok((resolved, snapshot.generation()))
            }
            other => other.map(|resolved| (resolved, snapshot.generation())),
        }
    }
}
