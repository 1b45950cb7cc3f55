//! Administrative locks and permanent votes

use super::test_utils::*;
use ballotbox::error::{BallotError, VoteRejection};
use ballotbox::resolver::{ApprovalStatus, WinningSource};
use ballotbox::store::{MemoryVoteStore, VoteStore};
use ballotbox::types::{Deadline, VoterId};
use ballotbox::voter::{Level, Organization, VoterInfo, LOCKING_VOTES, PERMANENT_VOTES};
use ballotbox::VoteRequest;
use std::sync::Arc;

fn lock(namespace: &str, value: Option<&str>) -> VoteRequest {
    VoteRequest::new(namespace, ADMIN, PATH, value).with_override(LOCKING_VOTES)
}

#[test]
fn test_admin_lock_overrides_votes_until_unlocked() {
    let h = harness();
    let fr = ns("fr");
    h.service
        .vote(&VoteRequest::new("fr", A, PATH, Some("salut")), Deadline::none())
        .unwrap();
    h.service
        .vote(
            &VoteRequest::new("fr", B, PATH, Some("bonjour")).with_override(2),
            Deadline::none(),
        )
        .unwrap();

    let locked = h.service.vote(&lock("fr", Some("bonjour")), Deadline::none()).unwrap();
    assert!(locked.lock.did_lock);
    assert_eq!(locked.resolved.source, WinningSource::Locked);
    assert_eq!(locked.resolved.status, ApprovalStatus::Approved);

    // A votes `salut` again at full weight; the locked path does not move
    h.service.unvote(&fr, A, PATH, Deadline::none()).unwrap();
    let recast = h
        .service
        .vote(&VoteRequest::new("fr", A, PATH, Some("salut")), Deadline::none())
        .unwrap();
    assert!(recast.applied);
    assert_eq!(recast.resolved.value.as_deref(), Some("bonjour"));
    assert_eq!(recast.resolved.source, WinningSource::Locked);
    assert_eq!(h.service.locked_paths(&fr).unwrap(), vec![PATH.to_string()]);

    // Unlocking hands the path back to the ledger: A(4) against B(2)
    let unlocked = h.service.vote(&lock("fr", None), Deadline::none()).unwrap();
    assert!(unlocked.lock.did_unlock);
    assert_eq!(unlocked.resolved.value.as_deref(), Some("salut"));
    assert_eq!(unlocked.resolved.source, WinningSource::VoteMajority);
    let resolved = h.service.resolve(&fr, PATH).unwrap();
    assert_eq!(resolved.value.as_deref(), Some("salut"));
    assert_eq!(resolved.source, WinningSource::VoteMajority);
    assert!(h.service.locked_paths(&fr).unwrap().is_empty());
}

#[test]
fn test_lock_cycle_keeps_votes_of_every_voter() {
    let h = harness();
    let fr = ns("fr");
    let first = VoterId(1);
    h.voters.upsert(VoterInfo::new(
        first,
        "first",
        Organization::tc("committee"),
        Level::Admin,
    ));
    h.service
        .vote(&VoteRequest::new("fr", first, PATH, Some("hallo")), Deadline::none())
        .unwrap();

    h.service.vote(&lock("fr", Some("bonjour")), Deadline::none()).unwrap();
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap().as_deref(), Some("bonjour"));
    h.service.vote(&lock("fr", None), Deadline::none()).unwrap();

    let live = h.service.winning_value(&fr, PATH).unwrap();
    assert_eq!(live.as_deref(), Some("hallo"));
    assert!(h.service.cache().invalidate(&fr));
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap(), live);
    assert_eq!(
        h.service.namespace(&fr).unwrap().vote_value(first, PATH).as_deref(),
        Some("hallo")
    );
}

#[test]
fn test_relocking_same_value_is_noop() {
    let h = harness();
    let fr = ns("fr");
    h.service.vote(&lock("fr", Some("bonjour")), Deadline::none()).unwrap();
    let stamp = h.service.stamp(&fr).unwrap();
    let again = h.service.vote(&lock("fr", Some("bonjour")), Deadline::none()).unwrap();
    assert!(!again.applied);
    assert_eq!(h.service.stamp(&fr).unwrap(), stamp);

    let unlock_twice = h.service.vote(&lock("fr", None), Deadline::none()).unwrap();
    assert!(unlock_twice.applied);
    let noop = h.service.vote(&lock("fr", None), Deadline::none()).unwrap();
    assert!(!noop.applied);
}

#[test]
fn test_lock_to_different_value_replaces_lock() {
    let h = harness();
    h.service.vote(&lock("fr", Some("bonjour")), Deadline::none()).unwrap();
    let outcome = h.service.vote(&lock("fr", Some("salut")), Deadline::none()).unwrap();
    assert!(outcome.lock.did_lock && outcome.lock.did_unlock);
    assert_eq!(outcome.resolved.value.as_deref(), Some("salut"));
}

#[test]
fn test_only_admins_lock() {
    let h = harness();
    let err = h
        .service
        .vote(
            &VoteRequest::new("fr", TC1, PATH, Some("salut")).with_override(LOCKING_VOTES),
            Deadline::none(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        BallotError::VoteRejected {
            reason: VoteRejection::NoPermission(_),
            ..
        }
    ));
}

#[test]
fn test_permanent_votes_lock_and_clean_slate() {
    let store = Arc::new(MemoryVoteStore::new());
    let h = HarnessBuilder::new().votes(store.clone()).build();
    let fr = ns("fr");
    h.forum.add_post("fr", PATH);

    let permanent = |voter| {
        VoteRequest::new("fr", voter, PATH, Some("salut")).with_override(PERMANENT_VOTES)
    };
    let first = h.service.vote(&permanent(TC1), Deadline::none()).unwrap();
    assert!(!first.lock.did_lock);
    assert_eq!(first.resolved.value.as_deref(), Some("salut"));

    let second = h.service.vote(&permanent(TC2), Deadline::none()).unwrap();
    assert!(second.lock.did_lock);
    assert!(second.lock.did_clean_slate);
    assert_eq!(second.resolved.source, WinningSource::Locked);

    let set = h.service.namespace(&fr).unwrap();
    let ledger = set.ledger(PATH).unwrap();
    assert!(!ledger.did_vote(TC1) && !ledger.did_vote(TC2));
    assert!(store.query_votes(&fr).unwrap().is_empty());
    assert_eq!(store.query_locks(&fr).unwrap()[0].value, "salut");

    // An ordinary vote cannot shift the lock; a permanent abstention releases it
    h.service
        .vote(&VoteRequest::new("fr", A, PATH, Some("bonjour")), Deadline::none())
        .unwrap();
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap().as_deref(), Some("salut"));

    let release = h
        .service
        .vote(
            &VoteRequest::new("fr", TC1, PATH, None).with_override(PERMANENT_VOTES),
            Deadline::none(),
        )
        .unwrap();
    assert!(release.lock.did_unlock);
    assert!(store.query_locks(&fr).unwrap().is_empty());
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap().as_deref(), Some("bonjour"));
}

#[test]
fn test_permanent_vote_requires_forum_post() {
    let h = harness();
    let err = h
        .service
        .vote(
            &VoteRequest::new("fr", TC1, PATH, Some("salut")).with_override(PERMANENT_VOTES),
            Deadline::none(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        BallotError::VoteRejected {
            reason: VoteRejection::ForumPostRequired,
            ..
        }
    ));
}

#[test]
fn test_lock_survives_reconstruction() {
    let store = Arc::new(MemoryVoteStore::new());
    let h = HarnessBuilder::new().votes(store.clone()).build();
    let fr = ns("fr");
    h.service.vote(&lock("fr", Some("salut")), Deadline::none()).unwrap();
    let before = h.service.resolve(&fr, PATH).unwrap();

    assert!(h.service.cache().invalidate(&fr));
    let after = h.service.resolve(&fr, PATH).unwrap();
    assert_eq!(before, after);
    assert_eq!(after.source, WinningSource::Locked);

    // A second service over the same store sees the lock too
    let other = HarnessBuilder::new().votes(store).build();
    assert_eq!(other.service.resolve(&fr, PATH).unwrap(), before);
}
