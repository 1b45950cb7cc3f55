//! Namespace cache: single-flight construction, eviction and inheritance

use super::test_utils::*;
use ballotbox::error::BallotError;
use ballotbox::namespace::NamespaceState;
use ballotbox::resolver::WinningSource;
use ballotbox::store::VoteRow;
use ballotbox::types::{Deadline, VoteKind};
use ballotbox::{BallotConfig, VoteRequest};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};

#[test]
fn test_concurrent_first_access_constructs_once() {
    let store = Arc::new(FlakyVoteStore::new());
    store.load_delay_ms.store(50, Ordering::SeqCst);
    let h = HarnessBuilder::new().votes(store.clone()).build();
    let threads = 8;
    let barrier = Barrier::new(threads);

    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                barrier.wait();
                let set = h.service.namespace(&ns("fr_CA")).unwrap();
                assert_eq!(set.id(), &ns("fr_CA"));
            });
        }
    });

    // root, fr, fr_CA
    assert_eq!(h.service.cache().construction_count(), 3);
    assert_eq!(store.vote_queries.load(Ordering::SeqCst), 3);
}

#[test]
fn test_load_failure_reaches_every_waiter_then_recovers() {
    let store = Arc::new(FlakyVoteStore::new());
    store.fail_reads.store(true, Ordering::SeqCst);
    store.load_delay_ms.store(20, Ordering::SeqCst);
    let h = HarnessBuilder::new().votes(store.clone()).build();
    let threads = 4;
    let barrier = Barrier::new(threads);

    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                barrier.wait();
                let err = h.service.namespace(&ns("fr")).err().unwrap();
                assert!(err.is_retryable(), "unexpected error: {err}");
            });
        }
    });
    assert_eq!(h.service.residency(&ns("fr")), NamespaceState::Uninitialized);

    store.fail_reads.store(false, Ordering::SeqCst);
    store.load_delay_ms.store(0, Ordering::SeqCst);
    assert!(h.service.namespace(&ns("fr")).is_ok());
    assert_eq!(h.service.residency(&ns("fr")), NamespaceState::Live);
}

#[test]
fn test_evict_and_reaccess_gives_equal_resolution() {
    let h = harness();
    let fr = ns("fr");
    h.service
        .vote(&VoteRequest::new("fr", A, PATH, Some("salut")), Deadline::none())
        .unwrap();
    h.service
        .vote(&VoteRequest::new("fr", B, OTHER_PATH, Some("adieu")), Deadline::none())
        .unwrap();
    h.service
        .vote(&VoteRequest::new("fr", A, OTHER_PATH, Some("salut")), Deadline::none())
        .unwrap();

    let before = (
        h.service.resolve(&fr, PATH).unwrap(),
        h.service.resolve(&fr, OTHER_PATH).unwrap(),
        h.service.values(&fr, PATH).unwrap(),
    );
    let constructions = h.service.cache().construction_count();

    assert!(h.service.cache().invalidate(&fr));
    assert_eq!(h.service.residency(&fr), NamespaceState::Uninitialized);

    let after = (
        h.service.resolve(&fr, PATH).unwrap(),
        h.service.resolve(&fr, OTHER_PATH).unwrap(),
        h.service.values(&fr, PATH).unwrap(),
    );
    assert_eq!(before, after);
    assert_eq!(h.service.cache().construction_count(), constructions + 1);
}

#[test]
fn test_evicting_child_keeps_ancestors() {
    let h = harness();
    h.service.namespace(&ns("fr_CA")).unwrap();
    assert!(h.service.cache().invalidate(&ns("fr_CA")));
    assert_eq!(h.service.residency(&ns("fr")), NamespaceState::Live);
    assert_eq!(h.service.residency(&ns("root")), NamespaceState::Live);
}

#[test]
fn test_held_instance_survives_eviction() {
    let h = harness();
    let fr = ns("fr");
    let held = h.service.namespace(&fr).unwrap();
    h.service.cache().invalidate(&fr);
    assert!(held.is_retired());

    held.vote_for(A, PATH, Some("salut"), None, VoteKind::Direct, Deadline::none())
        .unwrap();
    // The replacement instance loads what the old one persisted
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap().as_deref(), Some("salut"));
}

#[test]
fn test_held_instance_writes_reach_resident_replacement() {
    let h = harness();
    let fr = ns("fr");
    let held = h.service.namespace(&fr).unwrap();
    h.service.cache().invalidate(&fr);
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap().as_deref(), Some("bonjour"));

    let outcome = held
        .vote_for(A, PATH, Some("salut"), None, VoteKind::Direct, Deadline::none())
        .unwrap();
    assert_eq!(outcome.resolved.value.as_deref(), Some("salut"));
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap().as_deref(), Some("salut"));
    assert_eq!(held.get_resolver(PATH).unwrap().value.as_deref(), Some("salut"));
    assert_eq!(h.service.stamp(&fr).unwrap(), outcome.stamp);

    held.flag_for_review(OTHER_PATH, A, Deadline::none()).unwrap();
    assert!(h.service.is_flagged(&fr, OTHER_PATH).unwrap());

    // Agrees with a fresh load from the store
    h.service.cache().invalidate(&fr);
    assert_eq!(h.service.winning_value(&fr, PATH).unwrap().as_deref(), Some("salut"));
}

#[test]
fn test_lru_eviction_retires_instance() {
    let mut config = BallotConfig::default();
    config.cache.max_namespaces = 3;
    let h = HarnessBuilder::new().config(config).build();
    let held = h.service.namespace(&ns("fr")).unwrap();
    h.service.namespace(&ns("fr_CA")).unwrap();
    // Loading de touches root, leaving fr least recently used
    h.service.namespace(&ns("de")).unwrap();
    assert!(held.is_retired());
    assert_eq!(h.service.residency(&ns("fr")), NamespaceState::Uninitialized);

    held.vote_for(B, PATH, Some("allo"), None, VoteKind::Direct, Deadline::none())
        .unwrap();
    assert_eq!(
        h.service.winning_value(&ns("fr"), PATH).unwrap().as_deref(),
        Some("allo")
    );
}

#[test]
fn test_size_bound_evicts_least_recently_used() {
    let mut config = BallotConfig::default();
    config.cache.max_namespaces = 3;
    let h = HarnessBuilder::new().config(config).build();

    h.service.namespace(&ns("fr_CA")).unwrap();
    h.service.namespace(&ns("de")).unwrap();
    assert_eq!(h.service.cache().resident_count(), 3);
    assert_eq!(h.service.residency(&ns("de")), NamespaceState::Live);

    // Everything still resolves, reloading what was evicted
    assert_eq!(
        h.service.winning_value(&ns("fr_CA"), PATH).unwrap().as_deref(),
        Some("bonjour")
    );
}

#[test]
fn test_stamp_continues_across_reconstruction() {
    let h = harness();
    let fr = ns("fr");
    let outcome = h
        .service
        .vote(&VoteRequest::new("fr", A, PATH, Some("salut")), Deadline::none())
        .unwrap();
    assert_eq!(h.service.cache().peek_stamp(&fr), Some(outcome.stamp));

    h.service.cache().invalidate(&fr);
    let reloaded = h.service.stamp(&fr).unwrap();
    assert!(reloaded > outcome.stamp);
}

#[test]
fn test_inheritance_chain_follows_parent_votes() {
    let h = HarnessBuilder::new().baseline("root", PATH, "hello").build();
    let fr_ca = ns("fr_CA");

    // fr carries its own baseline
    let resolved = h.service.resolve(&fr_ca, PATH).unwrap();
    assert_eq!(resolved.source, WinningSource::Inherited);
    assert_eq!(resolved.effective_value(), Some("bonjour"));

    // de inherits straight from root
    assert_eq!(
        h.service.winning_value(&ns("de"), PATH).unwrap().as_deref(),
        Some("hello")
    );

    h.service
        .vote(&VoteRequest::new("fr", A, PATH, Some("salut")), Deadline::none())
        .unwrap();
    assert_eq!(
        h.service.winning_value(&fr_ca, PATH).unwrap().as_deref(),
        Some("salut")
    );

    h.service
        .vote(&VoteRequest::new("fr_CA", B, PATH, Some("allo")), Deadline::none())
        .unwrap();
    let resolved = h.service.resolve(&fr_ca, PATH).unwrap();
    assert_eq!(resolved.value.as_deref(), Some("allo"));
    assert_eq!(resolved.bailey.as_deref(), Some("salut"));
}

#[test]
fn test_duplicate_stored_votes_fail_construction() {
    let row = VoteRow {
        namespace: ns("fr"),
        path: PATH.to_string(),
        voter: A,
        value: "salut".to_string(),
        override_weight: None,
        cast_at: Utc::now(),
        kind: VoteKind::Direct,
    };
    let store = Arc::new(FixedRowsStore {
        rows: vec![row.clone(), row],
    });
    let h = HarnessBuilder::new().votes(store).build();

    let err = h.service.namespace(&ns("fr")).err().unwrap();
    assert!(matches!(err, BallotError::InternalInconsistency { .. }));
    assert_eq!(h.service.residency(&ns("fr")), NamespaceState::Uninitialized);
    // The parent is unaffected
    assert_eq!(h.service.residency(&ns("root")), NamespaceState::Live);
}

#[test]
fn test_stored_rows_for_unknown_paths_and_voters_are_skipped() {
    let row = |path: &str, voter| VoteRow {
        namespace: ns("fr"),
        path: path.to_string(),
        voter,
        value: "salut".to_string(),
        override_weight: None,
        cast_at: Utc::now(),
        kind: VoteKind::Direct,
    };
    let store = Arc::new(FixedRowsStore {
        rows: vec![
            row(PATH, A),
            row("//ldml/retired", B),
            row(OTHER_PATH, ballotbox::types::VoterId(999)),
        ],
    });
    let h = HarnessBuilder::new().votes(store).build();
    let set = h.service.namespace(&ns("fr")).unwrap();
    assert!(set.ledger(PATH).unwrap().did_vote(A));
    assert!(set.ledger(OTHER_PATH).is_none());
    assert!(!set.is_valid_path("//ldml/retired"));
}

#[test]
fn test_unknown_namespace() {
    let h = harness();
    let err = h.service.namespace(&ns("xx")).err().unwrap();
    assert!(matches!(err, BallotError::NamespaceNotFound(_)));
}
