//! Property-based tests for determinism guarantees

use ballotbox::ledger::VoteLedger;
use ballotbox::resolver::{BaselineValue, ConsensusResolver, ResolverInput, WinningSource};
use ballotbox::types::{VoteKind, VoterId, INHERITANCE_MARKER};
use ballotbox::voter::{Level, Organization, VoterInfo, VoterSnapshot};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;

const VALUES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

fn snapshot() -> VoterSnapshot {
    let levels = [
        Level::Guest,
        Level::Vetter,
        Level::Vetter,
        Level::Manager,
        Level::Tc,
        Level::Admin,
    ];
    let voters = levels
        .iter()
        .enumerate()
        .map(|(i, level)| {
            VoterInfo::new(
                VoterId(10 + i as u32),
                format!("voter-{}", i),
                Organization::new(format!("org-{}", i % 3)),
                *level,
            )
        })
        .collect();
    VoterSnapshot::new(voters, 1)
}

fn ledger_from<'a>(votes: impl Iterator<Item = (&'a u32, &'a usize)>) -> VoteLedger {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut ledger = VoteLedger::new();
    for (voter, value) in votes {
        ledger.set_vote(
            VoterId(10 + voter),
            Some(VALUES[*value].to_string()),
            None,
            at,
            VoteKind::Direct,
        );
    }
    ledger
}

fn input<'a>(
    baseline: Option<&'a BaselineValue>,
    bailey: Option<&'a str>,
    ledger: &'a VoteLedger,
) -> ResolverInput<'a> {
    ResolverInput {
        baseline,
        bailey,
        ledger: Some(ledger),
        lock: None,
    }
}

fn votes_strategy() -> impl Strategy<Value = BTreeMap<u32, usize>> {
    proptest::collection::btree_map(0u32..6, 0usize..VALUES.len(), 0..6)
}

proptest! {
    /// The order votes arrive in does not change the resolution
    #[test]
    fn test_resolution_independent_of_vote_order(
        votes in votes_strategy(),
        baseline in proptest::option::of(0usize..VALUES.len()),
        bailey in proptest::option::of(0usize..VALUES.len()),
    ) {
        let resolver = ConsensusResolver::default();
        let voters = snapshot();
        let baseline = baseline.map(|i| BaselineValue::new(VALUES[i]));
        let bailey = bailey.map(|i| VALUES[i]);

        let forward = ledger_from(votes.iter());
        let backward = ledger_from(votes.iter().rev());
        let first = resolver.resolve(input(baseline.as_ref(), bailey, &forward), &voters).unwrap();
        let second = resolver.resolve(input(baseline.as_ref(), bailey, &backward), &voters).unwrap();
        let again = resolver.resolve(input(baseline.as_ref(), bailey, &forward), &voters).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, &again);
    }

    /// The winner carries the highest score and heads the tally
    #[test]
    fn test_winner_has_top_score(
        votes in votes_strategy(),
        baseline in proptest::option::of(0usize..VALUES.len()),
    ) {
        let resolver = ConsensusResolver::default();
        let voters = snapshot();
        let baseline = baseline.map(|i| BaselineValue::new(VALUES[i]));
        let ledger = ledger_from(votes.iter());
        let resolved = resolver
            .resolve(
                ResolverInput {
                    baseline: baseline.as_ref(),
                    bailey: None,
                    ledger: Some(&ledger),
                    lock: None,
                },
                &voters,
            )
            .unwrap();

        if votes.is_empty() && baseline.is_none() {
            prop_assert_eq!(resolved.source, WinningSource::Missing);
            prop_assert!(resolved.value.is_none());
        } else {
            let top = resolved.tally.iter().map(|entry| entry.score).max().unwrap_or(0);
            prop_assert_eq!(resolved.winning_score(), top);
            prop_assert_eq!(resolved.tally[0].value.as_str(), resolved.value.as_deref().unwrap());
        }
    }

    /// No candidate equal to the inherited value survives normalization
    #[test]
    fn test_bailey_value_never_reported_verbatim(
        votes in votes_strategy(),
        bailey in 0usize..VALUES.len(),
    ) {
        let resolver = ConsensusResolver::default();
        let ledger = ledger_from(votes.iter());
        let resolved = resolver
            .resolve(
                ResolverInput {
                    baseline: None,
                    bailey: Some(VALUES[bailey]),
                    ledger: Some(&ledger),
                    lock: None,
                },
                &snapshot(),
            )
            .unwrap();
        prop_assert!(resolved.tally.iter().all(|entry| entry.value != VALUES[bailey]));
        prop_assert!(resolved.effective_value().is_some());
        if resolved.value.as_deref() == Some(INHERITANCE_MARKER) {
            prop_assert_eq!(resolved.effective_value(), Some(VALUES[bailey]));
        }
    }

    /// Casting and then withdrawing a vote restores the previous resolution
    #[test]
    fn test_vote_then_abstain_restores_resolution(
        votes in votes_strategy(),
        voter in 0u32..6,
        value in 0usize..VALUES.len(),
    ) {
        prop_assume!(!votes.contains_key(&voter));
        let resolver = ConsensusResolver::default();
        let voters = snapshot();
        let baseline = BaselineValue::new("alpha");
        let mut ledger = ledger_from(votes.iter());
        let before = resolver.resolve(input(Some(&baseline), None, &ledger), &voters).unwrap();

        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        ledger.set_vote(VoterId(10 + voter), Some(VALUES[value].to_string()), None, at, VoteKind::Direct);
        ledger.set_vote(VoterId(10 + voter), None, None, at, VoteKind::Direct);
        let after = resolver.resolve(input(Some(&baseline), None, &ledger), &voters).unwrap();
        prop_assert_eq!(before, after);
    }
}
