//! Uniqueness guarantees of a three-member Raft cluster.

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use notary_raft::{LocalNetwork, MemoryLogStorage};
use notary_types::{
    Clock, CommitOutcome, CommitRequest, FixedClock, KeyPair, NodeId, NotaryError, Party, RaftConfig,
    StateRef, TransactionId,
};
use notary_uniqueness::{RaftUniquenessProvider, UniquenessProvider};

struct Cluster {
    net: LocalNetwork<CommitRequest>,
    members: Vec<RaftUniquenessProvider>,
    clock: FixedClock,
}

impl Cluster {
    fn start(size: u8) -> Self {
        let net = LocalNetwork::<CommitRequest>::new();
        let ids: Vec<NodeId> = (1..=size).map(|n| NodeId::from_bytes([n; 32])).collect();
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let members = ids
            .iter()
            .map(|id| {
                RaftUniquenessProvider::start(
                    *id,
                    &ids,
                    RaftConfig::default(),
                    MemoryLogStorage::new(),
                    Arc::new(net.clone()),
                    net.register(*id),
                    Arc::new(clock.clone()),
                )
            })
            .collect();
        Self { net, members, clock }
    }

    async fn leader(&self, exclude: Option<NodeId>) -> &RaftUniquenessProvider {
        for _ in 0..500 {
            if let Some(found) = self
                .members
                .iter()
                .find(|m| Some(m.log().id()) != exclude && m.log().is_leader())
            {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no leader elected");
    }
}

fn state(tx: u8, index: u32) -> StateRef {
    StateRef::new(TransactionId::from_bytes([tx; 32]), index)
}

fn tx(n: u8) -> TransactionId {
    TransactionId::from_bytes([0xB0 + n; 32])
}

fn party(name: &str, seed: u8) -> Party {
    Party::new(name, KeyPair::from_seed([seed; 32]).public_key())
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn overlapping_spends_admit_exactly_one() {
    let cluster = Cluster::start(3);
    let leader = cluster.leader(None).await;

    let first = leader.commit(&[state(1, 0)], tx(1), &party("Alice", 1)).await.unwrap();
    assert!(first.is_committed());

    let second = leader
        .commit(&[state(1, 0), state(2, 0)], tx(2), &party("Bob", 2))
        .await
        .unwrap();
    let CommitOutcome::Conflict(conflict) = second else {
        panic!("expected conflict");
    };
    assert_eq!(conflict.tx_id, tx(2));
    assert_eq!(conflict.state_history.len(), 1);
    assert_eq!(conflict.consumer_of(&state(1, 0)).map(|c| c.tx_id), Some(tx(1)));

    // Every member converges on the same record.
    eventually(|| cluster.members.iter().all(|m| m.snapshot() == leader.snapshot())).await;
    assert!(cluster.members.iter().all(|m| m.consumer_of(&state(2, 0)).is_none()));
}

#[tokio::test(start_paused = true)]
async fn repeated_commit_is_idempotent() {
    let cluster = Cluster::start(3);
    let leader = cluster.leader(None).await;
    let inputs = [state(1, 0), state(1, 1)];

    for _ in 0..2 {
        let outcome = leader.commit(&inputs, tx(1), &party("Alice", 1)).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);
    }
}

#[tokio::test(start_paused = true)]
async fn empty_commit_needs_no_leader() {
    let cluster = Cluster::start(3);
    // No election has had time to finish yet.
    let outcome = cluster.members[0].commit(&[], tx(1), &party("Alice", 1)).await.unwrap();
    assert!(outcome.is_committed());
}

#[tokio::test(start_paused = true)]
async fn follower_commit_fails_retryably() {
    let cluster = Cluster::start(3);
    let leader = cluster.leader(None).await;
    let follower = cluster
        .members
        .iter()
        .find(|m| m.log().id() != leader.log().id())
        .unwrap();
    eventually(|| follower.log().status().leader.is_some()).await;

    let err = follower.commit(&[state(1, 0)], tx(1), &party("Alice", 1)).await.unwrap_err();
    assert!(matches!(err, NotaryError::NotLeader { leader_hint: Some(_) }));
    assert!(err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn replicated_commit_survives_leader_loss() {
    let cluster = Cluster::start(3);
    let old = cluster.leader(None).await;
    let old_id = old.log().id();

    let outcome = old.commit(&[state(1, 0)], tx(1), &party("Alice", 1)).await.unwrap();
    assert!(outcome.is_committed());

    // The leader is cut off before the client hears back.
    cluster.net.isolate(old_id);
    let new = cluster.leader(Some(old_id)).await;
    eventually(|| new.consumer_of(&state(1, 0)).is_some()).await;
    assert_eq!(new.consumer_of(&state(1, 0)).unwrap().consuming.tx_id, tx(1));

    // The client's retry against the new leader is a success, not a conflict.
    let retry = new.commit(&[state(1, 0)], tx(1), &party("Alice", 1)).await.unwrap();
    assert!(retry.is_committed());

    // A rival spend still loses.
    let rival = new.commit(&[state(1, 0)], tx(9), &party("Mallory", 9)).await.unwrap();
    assert!(!rival.is_committed());
}

#[tokio::test(start_paused = true)]
async fn concurrent_commits() {
    let cluster = Cluster::start(3);
    let leader = cluster.leader(None).await;

    // Disjoint inputs: both succeed.
    let (in_a, in_b) = ([state(1, 0)], [state(2, 0)]);
    let (alice, bob) = (party("Alice", 1), party("Bob", 2));
    let (a, b) = tokio::join!(
        leader.commit(&in_a, tx(1), &alice),
        leader.commit(&in_b, tx(2), &bob),
    );
    assert!(a.unwrap().is_committed());
    assert!(b.unwrap().is_committed());

    // Overlapping inputs: exactly one wins and the loser names it.
    let (in_c, in_d) = ([state(3, 0), state(3, 1)], [state(3, 1)]);
    let (carol, dave) = (party("Carol", 3), party("Dave", 4));
    let (c, d) = tokio::join!(
        leader.commit(&in_c, tx(3), &carol),
        leader.commit(&in_d, tx(4), &dave),
    );
    let outcomes = [(tx(3), c.unwrap()), (tx(4), d.unwrap())];
    let winners: Vec<_> = outcomes.iter().filter(|(_, o)| o.is_committed()).collect();
    assert_eq!(winners.len(), 1);
    let winner = winners[0].0;
    let (_, loser) = outcomes.iter().find(|(id, _)| *id != winner).unwrap();
    let CommitOutcome::Conflict(conflict) = loser else {
        panic!("loser must conflict");
    };
    assert_eq!(conflict.consumer_of(&state(3, 1)).map(|c| c.tx_id), Some(winner));
}

#[tokio::test(start_paused = true)]
async fn commit_time_comes_from_the_leaders_clock() {
    let cluster = Cluster::start(3);
    let leader = cluster.leader(None).await;
    let stamped = cluster.clock.now();

    let outcome = leader.commit(&[state(1, 0)], tx(1), &party("Alice", 1)).await.unwrap();
    assert!(outcome.is_committed());
    cluster.clock.advance(chrono::Duration::hours(1));

    eventually(|| cluster.members.iter().all(|m| m.consumer_of(&state(1, 0)).is_some())).await;
    for member in &cluster.members {
        assert_eq!(member.consumer_of(&state(1, 0)).unwrap().committed_at, stamped);
    }
}
