//! End-to-end notarisation against a three-member Raft notary cluster.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use notary_flows::{LinkMode, LocalNotaryNetwork, NotarisationRequester, NotaryService, TimeWindowChecker};
use notary_raft::{LocalNetwork, MemoryLogStorage};
use notary_types::{
    Clock, CommitRequest, FixedClock, KeyPair, NodeId, NotarisableTransaction, NotaryError, NotaryServiceType, Party,
    RaftConfig, RequesterConfig, SignedTransaction, StateRef, TimeWindow, TransactionId,
    attestation_signing_payload,
};
use notary_uniqueness::RaftUniquenessProvider;

struct Member {
    id: NodeId,
    provider: Arc<RaftUniquenessProvider>,
    service: Arc<NotaryService>,
}

struct Cluster {
    raft: LocalNetwork<CommitRequest>,
    sessions: LocalNotaryNetwork,
    members: Vec<Member>,
    clock: Arc<FixedClock>,
}

impl Cluster {
    fn start(service_type: NotaryServiceType) -> Self {
        let raft = LocalNetwork::<CommitRequest>::new();
        let sessions = LocalNotaryNetwork::new();
        let clock = Arc::new(FixedClock::at(Utc::now()));

        let keys: Vec<KeyPair> = (1..=3u8).map(|n| KeyPair::from_seed([n; 32])).collect();
        let ids: Vec<NodeId> = keys.iter().map(|k| NodeId::from_key(k.public_key())).collect();

        let members = keys
            .into_iter()
            .enumerate()
            .map(|(n, key)| {
                let id = ids[n];
                let provider = Arc::new(RaftUniquenessProvider::start(
                    id,
                    &ids,
                    RaftConfig::default(),
                    MemoryLogStorage::new(),
                    Arc::new(raft.clone()),
                    raft.register(id),
                    clock.clone(),
                ));
                let service = Arc::new(NotaryService::new(
                    format!("Notary {}", n + 1),
                    key,
                    service_type,
                    TimeWindowChecker::from_millis(clock.clone(), 30_000),
                    provider.clone(),
                ));
                sessions.register(Arc::clone(&service));
                Member { id, provider, service }
            })
            .collect();

        Self {
            raft,
            sessions,
            members,
            clock,
        }
    }

    fn ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// The notary party every member signs for.
    fn notary_party(&self) -> Party {
        self.members[0].service.legal_identity().clone()
    }

    async fn leader(&self) -> &Member {
        for _ in 0..500 {
            if let Some(found) = self.members.iter().find(|m| m.provider.log().is_leader()) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no leader elected");
    }

    fn requester(&self, members: Vec<NodeId>) -> NotarisationRequester {
        let config = RequesterConfig {
            response_timeout_ms: 1_000,
            max_attempts: 10,
            retry_backoff_ms: 100,
        };
        NotarisationRequester::new(Arc::new(self.sessions.clone()), members, config)
    }
}

struct Wallet {
    key: KeyPair,
}

impl Wallet {
    fn new(seed: u8) -> Self {
        Self {
            key: KeyPair::from_seed([seed; 32]),
        }
    }

    fn party(&self) -> Party {
        Party::new("Alice", self.key.public_key())
    }

    fn spend(&self, inputs: Vec<StateRef>, notary: Party, window: Option<TimeWindow>) -> SignedTransaction {
        let mut tx = NotarisableTransaction::dummy(inputs, self.key.public_key(), notary);
        tx.time_window = window;
        let mut stx = SignedTransaction::new(tx);
        stx.sign_with(&self.key);
        stx
    }
}

fn issued(n: u8) -> StateRef {
    StateRef::new(TransactionId::from_bytes([0xA0 + n; 32]), 0)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn notarises_and_refuses_double_spend() {
    let cluster = Cluster::start(NotaryServiceType::RaftSimple);
    cluster.leader().await;
    let alice = Wallet::new(10);
    let requester = cluster.requester(cluster.ids());

    let first = alice.spend(vec![issued(1)], cluster.notary_party(), None);
    let signature = requester
        .notarise_transaction(&first, alice.party(), &alice.key, false)
        .await
        .unwrap();
    assert!(cluster.ids().contains(&NodeId::from_key(signature.by)));
    signature.verify(&attestation_signing_payload(&first.id())).unwrap();

    let second = alice.spend(vec![issued(1), issued(2)], cluster.notary_party(), None);
    let err = requester
        .notarise_transaction(&second, alice.party(), &alice.key, false)
        .await
        .unwrap_err();
    let NotaryError::Conflict(conflict) = err else {
        panic!("expected conflict, got {err:?}");
    };
    assert_eq!(conflict.tx_id, second.id());
    assert_eq!(conflict.consumer_of(&issued(1)).map(|c| c.tx_id), Some(first.id()));
    assert!(conflict.consumer_of(&issued(2)).is_none());

    // The losing transaction left nothing behind on any member.
    eventually(|| cluster.members.iter().all(|m| m.provider.consumer_of(&issued(1)).is_some())).await;
    assert!(cluster.members.iter().all(|m| m.provider.consumer_of(&issued(2)).is_none()));
}

#[tokio::test(start_paused = true)]
async fn follower_redirects_to_leader() {
    let cluster = Cluster::start(NotaryServiceType::RaftSimple);
    let leader = cluster.leader().await.id;
    let mut order = cluster.ids();
    order.sort_by_key(|id| *id == leader);

    let alice = Wallet::new(10);
    let stx = alice.spend(vec![issued(1)], cluster.notary_party(), None);
    let signature = cluster
        .requester(order)
        .notarise_transaction(&stx, alice.party(), &alice.key, false)
        .await
        .unwrap();
    assert_eq!(NodeId::from_key(signature.by), leader);
}

#[tokio::test(start_paused = true)]
async fn expired_time_window_is_rejected() {
    let cluster = Cluster::start(NotaryServiceType::RaftSimple);
    cluster.leader().await;
    let alice = Wallet::new(10);
    let now = cluster.clock.now();

    let late = alice.spend(
        vec![issued(1)],
        cluster.notary_party(),
        Some(TimeWindow::until_only(now - chrono::Duration::seconds(31))),
    );
    let err = cluster
        .requester(cluster.ids())
        .notarise_transaction(&late, alice.party(), &alice.key, false)
        .await
        .unwrap_err();
    assert!(matches!(err, NotaryError::TimeWindowInvalid(id) if id == late.id()));
    assert!(cluster.members.iter().all(|m| m.provider.consumer_of(&issued(1)).is_none()));

    // Within tolerance of the local clock the same shape passes.
    let on_time = alice.spend(
        vec![issued(1)],
        cluster.notary_party(),
        Some(TimeWindow::until_only(now - chrono::Duration::seconds(29))),
    );
    cluster
        .requester(cluster.ids())
        .notarise_transaction(&on_time, alice.party(), &alice.key, false)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn validating_cluster_checks_signatures() {
    let cluster = Cluster::start(NotaryServiceType::RaftValidating);
    cluster.leader().await;
    let alice = Wallet::new(10);
    let requester = cluster.requester(cluster.ids());

    let unsigned = SignedTransaction::new(NotarisableTransaction::dummy(
        vec![issued(1)],
        alice.key.public_key(),
        cluster.notary_party(),
    ));
    let err = requester
        .notarise_transaction(&unsigned, alice.party(), &alice.key, true)
        .await
        .unwrap_err();
    assert!(matches!(err, NotaryError::InvalidSignature { .. }));

    let signed = alice.spend(vec![issued(1)], cluster.notary_party(), None);
    requester
        .notarise_transaction(&signed, alice.party(), &alice.key, true)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn lost_reply_is_retried_idempotently() {
    let cluster = Cluster::start(NotaryServiceType::RaftSimple);
    let leader = cluster.leader().await;
    let leader_id = leader.id;
    let mut order = cluster.ids();
    order.sort_by_key(|id| *id != leader_id);

    cluster.sessions.set_link(leader_id, LinkMode::DropReplies);
    let alice = Wallet::new(10);
    let stx = alice.spend(vec![issued(1)], cluster.notary_party(), None);
    let requester = cluster.requester(order);
    let party = alice.party();
    let pending = requester.notarise_transaction(&stx, party, &alice.key, false);
    tokio::pin!(pending);

    // The first attempt commits on the leader but its reply is lost.
    let provider = Arc::clone(&leader.provider);
    tokio::select! {
        result = &mut pending => panic!("finished before the reply was lost: {result:?}"),
        () = eventually(|| provider.consumer_of(&issued(1)).is_some()) => {}
    }
    cluster.sessions.set_link(leader_id, LinkMode::Up);

    let signature = pending.await.unwrap();
    assert_eq!(NodeId::from_key(signature.by), leader_id);
    assert_eq!(provider.consumer_of(&issued(1)).map(|c| c.consuming.tx_id), Some(stx.id()));
}

#[tokio::test(start_paused = true)]
async fn leader_failure_is_survived() {
    let cluster = Cluster::start(NotaryServiceType::RaftSimple);
    let old_leader = cluster.leader().await.id;
    let mut order = cluster.ids();
    order.sort_by_key(|id| *id != old_leader);

    cluster.raft.isolate(old_leader);
    cluster.sessions.set_link(old_leader, LinkMode::Down);

    let alice = Wallet::new(10);
    let stx = alice.spend(vec![issued(1)], cluster.notary_party(), None);
    let signature = cluster
        .requester(order)
        .notarise_transaction(&stx, alice.party(), &alice.key, false)
        .await
        .unwrap();

    let signer = NodeId::from_key(signature.by);
    assert_ne!(signer, old_leader);
    signature.verify(&attestation_signing_payload(&stx.id())).unwrap();

    let survivors: Vec<&Member> = cluster.members.iter().filter(|m| m.id != old_leader).collect();
    eventually(|| survivors.iter().all(|m| m.provider.consumer_of(&issued(1)).is_some())).await;
    assert!(
        cluster
            .members
            .iter()
            .find(|m| m.id == old_leader)
            .is_some_and(|m| m.provider.consumer_of(&issued(1)).is_none())
    );
}
