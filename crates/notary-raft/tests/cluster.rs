//! Multi-member clusters on the in-process network.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use notary_raft::{
    EntryMeta, FileLogStorage, LocalNetwork, MemoryLogStorage, RaftHandle, RaftNode, StateMachine,
};
use notary_types::{NodeId, NotaryError, RaftConfig};

/// Records every applied command with its index.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<(u64, String)>>>);

impl Journal {
    fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }
}

impl StateMachine<String> for Journal {
    type Output = u64;

    fn apply(&mut self, meta: EntryMeta, command: &String) -> u64 {
        self.0.lock().unwrap().push((meta.index, command.clone()));
        meta.index
    }
}

struct Member {
    id: NodeId,
    handle: RaftHandle<String, u64>,
    journal: Journal,
}

fn node(n: u8) -> NodeId {
    NodeId::from_bytes([n; 32])
}

fn start_cluster(size: u8, net: &LocalNetwork<String>) -> Vec<Member> {
    let ids: Vec<NodeId> = (1..=size).map(node).collect();
    ids.iter()
        .map(|id| {
            let journal = Journal::default();
            let handle = RaftNode::spawn(
                *id,
                &ids,
                RaftConfig::default(),
                MemoryLogStorage::new(),
                journal.clone(),
                Arc::new(net.clone()),
                net.register(*id),
            );
            Member {
                id: *id,
                handle,
                journal,
            }
        })
        .collect()
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

/// Wait for a leader among `members` that is not in `exclude`.
async fn leader_among<'a>(members: &'a [Member], exclude: &[NodeId]) -> &'a Member {
    let mut found = None;
    eventually(|| {
        found = members
            .iter()
            .filter(|m| !exclude.contains(&m.id))
            .find(|m| m.handle.is_leader());
        found.is_some()
    })
    .await;
    found.unwrap()
}

#[tokio::test(start_paused = true)]
async fn committed_commands_reach_every_member_in_order() {
    let net = LocalNetwork::new();
    let members = start_cluster(3, &net);
    let leader = leader_among(&members, &[]).await;

    for cmd in ["a", "b", "c"] {
        leader.handle.propose(cmd.to_string()).await.unwrap();
    }

    eventually(|| members.iter().all(|m| m.journal.commands().len() == 3)).await;
    for member in &members {
        assert_eq!(member.journal.commands(), vec!["a", "b", "c"]);
    }
}

#[tokio::test(start_paused = true)]
async fn follower_redirects_to_leader() {
    let net = LocalNetwork::new();
    let members = start_cluster(3, &net);
    let leader = leader_among(&members, &[]).await;
    let follower = members.iter().find(|m| m.id != leader.id).unwrap();
    eventually(|| follower.handle.status().leader == Some(leader.id)).await;

    match follower.handle.propose("x".into()).await {
        Err(NotaryError::NotLeader { leader_hint }) => assert_eq!(leader_hint, Some(leader.id)),
        other => panic!("expected redirect, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn committed_entries_survive_leader_isolation() {
    let net = LocalNetwork::new();
    let members = start_cluster(3, &net);
    let old = leader_among(&members, &[]).await;
    old.handle.propose("before".into()).await.unwrap();

    net.isolate(old.id);
    let new = leader_among(&members, &[old.id]).await;
    assert_ne!(new.id, old.id);
    assert!(new.handle.status().term > old.handle.status().term);
    new.handle.propose("after".into()).await.unwrap();

    net.heal(old.id);
    eventually(|| members.iter().all(|m| m.journal.commands() == ["before", "after"])).await;
    eventually(|| !old.handle.is_leader()).await;
}

#[tokio::test(start_paused = true)]
async fn minority_cannot_commit() {
    let net = LocalNetwork::new();
    let members = start_cluster(3, &net);
    let leader = leader_among(&members, &[]).await;
    for member in members.iter().filter(|m| m.id != leader.id) {
        net.isolate(member.id);
    }

    let pending = tokio::time::timeout(Duration::from_secs(2), leader.handle.propose("lonely".into())).await;
    assert!(pending.is_err(), "a lone leader must not commit");
    assert!(leader.journal.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn file_storage_replays_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = node(1);
    let net = LocalNetwork::<String>::new();

    {
        let handle = RaftNode::spawn(
            id,
            &[id],
            RaftConfig::default(),
            FileLogStorage::open(dir.path()).unwrap(),
            Journal::default(),
            Arc::new(net.clone()),
            net.register(id),
        );
        handle.wait_for_leader(Duration::from_secs(5)).await.unwrap();
        handle.propose("persisted".into()).await.unwrap();
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let journal = Journal::default();
    let handle = RaftNode::spawn(
        id,
        &[id],
        RaftConfig::default(),
        FileLogStorage::open(dir.path()).unwrap(),
        journal.clone(),
        Arc::new(net.clone()),
        net.register(id),
    );
    handle.wait_for_leader(Duration::from_secs(5)).await.unwrap();
    eventually(|| journal.commands() == ["persisted"]).await;
    assert!(handle.status().term >= 2);
}
