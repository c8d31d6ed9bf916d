//! In-process Raft notary cluster: notarise a spend, then try to spend the
//! same state again.

use std::{sync::Arc, time::Duration};

use notary_flows::{LocalNotaryNetwork, NotarisationRequester, NotaryService, TimeWindowChecker};
use notary_raft::{LocalNetwork, MemoryLogStorage, RaftStatus};
use notary_types::{
    Clock, CommitRequest, KeyPair, NodeId, NotarisableTransaction, NotaryError, NotaryServiceType, OutputState, Party,
    RaftConfig, RequesterConfig, Result, SignedTransaction, StateRef, SystemClock, TimeWindow, TransactionId,
    constants::DEFAULT_TIME_TOLERANCE_MS,
};
use notary_uniqueness::RaftUniquenessProvider;

const LEADER_WAIT: Duration = Duration::from_secs(10);

/// What the demo observed.
#[derive(Debug)]
pub struct DemoReport {
    pub spend: TransactionId,
    pub signed_by: NodeId,
    pub double_spend: TransactionId,
    pub rejection: NotaryError,
    pub statuses: Vec<RaftStatus>,
}

pub async fn run(members: u8) -> Result<DemoReport> {
    if members == 0 {
        return Err(NotaryError::Configuration("demo needs at least one member".into()));
    }

    let raft = LocalNetwork::<CommitRequest>::new();
    let sessions = LocalNotaryNetwork::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let keys: Vec<KeyPair> = (1..=members).map(|n| KeyPair::from_seed([n; 32])).collect();
    let ids: Vec<NodeId> = keys.iter().map(|k| NodeId::from_key(k.public_key())).collect();
    let notary = Party::new("Demo Notary", keys[0].public_key());

    let mut providers = Vec::with_capacity(ids.len());
    for (key, id) in keys.into_iter().zip(&ids) {
        let provider = Arc::new(RaftUniquenessProvider::start(
            *id,
            &ids,
            RaftConfig::default(),
            MemoryLogStorage::new(),
            Arc::new(raft.clone()),
            raft.register(*id),
            Arc::clone(&clock),
        ));
        let service = NotaryService::new(
            notary.name.clone(),
            key,
            NotaryServiceType::RaftSimple,
            TimeWindowChecker::from_millis(Arc::clone(&clock), DEFAULT_TIME_TOLERANCE_MS),
            provider.clone(),
        );
        sessions.register(Arc::new(service));
        providers.push(provider);
    }

    let leader = providers[0].log().wait_for_leader(LEADER_WAIT).await?;
    tracing::info!(leader = %leader, members, "Demo cluster elected a leader");

    let alice = KeyPair::from_seed([0xA1; 32]);
    let alice_party = Party::new("Alice", alice.public_key());
    let issued = StateRef::new(TransactionId::hash_of(b"demo issuance"), 0);
    let requester = NotarisationRequester::new(Arc::new(sessions), ids.clone(), RequesterConfig::default());

    let now = clock.now();
    let spend = transfer(&alice, issued, &notary, 1, TimeWindow::with_tolerance(now, chrono::Duration::seconds(60)));
    let signature = requester
        .notarise_transaction(&spend, alice_party.clone(), &alice, false)
        .await?;
    let signed_by = NodeId::from_key(signature.by);
    tracing::info!(tx_id = %spend.id(), signed_by = %signed_by, "Spend notarised");

    let double_spend = transfer(&alice, issued, &notary, 2, TimeWindow::unbounded());
    let rejection = match requester
        .notarise_transaction(&double_spend, alice_party, &alice, false)
        .await
    {
        Ok(_) => {
            return Err(NotaryError::Internal(format!(
                "double spend {} of {issued} was notarised",
                double_spend.id()
            )));
        }
        Err(err @ NotaryError::Conflict(_)) => err,
        Err(err) => return Err(err),
    };
    tracing::info!(tx_id = %double_spend.id(), error = %rejection, "Double spend rejected");

    let statuses = providers.iter().map(|p| p.log().status()).collect();
    for provider in &providers {
        provider.log().shutdown();
    }

    Ok(DemoReport {
        spend: spend.id(),
        signed_by,
        double_spend: double_spend.id(),
        rejection,
        statuses,
    })
}

/// Move `input` to a new state owned by `owner`.
fn transfer(owner: &KeyPair, input: StateRef, notary: &Party, salt: u64, window: TimeWindow) -> SignedTransaction {
    let tx = NotarisableTransaction {
        inputs: vec![input],
        outputs: vec![OutputState {
            contract: "demo.cash".into(),
            owner: owner.public_key(),
            data: salt.to_be_bytes().to_vec(),
        }],
        required_signers: vec![owner.public_key()],
        notary: notary.clone(),
        time_window: Some(window),
        salt,
    };
    let mut stx = SignedTransaction::new(tx);
    stx.sign_with(owner);
    stx
}
