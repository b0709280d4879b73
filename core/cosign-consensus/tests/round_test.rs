//! Leader and member roles driven end to end over an in-memory router

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cosign_consensus::message::{Challenge, Commitment, Fail, Response, Setup};
use cosign_consensus::network::network_error;
use cosign_consensus::schnorr::{combine_points, combine_sigs, generate_commitment, hash_message, partial_sign, verify, Point};
use cosign_consensus::*;
use cosign_state::gas_limits::BLOCK_GAS_LIMIT;
use cosign_state::Block;
use parking_lot::RwLock;
use proptest::prelude::*;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

const WAIT: Duration = Duration::from_millis(1500);

/// Routes encoded messages to each node's member or leader queue, or to a
/// tap when the test drives that peer by hand
#[derive(Default)]
struct Hub {
    nodes: RwLock<HashMap<PeerId, (MessageQueue, MessageQueue)>>,
    taps: RwLock<HashMap<PeerId, mpsc::UnboundedSender<ConsensusMessage>>>,
}

impl Hub {
    fn register(&self, peer: PeerId) -> (MessageQueue, MessageQueue) {
        let queues = (MessageQueue::new(64), MessageQueue::new(64));
        self.nodes.write().insert(peer, queues.clone());
        queues
    }

    fn tap(&self, peer: &PeerId) -> mpsc::UnboundedReceiver<ConsensusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.taps.write().insert(peer.clone(), tx);
        rx
    }
}

struct HubSender {
    from: PeerId,
    hub: Arc<Hub>,
}

impl Sender for HubSender {
    fn send_async(&self, peer: &PeerId, code: u64, payload: Vec<u8>) -> PendingSend {
        let (tx, rx) = oneshot::channel();
        if let Some(tap) = self.hub.taps.read().get(peer) {
            let result = ConsensusMessage::decode(code, &payload).map(|message| {
                let _ = tap.send(message);
            });
            let _ = tx.send(result);
            return rx;
        }
        let result = match self.hub.nodes.read().get(peer) {
            None => Err(network_error(format!("unknown peer {peer}"))),
            Some((member_queue, leader_queue)) => ConsensusMessage::decode(code, &payload).map(|message| {
                let queue = if message.is_for_member() { member_queue } else { leader_queue };
                queue.offer(Inbound {
                    peer: self.from.clone(),
                    message,
                });
            }),
        };
        let _ = tx.send(result);
        rx
    }
}

struct Node {
    key: PrivateKey,
    peer: PeerId,
    sender: Arc<dyn Sender>,
    member_queue: MessageQueue,
    leader_queue: MessageQueue,
}

fn spawn_network(n: usize) -> (Arc<Hub>, Vec<Node>) {
    let hub = Arc::new(Hub::default());
    let nodes = (0..n)
        .map(|i| {
            let peer = PeerId(format!("node-{i}"));
            let (member_queue, leader_queue) = hub.register(peer.clone());
            Node {
                key: PrivateKey::generate(),
                sender: Arc::new(HubSender {
                    from: peer.clone(),
                    hub: hub.clone(),
                }),
                peer,
                member_queue,
                leader_queue,
            }
        })
        .collect();
    (hub, nodes)
}

fn member_view(nodes: &[Node], me: usize, leader: usize) -> Vec<MemberInfo> {
    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| MemberInfo {
            producer: Producer {
                pubkey: node.key.public_key(),
                node: node.peer.clone(),
            },
            index,
            is_me: index == me,
            is_online: true,
            is_leader: index == leader,
        })
        .collect()
}

fn proposal(height: u64, coinbase: String) -> Block {
    Block::new(height, 1_700_000_000, [7u8; 32], Vec::new(), BLOCK_GAS_LIMIT, 0, coinbase).unwrap()
}

fn member(nodes: &[Node], me: usize, leader: usize, height: u64) -> Member {
    let node = &nodes[me];
    Member::new(
        node.key.clone(),
        node.sender.clone(),
        &member_view(nodes, me, leader),
        height,
        WAIT,
        node.member_queue.clone(),
    )
    .unwrap()
}

fn accept<M: 'static>() -> Validator<M> {
    Box::new(|_: &M| -> ConsensusResult<()> { Ok(()) })
}

fn block_convertor() -> Convertor<Block> {
    Box::new(|bytes: &[u8]| Block::decode(bytes).map_err(ConsensusError::from))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_producers_complete_both_rounds() {
    let (_hub, nodes) = spawn_network(4);
    let nodes = Arc::new(nodes);
    let height = 1;
    let leader_index = 1;
    let block = proposal(height, account_address(&nodes[leader_index].key.public_key()));

    let mut handles = Vec::new();
    for me in [0usize, 2, 3] {
        let nodes = nodes.clone();
        handles.push(tokio::spawn(async move {
            let mut member = member(&nodes, me, leader_index, height);
            let block = member
                .process_consensus(Round::Proposal, block_convertor(), accept())
                .await?;
            member.reset();
            let completed = member
                .process_consensus(
                    Round::Confirmation,
                    Box::new(|bytes: &[u8]| CompletedBlockMessage::decode(bytes)),
                    accept(),
                )
                .await?;
            Ok::<_, ConsensusError>((block, completed))
        }));
    }

    let node = &nodes[leader_index];
    let mut leader = Leader::new(
        node.key.clone(),
        node.sender.clone(),
        member_view(&nodes, leader_index, leader_index),
        min_member(4),
        height,
        WAIT,
        node.leader_queue.clone(),
    )
    .unwrap();

    let outcome = leader.process_consensus(&block, Round::Proposal).await.unwrap();
    assert!(outcome.bitmap.count() >= min_member(4));
    assert!(outcome.bitmap.is_marked(leader_index));

    let signer_keys: Vec<_> = outcome.bitmap.indices().map(|i| nodes[i].key.public_key()).collect();
    let message = hash_message(&block.as_sign_message().unwrap());
    assert!(verify(&combine_points(&signer_keys), &message, &outcome.signature));

    let completed = CompletedBlockMessage {
        multi_sig: MultiSignature::new(outcome.signature, leader_index, outcome.bitmap),
        state_root: [9u8; 32],
    };
    leader.reset();
    let second = leader.process_consensus(&completed, Round::Confirmation).await.unwrap();
    assert!(second.bitmap.count() >= min_member(4));

    // every member in the confirmation bitmap signed both rounds; one that
    // committed after quorum may be left waiting
    let mut finished = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok((signed_block, signed_completed)) => {
                assert_eq!(signed_block.hash(), block.hash());
                assert_eq!(signed_completed, completed);
                finished += 1;
            }
            Err(e) => assert!(matches!(e, ConsensusError::Timeout), "got {e:?}"),
        }
    }
    assert!(finished >= second.bitmap.count() - 1);
}

#[tokio::test]
async fn test_member_rejects_setup_from_wrong_leader() {
    let (_hub, nodes) = spawn_network(4);
    let height = 3;
    let mut member = member(&nodes, 0, 2, height);

    let block = proposal(height, "unused".to_string());
    nodes[0].member_queue.offer(Inbound {
        peer: nodes[1].peer.clone(),
        message: ConsensusMessage::Setup(Setup::new(height, Round::Proposal, block.encode().unwrap())),
    });

    let err = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::LeaderMistake), "got {err:?}");
    assert_eq!(member.state(), RoundState::Error);
}

#[tokio::test]
async fn test_member_reports_height_mismatch() {
    let (_hub, nodes) = spawn_network(4);
    let mut member = member(&nodes, 0, 1, 3);

    let block = proposal(5, "unused".to_string());
    nodes[0].member_queue.offer(Inbound {
        peer: nodes[1].peer.clone(),
        message: ConsensusMessage::Setup(Setup::new(5, Round::Proposal, block.encode().unwrap())),
    });

    let err = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap_err();
    match err {
        ConsensusError::HighHeight { local, received } => assert_eq!((local, received), (3, 5)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_member_surfaces_validation_failure() {
    let (_hub, nodes) = spawn_network(4);
    let mut member = member(&nodes, 2, 1, 3);

    let block = proposal(3, "unused".to_string());
    nodes[2].member_queue.offer(Inbound {
        peer: nodes[1].peer.clone(),
        message: ConsensusMessage::Setup(Setup::new(3, Round::Proposal, block.encode().unwrap())),
    });

    let err = member
        .process_consensus(
            Round::Proposal,
            block_convertor(),
            Box::new(|_: &Block| -> ConsensusResult<()> { Err(ConsensusError::GasUsed { expected: 1, actual: 2 }) }),
        )
        .await
        .unwrap_err();
    match err {
        ConsensusError::ValidateMsg(cause) => assert!(matches!(*cause, ConsensusError::GasUsed { .. })),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_member_adopts_leader_fail_reason() {
    let (_hub, nodes) = spawn_network(4);
    let mut member = member(&nodes, 0, 1, 3);

    let block = proposal(3, "unused".to_string());
    nodes[0].member_queue.offer(Inbound {
        peer: nodes[1].peer.clone(),
        message: ConsensusMessage::Setup(Setup::new(3, Round::Proposal, block.encode().unwrap())),
    });
    nodes[0].member_queue.offer(Inbound {
        peer: nodes[1].peer.clone(),
        message: ConsensusMessage::Fail(Fail::new(3, Round::Proposal, ConsensusError::WaitCommit.to_string())),
    });

    let err = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::WaitCommit), "got {err:?}");
}

#[tokio::test]
async fn test_member_times_out_without_setup() {
    let (_hub, nodes) = spawn_network(2);
    let node = &nodes[0];
    let mut member = Member::new(
        node.key.clone(),
        node.sender.clone(),
        &member_view(&nodes, 0, 1),
        3,
        Duration::from_millis(50),
        node.member_queue.clone(),
    )
    .unwrap();

    let err = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::Timeout));
    assert_eq!(member.state(), RoundState::WaitSetupTimeout);
}

#[tokio::test]
async fn test_member_stops_waiting_when_chain_advances() {
    let (_hub, nodes) = spawn_network(4);
    let (height_tx, height_rx) = tokio::sync::watch::channel(2u64);
    let mut member = member(&nodes, 0, 1, 3).with_chain_height(height_rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = height_tx.send(3);
    });

    let err = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap_err();
    match err {
        ConsensusError::ChainAdvanced { local, best } => assert_eq!((local, best), (3, 3)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_leader_fails_fast_without_quorum_commitments() {
    let (_hub, nodes) = spawn_network(4);
    let node = &nodes[0];
    let mut view = member_view(&nodes, 0, 0);
    // only one other producer is online and it never answers
    view[2].is_online = false;
    view[3].is_online = false;

    let mut leader = Leader::new(
        node.key.clone(),
        node.sender.clone(),
        view,
        min_member(4),
        4,
        Duration::from_millis(100),
        node.leader_queue.clone(),
    )
    .unwrap();

    let block = proposal(4, account_address(&node.key.public_key()));
    let err = leader.process_consensus(&block, Round::Proposal).await.unwrap_err();
    assert!(matches!(err, ConsensusError::WaitCommit), "got {err:?}");
}

fn leader(nodes: &[Node], me: usize, height: u64, wait: Duration) -> Leader {
    let node = &nodes[me];
    Leader::new(
        node.key.clone(),
        node.sender.clone(),
        member_view(nodes, me, me),
        min_member(nodes.len()),
        height,
        wait,
        node.leader_queue.clone(),
    )
    .unwrap()
}

async fn next_message(tap: &mut mpsc::UnboundedReceiver<ConsensusMessage>) -> ConsensusMessage {
    tokio::time::timeout(WAIT, tap.recv()).await.unwrap().unwrap()
}

fn from_member(nodes: &[Node], index: usize, message: ConsensusMessage) -> Inbound {
    Inbound {
        peer: nodes[index].peer.clone(),
        message,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_online_producer_does_not_stall_round() {
    let (_hub, nodes) = spawn_network(4);
    let nodes = Arc::new(nodes);
    let height = 1;
    let leader_index = 1;
    let block = proposal(height, account_address(&nodes[leader_index].key.public_key()));

    // node-3 is online in everyone's view but never runs
    let mut handles = Vec::new();
    for me in [0usize, 2] {
        let nodes = nodes.clone();
        handles.push(tokio::spawn(async move {
            let mut member = member(&nodes, me, leader_index, height);
            let block = member
                .process_consensus(Round::Proposal, block_convertor(), accept())
                .await?;
            member.reset();
            member
                .process_consensus(
                    Round::Confirmation,
                    Box::new(|bytes: &[u8]| CompletedBlockMessage::decode(bytes)),
                    accept(),
                )
                .await?;
            Ok::<_, ConsensusError>(block)
        }));
    }

    let started = Instant::now();
    let mut leader = leader(&nodes, leader_index, height, WAIT);
    let outcome = leader.process_consensus(&block, Round::Proposal).await.unwrap();
    assert_eq!(outcome.bitmap.count(), 3);
    assert!(!outcome.bitmap.is_marked(3));

    leader.reset();
    let completed = CompletedBlockMessage {
        multi_sig: MultiSignature::new(outcome.signature, leader_index, outcome.bitmap),
        state_root: [1u8; 32],
    };
    let second = leader.process_consensus(&completed, Round::Confirmation).await.unwrap();
    assert_eq!(second.bitmap.count(), 3);
    assert!(started.elapsed() < WAIT, "quorum should end the commit wait early");

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().hash(), block.hash());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_member_retry_ignores_fail_from_earlier_attempt() {
    let (_hub, nodes) = spawn_network(2);
    let height = 3;
    let block = proposal(height, account_address(&nodes[1].key.public_key()));

    // left behind by a previous attempt at this height
    nodes[0].member_queue.offer(from_member(
        &nodes,
        1,
        ConsensusMessage::Fail(Fail::new(height, Round::Proposal, ConsensusError::WaitResponse.to_string())),
    ));

    let mut member = member(&nodes, 0, 1, height);
    let mut leader = leader(&nodes, 1, height, WAIT);
    let (signed, outcome) = tokio::join!(
        member.process_consensus(Round::Proposal, block_convertor(), accept()),
        leader.process_consensus(&block, Round::Proposal),
    );

    assert_eq!(signed.unwrap().hash(), block.hash());
    assert_eq!(outcome.unwrap().bitmap.count(), 2);
}

#[tokio::test]
async fn test_leader_ignores_commitment_for_other_height() {
    let (hub, nodes) = spawn_network(2);
    let mut tap = hub.tap(&nodes[1].peer);
    let mut leader = leader(&nodes, 0, 4, Duration::from_millis(200));
    let block = proposal(4, account_address(&nodes[0].key.public_key()));
    let message = hash_message(&block.as_sign_message().unwrap());

    let script = async {
        assert!(matches!(next_message(&mut tap).await, ConsensusMessage::Setup(_)));
        let (_, q) = generate_commitment(&nodes[1].key, &message).unwrap();
        let commitment = Commitment::new(5, Round::Proposal, nodes[1].key.public_key(), q);
        nodes[0]
            .leader_queue
            .offer(from_member(&nodes, 1, ConsensusMessage::Commitment(commitment)));

        // no challenge follows; the round is abandoned
        match next_message(&mut tap).await {
            ConsensusMessage::Fail(fail) => assert_eq!(fail.reason, ConsensusError::WaitCommit.to_string()),
            other => panic!("unexpected {other:?}"),
        }
    };

    let (result, ()) = tokio::join!(leader.process_consensus(&block, Round::Proposal), script);
    assert!(matches!(result, Err(ConsensusError::WaitCommit)), "got {result:?}");
}

#[tokio::test]
async fn test_leader_ignores_response_for_other_height() {
    let (hub, nodes) = spawn_network(2);
    let mut tap = hub.tap(&nodes[1].peer);
    let mut leader = leader(&nodes, 0, 4, Duration::from_millis(200));
    let block = proposal(4, account_address(&nodes[0].key.public_key()));
    let message = hash_message(&block.as_sign_message().unwrap());
    let key = nodes[1].key.clone();

    let script = async {
        assert!(matches!(next_message(&mut tap).await, ConsensusMessage::Setup(_)));
        let (nonce, q) = generate_commitment(&key, &message).unwrap();
        nodes[0].leader_queue.offer(from_member(
            &nodes,
            1,
            ConsensusMessage::Commitment(Commitment::new(4, Round::Proposal, key.public_key(), q)),
        ));

        let ConsensusMessage::Challenge(challenge) = next_message(&mut tap).await else {
            panic!("expected a challenge");
        };
        let s = partial_sign(&key, nonce, &challenge.r, &challenge.sigma_q);
        nodes[0].leader_queue.offer(from_member(
            &nodes,
            1,
            ConsensusMessage::Response(Response::new(5, Round::Proposal, key.public_key(), s)),
        ));
    };

    let (result, ()) = tokio::join!(leader.process_consensus(&block, Round::Proposal), script);
    assert!(matches!(result, Err(ConsensusError::WaitResponse)), "got {result:?}");
}

#[tokio::test]
async fn test_leader_rejects_partial_signature_over_other_commitment() {
    let (hub, nodes) = spawn_network(2);
    let mut tap = hub.tap(&nodes[1].peer);
    let mut leader = leader(&nodes, 0, 4, WAIT);
    let block = proposal(4, account_address(&nodes[0].key.public_key()));
    let message = hash_message(&block.as_sign_message().unwrap());
    let key = nodes[1].key.clone();

    let script = async {
        assert!(matches!(next_message(&mut tap).await, ConsensusMessage::Setup(_)));
        let (nonce, q) = generate_commitment(&key, &message).unwrap();
        nodes[0].leader_queue.offer(from_member(
            &nodes,
            1,
            ConsensusMessage::Commitment(Commitment::new(4, Round::Proposal, key.public_key(), q)),
        ));

        let ConsensusMessage::Challenge(challenge) = next_message(&mut tap).await else {
            panic!("expected a challenge");
        };
        // signed with a nonce the leader never saw, so R differs
        let (stray, _) = generate_commitment(&key, &message).unwrap();
        let forged = partial_sign(&key, stray, &challenge.r, &challenge.sigma_q);
        let honest = partial_sign(&key, nonce, &challenge.r, &challenge.sigma_q);
        for s in [forged, honest] {
            nodes[0].leader_queue.offer(from_member(
                &nodes,
                1,
                ConsensusMessage::Response(Response::new(4, Round::Proposal, key.public_key(), s)),
            ));
        }
    };

    let (result, ()) = tokio::join!(leader.process_consensus(&block, Round::Proposal), script);
    let outcome = result.unwrap();
    assert_eq!(outcome.bitmap.count(), 2);
    let keys = [nodes[0].key.public_key(), key.public_key()];
    assert!(verify(&combine_points(&keys), &message, &outcome.signature));
}

#[tokio::test]
async fn test_member_reports_low_height() {
    let (_hub, nodes) = spawn_network(4);
    let mut member = member(&nodes, 0, 1, 3);

    let block = proposal(2, "unused".to_string());
    nodes[0].member_queue.offer(from_member(
        &nodes,
        1,
        ConsensusMessage::Setup(Setup::new(2, Round::Proposal, block.encode().unwrap())),
    ));

    let err = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap_err();
    match err {
        ConsensusError::LowHeight { local, received } => assert_eq!((local, received), (3, 2)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_member_rejects_challenge_for_other_message() {
    let (_hub, nodes) = spawn_network(4);
    let mut member = member(&nodes, 0, 1, 3);

    let block = proposal(3, "unused".to_string());
    let challenge = Challenge::new(3, Round::Proposal, nodes[1].key.public_key(), Point::identity(), [0u8; 32]);
    for message in [
        ConsensusMessage::Setup(Setup::new(3, Round::Proposal, block.encode().unwrap())),
        ConsensusMessage::Challenge(challenge),
    ] {
        nodes[0].member_queue.offer(from_member(&nodes, 1, message));
    }

    let err = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap_err();
    assert!(matches!(err, ConsensusError::Challenge), "got {err:?}");
}

#[tokio::test]
async fn test_member_drops_messages_for_wrong_state() {
    let (_hub, nodes) = spawn_network(4);
    let mut member = member(&nodes, 0, 1, 3);

    let block = proposal(3, "first".to_string());
    let replacement = proposal(3, "second".to_string());
    let message = hash_message(&block.as_sign_message().unwrap());
    let challenge = Challenge::new(3, Round::Proposal, nodes[1].key.public_key(), Point::identity(), message);

    // an early challenge and a second setup must not move the round
    for inbound in [
        ConsensusMessage::Challenge(challenge.clone()),
        ConsensusMessage::Setup(Setup::new(3, Round::Proposal, block.encode().unwrap())),
        ConsensusMessage::Setup(Setup::new(3, Round::Proposal, replacement.encode().unwrap())),
        ConsensusMessage::Challenge(challenge),
    ] {
        nodes[0].member_queue.offer(from_member(&nodes, 1, inbound));
    }

    let signed = member
        .process_consensus(Round::Proposal, block_convertor(), accept())
        .await
        .unwrap();
    assert_eq!(signed.hash(), block.hash());
    assert_ne!(signed.hash(), replacement.hash());
    assert_eq!(member.state(), RoundState::Completed);
}

fn cosign_in_order(keys: &[PrivateKey], order: &[usize], message: &[u8]) -> schnorr::Signature {
    let (nonces, commitments): (Vec<_>, Vec<Point>) = keys
        .iter()
        .map(|k| generate_commitment(k, message).unwrap())
        .unzip();

    let mut partials: Vec<Option<schnorr::Signature>> = vec![None; keys.len()];
    for (i, nonce) in nonces.into_iter().enumerate() {
        let others: Vec<Point> = commitments
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, c)| *c)
            .collect();
        partials[i] = Some(partial_sign(&keys[i], nonce, message, &combine_points(&others)));
    }

    let ordered: Vec<_> = order.iter().filter_map(|&i| partials[i]).collect();
    combine_sigs(&ordered).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_aggregate_verifies_for_any_subset_and_order(
        n in 1usize..7,
        mask in 1u8..=u8::MAX,
        rotate in 0usize..7,
        payload in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let keys: Vec<PrivateKey> = (0..n).map(|_| PrivateKey::generate()).collect();
        let mut signers: Vec<PrivateKey> = keys
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, k)| k.clone())
            .collect();
        if signers.is_empty() {
            signers.push(keys[0].clone());
        }

        let mut order: Vec<usize> = (0..signers.len()).collect();
        let len = order.len();
        order.rotate_left(rotate % len);

        let message = hash_message(&payload);
        let sig = cosign_in_order(&signers, &order, &message);
        let pubkeys: Vec<_> = signers.iter().map(|k| k.public_key()).collect();
        prop_assert!(verify(&combine_points(&pubkeys), &message, &sig));

        // dropping a signer's key from the aggregate must break verification
        if pubkeys.len() > 1 {
            prop_assert!(!verify(&combine_points(&pubkeys[1..]), &message, &sig));
        }
    }
}
