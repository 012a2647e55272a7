//! End-to-end engine scenarios
//!
//! Each test drives the engine exactly as the RPC and miner
//! collaborators would: templates out, mined blocks in, balances and
//! UTXOs observed through the facade.

use kalon::consensus::check_proof_of_work;
use kalon::crypto::{Address, Hash, Keypair};
use kalon::node::{ChainEngine, ChainError, GenesisConfig, TOPIC_BLOCK_ADDED};
use kalon::storage::{MemoryBlockStore, SledBlockStore};
use kalon::validation::{Transaction, TxInput, TxOutput};

/// Test network: trivial proof of work, no treasury cut, tiny base fee
fn testnet_config() -> GenesisConfig {
    GenesisConfig::from_json(
        r#"{
            "chainId": 7718,
            "name": "Kalon Testnet",
            "symbol": "tKALON",
            "blockTimeTargetSeconds": 30,
            "initialBlockReward": 5.0,
            "halvingSchedule": [
                {"afterBlocks": 100, "rewardMultiplier": 0.5}
            ],
            "difficulty": {
                "window": 120,
                "initialDifficulty": 1,
                "maxAdjustPerBlockPct": 15,
                "allowTrivialPow": true
            },
            "networkFee": {
                "blockFeeRate": 0.0,
                "txFeeShareTreasury": 0.0,
                "baseTxFee": 0.0001,
                "gasPrice": 1
            }
        }"#,
    )
    .unwrap()
}

/// Same network with the 24-hour launch guard enabled
fn launch_guard_config() -> GenesisConfig {
    GenesisConfig::from_json(
        r#"{
            "chainId": 7718,
            "blockTimeTargetSeconds": 30,
            "initialBlockReward": 5.0,
            "difficulty": {
                "window": 120,
                "initialDifficulty": 1,
                "maxAdjustPerBlockPct": 15,
                "allowTrivialPow": true,
                "launchGuard": {
                    "enabled": true,
                    "durationHours": 24,
                    "difficultyFloorMultiplier": 1.0,
                    "initialReward": 2.0
                }
            },
            "networkFee": {
                "blockFeeRate": 0.0,
                "txFeeShareTreasury": 0.0,
                "baseTxFee": 0.0001,
                "gasPrice": 1
            }
        }"#,
    )
    .unwrap()
}

fn open_memory_engine(config: GenesisConfig) -> ChainEngine {
    ChainEngine::open(config, Box::new(MemoryBlockStore::new())).unwrap()
}

/// Search the nonce until the template satisfies its own target
fn mine(engine: &ChainEngine, miner: Address) -> kalon::consensus::Block {
    let mut block = engine.build_template(miner).unwrap();
    while !check_proof_of_work(engine.config(), &block.hash(), block.header.difficulty) {
        block.header.nonce += 1;
    }
    block
}

fn sign(keypair: &Keypair, tx: &mut Transaction) {
    tx.signature = keypair.sign(&tx.signing_bytes());
}

/// Total unspent value across a set of addresses
fn unspent_total(engine: &ChainEngine, addresses: &[Address]) -> u64 {
    addresses
        .iter()
        .map(|a| engine.balance(a).unwrap())
        .sum()
}

#[test]
fn genesis_only_engine_is_empty() {
    let engine = open_memory_engine(testnet_config());

    assert_eq!(engine.height(), 0);
    assert_eq!(engine.best_block().unwrap().height, 0);
    assert_eq!(
        engine.balance(&Address::from_bytes([0x42u8; 20])).unwrap(),
        0
    );
}

#[test]
fn single_mined_block_pays_launch_guard_reward() {
    let engine = open_memory_engine(launch_guard_config());
    let miner = Address::from_bytes([0x11u8; 20]);

    let template = engine.build_template(miner).unwrap();
    assert_eq!(template.header.height, 1);
    assert_eq!(template.transactions[0].outputs[0].owner, miner);
    // guard reward 2.0 KALON, not the steady-state 5.0
    assert_eq!(template.transactions[0].outputs[0].amount, 2_000_000);

    let block = mine(&engine, miner);
    engine.submit_block(block).unwrap();

    assert_eq!(engine.height(), 1);
    assert_eq!(engine.balance(&miner).unwrap(), 2_000_000);
}

#[test]
fn halving_schedule_cuts_reward() {
    let config = testnet_config();
    assert_eq!(kalon::consensus::base_reward_micro(&config, 1), 5_000_000);
    assert_eq!(kalon::consensus::base_reward_micro(&config, 101), 2_500_000);
}

#[test]
fn double_spend_block_is_rejected_without_side_effects() {
    let engine = open_memory_engine(testnet_config());
    let alice = Keypair::generate();
    let bob = Address::from_bytes([0xb0u8; 20]);
    let carol = Address::from_bytes([0xc0u8; 20]);

    // fund alice with one coinbase UTXO
    let block = mine(&engine, alice.address());
    engine.submit_block(block).unwrap();
    assert_eq!(engine.balance(&alice.address()).unwrap(), 5_000_000);

    // two transfers spending the same UTXO to distinct recipients
    let mut tx1 = engine
        .create_transaction(alice.address(), bob, 1_000_000, 500)
        .unwrap();
    let mut tx2 = engine
        .create_transaction(alice.address(), carol, 2_000_000, 500)
        .unwrap();
    assert_eq!(tx1.inputs[0].prev_tx_id, tx2.inputs[0].prev_tx_id);
    sign(&alice, &mut tx1);
    sign(&alice, &mut tx2);

    // both individually validate, so both enter the mempool
    engine.submit_transaction(tx1).unwrap();
    engine.submit_transaction(tx2).unwrap();
    assert_eq!(engine.mempool_len(), 2);

    let conflicting = mine(&engine, alice.address());
    assert_eq!(conflicting.transactions.len(), 3);

    let err = engine.submit_block(conflicting).unwrap_err();
    assert!(matches!(err, ChainError::DoubleSpend { .. }));

    // no partial effects: height, balances, and mempool are untouched
    assert_eq!(engine.height(), 1);
    assert_eq!(engine.balance(&alice.address()).unwrap(), 5_000_000);
    assert_eq!(engine.balance(&bob).unwrap(), 0);
    assert_eq!(engine.balance(&carol).unwrap(), 0);
    assert_eq!(engine.mempool_len(), 2);
    assert_eq!(engine.utxos(&alice.address()).unwrap().len(), 1);
}

#[test]
fn persistence_round_trip_restores_chain() {
    let dir = tempfile::tempdir().unwrap();
    let miner = Address::from_bytes([0x11u8; 20]);
    let best_id;
    let utxos_before;

    {
        let store = SledBlockStore::open(dir.path()).unwrap();
        let engine = ChainEngine::open(testnet_config(), Box::new(store)).unwrap();

        for _ in 0..3 {
            let block = mine(&engine, miner);
            engine.submit_block(block).unwrap();
        }

        best_id = engine.best_block().unwrap().id;
        utxos_before = engine.utxos(&miner).unwrap();
        engine.close().unwrap();
    }

    let store = SledBlockStore::open(dir.path()).unwrap();
    let engine = ChainEngine::open(testnet_config(), Box::new(store)).unwrap();

    assert_eq!(engine.height(), 3);
    assert_eq!(engine.best_block().unwrap().id, best_id);
    assert_eq!(engine.balance(&miner).unwrap(), 3 * 5_000_000);

    let mut restored = engine.utxos(&miner).unwrap();
    let mut expected = utxos_before.clone();
    restored.sort_by_key(|u| (u.tx_id, u.index));
    expected.sort_by_key(|u| (u.tx_id, u.index));
    assert_eq!(restored, expected);
}

#[test]
fn applied_block_prunes_mempool() {
    let engine = open_memory_engine(testnet_config());
    let alice = Keypair::generate();
    let bob = Address::from_bytes([0xb0u8; 20]);

    // three coinbase UTXOs for alice
    for _ in 0..3 {
        let block = mine(&engine, alice.address());
        engine.submit_block(block).unwrap();
    }

    // one independent transfer per coinbase UTXO
    let mut tx_ids = Vec::new();
    for utxo in engine.utxos(&alice.address()).unwrap() {
        let fee = 500;
        let amount = 1_000_000;
        let mut tx = Transaction {
            from: alice.address(),
            to: bob,
            amount,
            nonce: 0,
            fee,
            gas_used: 1,
            gas_price: fee,
            data: Vec::new(),
            signature: Vec::new(),
            inputs: vec![TxInput {
                prev_tx_id: utxo.tx_id,
                index: utxo.index,
                signature: Vec::new(),
            }],
            outputs: vec![
                TxOutput {
                    owner: bob,
                    amount,
                },
                TxOutput {
                    owner: alice.address(),
                    amount: utxo.amount - amount - fee,
                },
            ],
            timestamp_nanos: utxo.index as u64 + 1,
        };
        sign(&alice, &mut tx);
        tx_ids.push(engine.submit_transaction(tx).unwrap());
    }
    assert_eq!(engine.mempool_len(), 3);

    // the template carries coinbase plus all three pending transfers
    let block = mine(&engine, alice.address());
    assert_eq!(block.transactions.len(), 4);
    engine.submit_block(block).unwrap();

    assert!(engine.mempool_snapshot().is_empty());
    assert_eq!(engine.balance(&bob).unwrap(), 3_000_000);

    // the next template is back to coinbase-only
    let next = engine.build_template(alice.address()).unwrap();
    assert_eq!(next.transactions.len(), 1);
    for id in &tx_ids {
        assert!(!next.transactions.iter().any(|tx| tx.id() == *id));
    }
}

#[test]
fn chain_linkage_holds_across_blocks() {
    let engine = open_memory_engine(testnet_config());
    let miner = Address::from_bytes([0x11u8; 20]);

    for _ in 0..5 {
        let block = mine(&engine, miner);
        engine.submit_block(block).unwrap();
    }

    for height in 1..=5u64 {
        let parent = engine.block_by_height(height - 1).unwrap().unwrap();
        let block = engine.block_by_height(height).unwrap().unwrap();
        assert_eq!(block.header.parent_id, parent.hash());
        assert_eq!(block.header.height, parent.header.height + 1);
    }
}

#[test]
fn block_apply_conserves_value() {
    let engine = open_memory_engine(testnet_config());
    let alice = Keypair::generate();
    let bob = Address::from_bytes([0xb0u8; 20]);

    let block = mine(&engine, alice.address());
    engine.submit_block(block).unwrap();

    let mut tx = engine
        .create_transaction(alice.address(), bob, 1_500_000, 600)
        .unwrap();
    sign(&alice, &mut tx);
    engine.submit_transaction(tx).unwrap();

    let parties = [alice.address(), bob];
    let before = unspent_total(&engine, &parties);

    let block = mine(&engine, alice.address());
    let coinbase_amount = block.transactions[0].outputs[0].amount;
    // no treasury share on this network: coinbase takes base reward plus the fee
    assert_eq!(coinbase_amount, 5_000_000 + 600);
    engine.submit_block(block).unwrap();

    // ledger grows by the coinbase minus the fee burned from the inputs
    let after = unspent_total(&engine, &parties);
    assert_eq!(after, before + coinbase_amount - 600);

    // sender paid amount + fee, recipient got the amount
    assert_eq!(engine.balance(&bob).unwrap(), 1_500_000);
}

#[test]
fn wrong_difficulty_block_is_rejected() {
    let engine = open_memory_engine(testnet_config());
    let miner = Address::from_bytes([0x11u8; 20]);

    let mut block = engine.build_template(miner).unwrap();
    block.header.difficulty += 1;

    let err = engine.submit_block(block).unwrap_err();
    assert!(matches!(err, ChainError::Validation(_)));
    assert_eq!(engine.height(), 0);
}

#[test]
fn tampered_merkle_root_is_rejected() {
    let engine = open_memory_engine(testnet_config());
    let miner = Address::from_bytes([0x11u8; 20]);

    let mut block = engine.build_template(miner).unwrap();
    block.header.merkle_root = Hash::from_bytes([0xeeu8; 32]);

    let err = engine.submit_block(block).unwrap_err();
    assert!(matches!(err, ChainError::Validation(_)));
}

#[test]
fn inflated_coinbase_is_rejected() {
    let engine = open_memory_engine(testnet_config());
    let miner = Address::from_bytes([0x11u8; 20]);

    let mut block = engine.build_template(miner).unwrap();
    block.transactions[0].outputs[0].amount += 1;
    // recommit the tampered transaction set
    let ids: Vec<_> = block.transactions.iter().map(|tx| tx.id()).collect();
    block.header.merkle_root = kalon::crypto::compute_merkle_root(&ids);

    let err = engine.submit_block(block).unwrap_err();
    assert!(matches!(err, ChainError::Validation(_)));
    assert_eq!(engine.balance(&miner).unwrap(), 0);
}

#[test]
fn block_added_events_reach_subscribers() {
    let engine = open_memory_engine(testnet_config());
    let receiver = engine.subscribe(TOPIC_BLOCK_ADDED);
    let miner = Address::from_bytes([0x11u8; 20]);

    let block = mine(&engine, miner);
    let id = block.hash();
    engine.submit_block(block).unwrap();

    match receiver.recv().unwrap() {
        kalon::node::ChainEvent::BlockAdded { block, height } => {
            assert_eq!(block.hash(), id);
            assert_eq!(height, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
