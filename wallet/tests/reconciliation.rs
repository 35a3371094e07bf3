// End-to-end reconciliation: balance stability across ingestion orders,
// direction assignment, idempotent registration, submission and fee
// estimation, all driven through the public sync surface.

mod support;

use polywallet_common::{
    api::{BundleStatus, TransactionBundle},
    chain::{AddressScheme, ChainType, SyncDepth, SyncMode},
    error::Status,
    hash::digest,
};
use polywallet_wallet::{
    events::{ManagerEvent, RecordedEvent, RecordingListener, TransferEvent, WalletEvent},
    handlers::{
        self,
        codec::{ParsedTransaction, TxBody, TxInput, TxOutput},
    },
    manager::WalletManager,
    system::System,
    transfer::{TransferDirection, TransferState},
};
use polywallet_common::{address::Address, hash::TxHash};
use primitive_types::U256;
use std::sync::Arc;
use support::{account, seed, settle, wait_for_balance, MockClient};

struct Fixture {
    _dir: tempfile::TempDir,
    system: Arc<System>,
    manager: Arc<WalletManager>,
    listener: Arc<RecordingListener>,
    client: Arc<MockClient>,
}

async fn fixture(chain: ChainType) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let listener = RecordingListener::new();
    let client = MockClient::new(50);
    let system = System::create(account(), dir.path(), client.clone(), listener.clone());
    let network = system.network(chain, false).unwrap();
    let manager = system
        .create_manager(&network, SyncMode::ApiOnly, AddressScheme::Native, None)
        .unwrap();
    Fixture {
        _dir: dir,
        system,
        manager,
        listener,
        client,
    }
}

// Receive address `index` of the test account on the given chain
fn our_address(chain: ChainType, index: u32) -> Address {
    let account = account();
    handlers::handler(chain).receive_address(
        account.material(chain),
        AddressScheme::Native,
        index,
        false,
    )
}

fn foreign_address(chain: ChainType, tag: u8) -> Address {
    handlers::handler(chain).address_for_public(&[0xF0 | (tag & 0x0F); 32], AddressScheme::Native, false)
}

fn utxo_tx(inputs: Vec<(TxHash, u32, Address)>, outputs: Vec<(Address, u64)>) -> ParsedTransaction {
    ParsedTransaction {
        chain: ChainType::Bitcoin,
        body: TxBody::Utxo {
            inputs: inputs
                .into_iter()
                .map(|(prev_hash, prev_index, spender)| TxInput {
                    prev_hash,
                    prev_index,
                    spender,
                    signature: vec![0xAB],
                })
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|(target, value)| TxOutput {
                    value: U256::from(value),
                    target,
                })
                .collect(),
        },
        signature: None,
    }
}

fn bundle_for(tx: &ParsedTransaction, identifier: &str, height: u64) -> TransactionBundle {
    TransactionBundle {
        identifier: identifier.to_string(),
        raw: handlers::handler(tx.chain).serialize_transaction(tx),
        status: BundleStatus::Confirmed,
        block_height: height,
        timestamp: height * 600,
    }
}

// The five-transaction chain used by the order-independence tests.
// Final balance: 68_000 change from tx4 plus the 10_000 of tx5.
fn utxo_fixture_chain() -> (Vec<TransactionBundle>, u64) {
    let chain = ChainType::Bitcoin;
    let external = TxHash::new(chain, digest(b"external-funding"));

    let tx1 = utxo_tx(
        vec![(external.clone(), 0, foreign_address(chain, 1))],
        vec![(our_address(chain, 0), 100_000)],
    );
    let tx2 = utxo_tx(
        vec![(external.clone(), 1, foreign_address(chain, 2))],
        vec![(our_address(chain, 1), 50_000)],
    );
    // Spend tx1: 30k out, 69k change, 1k fee
    let tx3 = utxo_tx(
        vec![(tx1.hash(), 0, our_address(chain, 0))],
        vec![
            (foreign_address(chain, 3), 30_000),
            (our_address(chain, 2), 69_000),
        ],
    );
    // Spend tx2 + tx3 change: 50k out, 68k change, 1k fee
    let tx4 = utxo_tx(
        vec![
            (tx2.hash(), 0, our_address(chain, 1)),
            (tx3.hash(), 1, our_address(chain, 2)),
        ],
        vec![
            (foreign_address(chain, 4), 50_000),
            (our_address(chain, 3), 68_000),
        ],
    );
    let tx5 = utxo_tx(
        vec![(external, 2, foreign_address(chain, 5))],
        vec![(our_address(chain, 4), 10_000)],
    );

    let bundles = vec![
        bundle_for(&tx1, "tx-1", 10),
        bundle_for(&tx2, "tx-2", 11),
        bundle_for(&tx3, "tx-3", 12),
        bundle_for(&tx4, "tx-4", 13),
        bundle_for(&tx5, "tx-5", 14),
    ];
    (bundles, 78_000)
}

#[tokio::test]
async fn test_utxo_balance_all_at_once() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let (bundles, expected) = utxo_fixture_chain();
    for bundle in bundles {
        fixture.client.push_transaction(bundle);
    }

    fixture.manager.connect(None).await.unwrap();
    wait_for_balance(&fixture.manager.primary_wallet(), expected).await;

    let wallet = fixture.manager.primary_wallet();
    assert_eq!(wallet.transfers().await.len(), 5);
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_utxo_balance_one_at_a_time() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let (bundles, expected) = utxo_fixture_chain();

    fixture.manager.connect(None).await.unwrap();
    settle().await;
    for bundle in bundles {
        fixture.client.push_transaction(bundle);
        fixture
            .manager
            .sync_to_depth(SyncDepth::FromCreation)
            .await
            .unwrap();
        settle().await;
    }

    wait_for_balance(&fixture.manager.primary_wallet(), expected).await;
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_utxo_balance_reverse_order() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let (mut bundles, expected) = utxo_fixture_chain();
    bundles.reverse();

    fixture.manager.connect(None).await.unwrap();
    settle().await;
    // Spends arrive before their parents; the unresolved list carries
    // them until resolution
    for bundle in bundles {
        fixture.client.push_transaction(bundle);
        fixture
            .manager
            .sync_to_depth(SyncDepth::FromCreation)
            .await
            .unwrap();
        settle().await;
    }

    wait_for_balance(&fixture.manager.primary_wallet(), expected).await;
    let wallet = fixture.manager.primary_wallet();
    assert_eq!(wallet.transfers().await.len(), 5);
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_received_transfer_direction_and_endpoints() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let chain = ChainType::Bitcoin;

    let sender = foreign_address(chain, 7);
    let target = our_address(chain, 0);
    let external = TxHash::new(chain, digest(b"parent"));
    let tx = utxo_tx(
        vec![(external, 0, sender.clone())],
        vec![(target.clone(), 200_000_000)],
    );
    fixture.client.push_transaction(bundle_for(&tx, "recv", 20));

    fixture.manager.connect(None).await.unwrap();
    wait_for_balance(&fixture.manager.primary_wallet(), 200_000_000).await;

    let wallet = fixture.manager.primary_wallet();
    let transfers = wallet.transfers().await;
    assert_eq!(transfers.len(), 1);
    let transfer = &transfers[0];
    assert_eq!(transfer.direction(), TransferDirection::Received);
    assert_eq!(transfer.amount().to_u64_base(), Some(200_000_000));
    assert_eq!(transfer.source(), &sender);
    assert_eq!(transfer.target(), &target);
    assert!(matches!(transfer.state(), TransferState::Included { block_number: 20, .. }));
    assert_eq!(transfer.hash(), Some(tx.hash()));
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_double_registration_is_idempotent() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let chain = ChainType::Bitcoin;

    let external = TxHash::new(chain, digest(b"parent"));
    let tx = utxo_tx(
        vec![(external, 0, foreign_address(chain, 1))],
        vec![(our_address(chain, 0), 70_000)],
    );
    // The same transaction under two bundle identifiers
    fixture.client.push_transaction(bundle_for(&tx, "dup-a", 20));
    fixture.client.push_transaction(bundle_for(&tx, "dup-b", 20));

    fixture.manager.connect(None).await.unwrap();
    wait_for_balance(&fixture.manager.primary_wallet(), 70_000).await;

    let wallet = fixture.manager.primary_wallet();
    assert_eq!(wallet.transfers().await.len(), 1);

    // And a second full rescan changes nothing
    fixture
        .manager
        .sync_to_depth(SyncDepth::FromCreation)
        .await
        .unwrap();
    settle().await;
    assert_eq!(wallet.balance().await.to_u64_base(), Some(70_000));
    assert_eq!(wallet.transfers().await.len(), 1);
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_transfer_event_linearization() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let chain = ChainType::Bitcoin;

    let external = TxHash::new(chain, digest(b"parent"));
    let tx = utxo_tx(
        vec![(external, 0, foreign_address(chain, 1))],
        vec![(our_address(chain, 0), 5_000)],
    );
    // First seen in the mempool, then confirmed
    fixture.client.push_transaction(TransactionBundle {
        identifier: "mempool".into(),
        raw: handlers::handler(chain).serialize_transaction(&tx),
        status: BundleStatus::Submitted,
        block_height: 0,
        timestamp: 0,
    });

    fixture.manager.connect(None).await.unwrap();
    wait_for_balance(&fixture.manager.primary_wallet(), 5_000).await;

    fixture.client.transactions.lock().unwrap().clear();
    fixture.client.push_transaction(bundle_for(&tx, "confirmed", 30));
    fixture
        .manager
        .sync_to_depth(SyncDepth::FromCreation)
        .await
        .unwrap();
    settle().await;

    let wallet = fixture.manager.primary_wallet();
    let transfers = wallet.transfers().await;
    let transfer = &transfers[0];
    assert!(matches!(transfer.state(), TransferState::Included { block_number: 30, .. }));

    // Created precedes every Changed for the same transfer, and the
    // per-bundle order is transfer-added then balance then changed
    let events = fixture.listener.take();
    let created_at = events
        .iter()
        .position(|e| matches!(e, RecordedEvent::Transfer(TransferEvent::Created)))
        .expect("transfer created event");
    let changed_at = events
        .iter()
        .position(|e| matches!(e, RecordedEvent::Transfer(TransferEvent::Changed { .. })))
        .expect("transfer changed event");
    assert!(created_at < changed_at);

    let added_at = events
        .iter()
        .position(|e| matches!(e, RecordedEvent::Wallet(WalletEvent::TransferAdded { .. })))
        .unwrap();
    let balance_at = events
        .iter()
        .position(|e| matches!(e, RecordedEvent::Wallet(WalletEvent::BalanceUpdated { .. })))
        .unwrap();
    let wallet_changed_at = events
        .iter()
        .position(|e| matches!(e, RecordedEvent::Wallet(WalletEvent::Changed)))
        .unwrap();
    assert!(added_at < balance_at && balance_at < wallet_changed_at);
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_account_chain_transfer_bundles() {
    let fixture = fixture(ChainType::Ethereum).await;
    let chain = ChainType::Ethereum;
    let wallet = fixture.manager.primary_wallet();
    let currency = wallet.currency().uids().to_string();

    let ours = our_address(chain, 0);
    let them = foreign_address(chain, 2);

    fixture.client.push_transfer(polywallet_common::api::TransferBundle {
        identifier: "in-1".into(),
        hash: hex::encode(digest(b"eth-tx-1")),
        index: None,
        from: them.rendered().to_string(),
        to: ours.rendered().to_string(),
        amount: "1000".into(),
        currency: currency.clone(),
        fee: Some("21".into()),
        block_number: 5,
        transaction_index: 0,
        block_timestamp: 3_000,
        status: BundleStatus::Confirmed,
        include_error: None,
        attributes: Default::default(),
    });
    fixture.client.push_transfer(polywallet_common::api::TransferBundle {
        identifier: "out-1".into(),
        hash: hex::encode(digest(b"eth-tx-2")),
        index: None,
        from: ours.rendered().to_string(),
        to: them.rendered().to_string(),
        amount: "300".into(),
        currency,
        fee: Some("21".into()),
        block_number: 6,
        transaction_index: 0,
        block_timestamp: 3_600,
        status: BundleStatus::Confirmed,
        include_error: None,
        attributes: Default::default(),
    });

    fixture.manager.connect(None).await.unwrap();
    // 1000 in, 300 out plus the 21 fee attributable to us
    wait_for_balance(&wallet, 679).await;

    let transfers = wallet.transfers().await;
    assert_eq!(transfers.len(), 2);
    let sent = transfers
        .iter()
        .find(|t| t.direction() == TransferDirection::Sent)
        .unwrap();
    assert_eq!(sent.amount().to_u64_base(), Some(300));
    assert_eq!(sent.fee().to_u64_base(), Some(21));
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_submission_flow() -> anyhow::Result<()> {
    let fixture = fixture(ChainType::Bitcoin).await;
    let chain = ChainType::Bitcoin;

    // Fund the wallet first
    let external = TxHash::new(chain, digest(b"parent"));
    let tx = utxo_tx(
        vec![(external, 0, foreign_address(chain, 1))],
        vec![(our_address(chain, 0), 100_000)],
    );
    fixture.client.push_transaction(bundle_for(&tx, "fund", 20));
    fixture.manager.connect(None).await.unwrap();
    let wallet = fixture.manager.primary_wallet();
    wait_for_balance(&wallet, 100_000).await;

    let transfer = wallet
        .create_transfer(
            foreign_address(chain, 9),
            polywallet_common::amount::Amount::from_base(wallet.base_unit(), 40_000u64),
            None,
            Default::default(),
        )
        .await?;
    assert!(matches!(transfer.state(), TransferState::Created));

    fixture
        .manager
        .submit_transfer(&wallet, &transfer, &seed())
        .await?;
    assert!(matches!(transfer.state(), TransferState::Submitted));
    assert!(transfer.hash().is_some());
    assert_eq!(fixture.client.submissions.lock().unwrap().len(), 1);

    // The pending spend already lowered the balance
    settle().await;
    let balance = wallet.balance().await.to_u64_base().unwrap();
    assert!(balance < 60_001, "pending spend not reflected: {}", balance);
    fixture.manager.stop().await;
    fixture.system.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_submission_errors_transfer_only() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let chain = ChainType::Bitcoin;

    let external = TxHash::new(chain, digest(b"parent"));
    let tx = utxo_tx(
        vec![(external, 0, foreign_address(chain, 1))],
        vec![(our_address(chain, 0), 100_000)],
    );
    fixture.client.push_transaction(bundle_for(&tx, "fund", 20));
    fixture.manager.connect(None).await.unwrap();
    let wallet = fixture.manager.primary_wallet();
    wait_for_balance(&wallet, 100_000).await;

    fixture
        .client
        .fail_submission
        .store(true, std::sync::atomic::Ordering::Relaxed);

    let transfer = wallet
        .create_transfer(
            foreign_address(chain, 9),
            polywallet_common::amount::Amount::from_base(wallet.base_unit(), 40_000u64),
            None,
            Default::default(),
        )
        .await
        .unwrap();
    let result = fixture
        .manager
        .submit_transfer(&wallet, &transfer, &seed())
        .await;
    assert!(result.is_err());
    assert!(matches!(transfer.state(), TransferState::Errored { .. }));

    // Manager state is untouched and the errored transfer does not
    // contribute to the balance
    settle().await;
    assert!(matches!(
        fixture.manager.state(),
        polywallet_wallet::events::ManagerState::Connected
            | polywallet_wallet::events::ManagerState::Syncing
    ));
    assert_eq!(wallet.balance().await.to_u64_base(), Some(100_000));
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_fee_estimation_carries_cookie() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let chain = ChainType::Bitcoin;

    let external = TxHash::new(chain, digest(b"parent"));
    let tx = utxo_tx(
        vec![(external, 0, foreign_address(chain, 1))],
        vec![(our_address(chain, 0), 100_000)],
    );
    fixture.client.push_transaction(bundle_for(&tx, "fund", 20));
    fixture.manager.connect(None).await.unwrap();
    let wallet = fixture.manager.primary_wallet();
    wait_for_balance(&wallet, 100_000).await;

    fixture
        .manager
        .estimate_fee_basis(
            &wallet,
            0xC00C1E,
            foreign_address(chain, 9),
            polywallet_common::amount::Amount::from_base(wallet.base_unit(), 10_000u64),
            Default::default(),
        )
        .await;
    settle().await;

    let events = fixture.listener.take();
    let estimated = events.iter().find_map(|e| match e {
        RecordedEvent::Wallet(WalletEvent::FeeBasisEstimated {
            cookie,
            status,
            fee_basis,
        }) => Some((*cookie, *status, fee_basis.clone())),
        _ => None,
    });
    let (cookie, status, fee_basis) = estimated.expect("fee estimation event");
    assert_eq!(cookie, 0xC00C1E);
    assert_eq!(status, Status::Success);
    // The mock client quotes 250 cost units
    assert_eq!(fee_basis.unwrap().cost_factor(), 250.0);
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_failed_transaction_bundle_releases_utxos() {
    let fixture = fixture(ChainType::Bitcoin).await;
    let chain = ChainType::Bitcoin;

    let external = TxHash::new(chain, digest(b"parent"));
    let fund = utxo_tx(
        vec![(external, 0, foreign_address(chain, 1))],
        vec![(our_address(chain, 0), 100_000)],
    );
    // A spend of the funding output, sitting in the mempool
    let spend = utxo_tx(
        vec![(fund.hash(), 0, our_address(chain, 0))],
        vec![
            (foreign_address(chain, 9), 60_000),
            (our_address(chain, 1), 39_000),
        ],
    );

    fixture.client.push_transaction(bundle_for(&fund, "fund", 20));
    fixture.client.push_transaction(TransactionBundle {
        identifier: "spend".into(),
        raw: handlers::handler(chain).serialize_transaction(&spend),
        status: BundleStatus::Submitted,
        block_height: 0,
        timestamp: 0,
    });

    fixture.manager.connect(None).await.unwrap();
    let wallet = fixture.manager.primary_wallet();
    wait_for_balance(&wallet, 39_000).await;

    // The network rejects the spend: the transfer moves to Errored, its
    // change output leaves the UTXO set and the funding output becomes
    // spendable again
    fixture.client.transactions.lock().unwrap().clear();
    fixture.client.push_transaction(bundle_for(&fund, "fund", 20));
    fixture.client.push_transaction(TransactionBundle {
        identifier: "spend-failed".into(),
        raw: handlers::handler(chain).serialize_transaction(&spend),
        status: BundleStatus::Failed,
        block_height: 0,
        timestamp: 0,
    });
    fixture
        .manager
        .sync_to_depth(SyncDepth::FromCreation)
        .await
        .unwrap();
    wait_for_balance(&wallet, 100_000).await;

    let transfer = wallet.transfer_for_hash(&spend.hash()).await.unwrap();
    assert!(matches!(transfer.state(), TransferState::Errored { .. }));

    // A later rescan does not resurrect the rejected spend
    fixture
        .manager
        .sync_to_depth(SyncDepth::FromCreation)
        .await
        .unwrap();
    settle().await;
    assert_eq!(wallet.balance().await.to_u64_base(), Some(100_000));
    fixture.manager.stop().await;
    fixture.system.stop().await;
}

#[tokio::test]
async fn test_persisted_transactions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (bundles, expected) = utxo_fixture_chain();

    // First run: sync everything, then shut down
    {
        let listener = RecordingListener::new();
        let client = MockClient::new(50);
        for bundle in bundles {
            client.push_transaction(bundle);
        }
        let system = System::create(account(), dir.path(), client, listener);
        let network = system.network(ChainType::Bitcoin, false).unwrap();
        let manager = system
            .create_manager(&network, SyncMode::ApiOnly, AddressScheme::Native, None)
            .unwrap();
        manager.connect(None).await.unwrap();
        wait_for_balance(&manager.primary_wallet(), expected).await;
        manager.disconnect().await;
        manager.stop().await;
        system.stop().await;
    }

    // Second run: same tree, a client that knows nothing
    let listener = RecordingListener::new();
    let system = System::create(account(), dir.path(), MockClient::new(50), listener);
    let network = system.network(ChainType::Bitcoin, false).unwrap();
    let manager = system
        .create_manager(&network, SyncMode::ApiOnly, AddressScheme::Native, None)
        .unwrap();
    manager.restore().await;

    let wallet = manager.primary_wallet();
    assert_eq!(wallet.balance().await.to_u64_base(), Some(expected));
    assert_eq!(wallet.transfers().await.len(), 5);
    manager.stop().await;
    system.stop().await;
}

#[tokio::test]
async fn test_persisted_bundles_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let chain = ChainType::Ethereum;
    let ours = our_address(chain, 0);
    let them = foreign_address(chain, 2);

    {
        let listener = RecordingListener::new();
        let client = MockClient::new(50);
        let system = System::create(account(), dir.path(), client.clone(), listener);
        let network = system.network(chain, false).unwrap();
        let manager = system
            .create_manager(&network, SyncMode::ApiOnly, AddressScheme::Native, None)
            .unwrap();
        let wallet = manager.primary_wallet();
        let currency = wallet.currency().uids().to_string();

        client.push_transfer(polywallet_common::api::TransferBundle {
            identifier: "in-1".into(),
            hash: hex::encode(digest(b"persisted-eth-tx")),
            index: None,
            from: them.rendered().to_string(),
            to: ours.rendered().to_string(),
            amount: "5000".into(),
            currency: currency.clone(),
            fee: None,
            block_number: 9,
            transaction_index: 0,
            block_timestamp: 5_400,
            status: BundleStatus::Confirmed,
            include_error: None,
            attributes: Default::default(),
        });
        manager.connect(None).await.unwrap();
        wait_for_balance(&wallet, 5_000).await;
        manager.disconnect().await;
        manager.stop().await;
        system.stop().await;
    }

    let listener = RecordingListener::new();
    let system = System::create(account(), dir.path(), MockClient::new(50), listener);
    let network = system.network(chain, false).unwrap();
    let manager = system
        .create_manager(&network, SyncMode::ApiOnly, AddressScheme::Native, None)
        .unwrap();
    manager.restore().await;

    let wallet = manager.primary_wallet();
    assert_eq!(wallet.balance().await.to_u64_base(), Some(5_000));
    manager.stop().await;
    system.stop().await;
}

#[tokio::test]
async fn test_block_height_updates_network() {
    let fixture = fixture(ChainType::Bitcoin).await;
    fixture.manager.connect(None).await.unwrap();
    settle().await;

    assert_eq!(fixture.manager.network().height(), 50);
    let events = fixture.listener.take();
    assert!(events
        .iter()
        .any(|e| matches!(e, RecordedEvent::Manager(ManagerEvent::BlockHeightUpdated { height: 50 }))));
    fixture.manager.stop().await;
    fixture.system.stop().await;
}
