//! Engine integration tests: coordinator serialization, busy signaling,
//! precondition handling and a full reconciliation pass against a
//! scripted wallet API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use btc_wallet_sync::api::client::WalletApi;
use btc_wallet_sync::api::types::{
    AddressTransactionSummary, ApiError, CheckInResponse, FeeEstimates, InvitationResponse,
    InvitationUpdateRequest, PriceInfo, TransactionResponse, UnauthorizedReason,
    UserVerificationResponse, VerificationStatusDto, VinResponse, VoutResponse,
};
use btc_wallet_sync::config::SyncConfig;
use btc_wallet_sync::explorer::{ChainExplorer, ExplorerError};
use btc_wallet_sync::keys::{AddressDeriver, Chain, DerivationPath, DerivationScheme, KeyError};
use btc_wallet_sync::store::{UserBroker, WalletBroker, WalletStore};
use btc_wallet_sync::sync::coordinator::SyncCoordinator;
use btc_wallet_sync::sync::types::{
    PreconditionFailure, SyncError, SyncKind, SyncOutcome, SyncPolicy,
};

/// Deterministic derivation: `recv-N` / `chng-N`.
struct FakeDeriver;

impl AddressDeriver for FakeDeriver {
    fn derive_address(&self, path: &DerivationPath) -> Result<String, KeyError> {
        let chain = match path.chain {
            Chain::Receive => "recv",
            Chain::Change => "chng",
        };
        Ok(format!("{}-{}", chain, path.index))
    }
}

struct AlwaysKnownExplorer;

#[async_trait]
impl ChainExplorer for AlwaysKnownExplorer {
    async fn transaction_exists(&self, _txid: &str) -> Result<bool, ExplorerError> {
        Ok(true)
    }
}

/// Scripted wallet API that records the order of every call it receives.
struct MockApi {
    events: Arc<Mutex<Vec<String>>>,
    check_in_delay: Duration,
    block_height: u64,
    summaries: Vec<AddressTransactionSummary>,
    transactions: HashMap<String, TransactionResponse>,
    invitations: Vec<InvitationResponse>,
    unauthorized: bool,
}

impl MockApi {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            check_in_delay: Duration::from_millis(25),
            block_height: 500_000,
            summaries: Vec::new(),
            transactions: HashMap::new(),
            invitations: Vec::new(),
            unauthorized: false,
        }
    }

    fn with_transaction(mut self, address: &str, txid: &str, height: Option<u64>) -> Self {
        self.summaries.push(AddressTransactionSummary {
            address: address.to_string(),
            txid: txid.to_string(),
        });
        self.transactions.insert(
            txid.to_string(),
            TransactionResponse {
                txid: txid.to_string(),
                block_hash: height.map(|h| format!("hash-{}", h)),
                height,
                received_time: Some(Utc::now()),
                vin: vec![VinResponse {
                    txid: "prev".to_string(),
                    vout: 0,
                    addresses: vec!["external-input".to_string()],
                    value: 80_000,
                }],
                vout: vec![VoutResponse {
                    n: 0,
                    value: 75_000,
                    addresses: vec![address.to_string()],
                }],
            },
        );
        self
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

#[async_trait]
impl WalletApi for MockApi {
    async fn check_in(&self) -> Result<CheckInResponse, ApiError> {
        self.record("check_in");
        tokio::time::sleep(self.check_in_delay).await;

        if self.unauthorized {
            return Err(ApiError::Unauthorized {
                reason: UnauthorizedReason::DeviceMismatch,
            });
        }

        Ok(CheckInResponse {
            block_height: self.block_height,
            fees: FeeEstimates {
                fast: 30.0,
                medium: 12.0,
                slow: 3.0,
            },
            pricing: PriceInfo { usd: 64_000.0 },
        })
    }

    async fn address_transaction_summaries(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressTransactionSummary>, ApiError> {
        self.record("summaries");
        Ok(self
            .summaries
            .iter()
            .filter(|s| addresses.contains(&s.address))
            .cloned()
            .collect())
    }

    async fn transaction(&self, txid: &str) -> Result<TransactionResponse, ApiError> {
        self.record(format!("tx:{}", txid));
        self.transactions
            .get(txid)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn invitations(&self) -> Result<Vec<InvitationResponse>, ApiError> {
        self.record("invitations");
        Ok(self.invitations.clone())
    }

    async fn update_invitation(
        &self,
        update: &InvitationUpdateRequest,
    ) -> Result<InvitationResponse, ApiError> {
        self.record(format!("update:{}", update.id));
        Err(ApiError::NotFound)
    }

    async fn user_verification(&self) -> Result<UserVerificationResponse, ApiError> {
        self.record("user");
        Ok(UserVerificationResponse {
            id: "user-1".to_string(),
            status: VerificationStatusDto::Verified,
            identities: vec!["phone".to_string()],
        })
    }
}

/// Small lookahead and one batch per pass keep the call sequence exact.
fn test_config() -> SyncConfig {
    SyncConfig {
        address_batch_size: 100,
        address_lookahead: 2,
        ..SyncConfig::default()
    }
}

async fn provisioned_store() -> WalletStore {
    let store = WalletStore::in_memory();
    let mut ctx = store.background_context();
    WalletBroker::create_wallet(&mut ctx, DerivationScheme::bip84_testnet(), true);
    UserBroker::register_device(&mut ctx, "user-1".to_string(), "device-1".to_string());
    ctx.save().await.expect("failed to provision store");
    store
}

fn coordinator(store: WalletStore, api: Arc<MockApi>) -> SyncCoordinator {
    SyncCoordinator::new(
        store,
        api,
        Arc::new(AlwaysKnownExplorer),
        Arc::new(FakeDeriver),
        test_config(),
    )
}

#[tokio::test]
async fn back_to_back_syncs_run_serially_in_fifo_order() {
    let store = provisioned_store().await;
    let api = Arc::new(MockApi::new().with_transaction("recv-0", "tx-a", Some(499_999)));
    let events = api.events.clone();
    let coordinator = coordinator(store, api);

    let first = coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::Always)
        .expect("first request must be admitted");
    let second = coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::Always)
        .expect("second request must be admitted");

    let first_outcome = first.wait().await.expect("first sync must complete");
    let second_outcome = second.wait().await.expect("second sync must complete");
    assert!(matches!(first_outcome, SyncOutcome::Completed(_)));
    assert!(matches!(second_outcome, SyncOutcome::Completed(_)));

    // One pass's calls never interleave with the other's: the recorded
    // sequence is exactly two passes end to end.
    let pass = vec!["check_in", "summaries", "tx:tx-a", "user", "invitations"];
    let expected: Vec<String> = pass
        .iter()
        .chain(pass.iter())
        .map(|s| s.to_string())
        .collect();
    assert_eq!(*events.lock().unwrap(), expected);
}

#[tokio::test]
async fn skip_if_in_progress_signals_busy_without_queueing() {
    let store = provisioned_store().await;
    let mut api = MockApi::new();
    api.check_in_delay = Duration::from_millis(250);
    let coordinator = coordinator(store, Arc::new(api));

    let admitted = coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::Always)
        .expect("first request must be admitted");

    let busy = coordinator.request_sync(SyncKind::Standard, SyncPolicy::SkipIfInProgress);
    assert!(matches!(
        busy,
        Err(SyncError::Precondition(PreconditionFailure::SyncInProgress))
    ));
    assert_eq!(coordinator.pending(), 1);

    admitted.wait().await.expect("admitted sync must complete");
    assert_eq!(coordinator.pending(), 0);

    // With nothing in flight the same policy is admitted again.
    let after = coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::SkipIfInProgress)
        .expect("request after completion must be admitted");
    after.wait().await.expect("sync must complete");
}

#[tokio::test]
async fn preconditions_fail_fast_before_any_io() {
    let api = Arc::new(MockApi::new());
    let events = api.events.clone();

    // No wallet at all.
    let empty = WalletStore::in_memory();
    let coordinator_missing = coordinator(empty, api.clone());
    assert!(matches!(
        coordinator_missing.request_sync(SyncKind::Standard, SyncPolicy::Always),
        Err(SyncError::Precondition(PreconditionFailure::MissingWallet))
    ));

    // Wallet without recovery words.
    let store = WalletStore::in_memory();
    let mut ctx = store.background_context();
    WalletBroker::create_wallet(&mut ctx, DerivationScheme::bip84_testnet(), false);
    UserBroker::register_device(&mut ctx, "user-1".to_string(), "device-1".to_string());
    ctx.save().await.unwrap();
    let coordinator_no_words = coordinator(store, api.clone());
    assert!(matches!(
        coordinator_no_words.request_sync(SyncKind::Standard, SyncPolicy::Always),
        Err(SyncError::Precondition(
            PreconditionFailure::MissingRecoveryWords
        ))
    ));

    // Wallet but no registered user.
    let store = WalletStore::in_memory();
    let mut ctx = store.background_context();
    WalletBroker::create_wallet(&mut ctx, DerivationScheme::bip84_testnet(), true);
    ctx.save().await.unwrap();
    let coordinator_no_user = coordinator(store, api.clone());
    assert!(matches!(
        coordinator_no_user.request_sync(SyncKind::Standard, SyncPolicy::Always),
        Err(SyncError::Precondition(PreconditionFailure::NotRegistered))
    ));

    // Nothing ever reached the network.
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn a_pass_reconciles_transactions_indices_and_gaps() {
    let store = provisioned_store().await;

    // Index 0 was handed out earlier and sits in the gap set.
    {
        let mut ctx = store.background_context();
        ctx.state_mut()
            .wallet
            .as_mut()
            .unwrap()
            .receive_index_gaps
            .extend([0, 1]);
        ctx.save().await.unwrap();
    }

    let api = Arc::new(MockApi::new().with_transaction("recv-0", "tx-a", Some(499_999)));
    let coordinator = coordinator(store.clone(), api);

    let outcome = coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::Always)
        .expect("request must be admitted")
        .wait()
        .await
        .expect("sync must complete");

    let SyncOutcome::Completed(report) = outcome else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.block_height, 500_000);
    assert_eq!(report.transactions_upserted, 1);

    let state = store.snapshot();
    let tx = &state.transactions["tx-a"];
    assert!(tx.is_incoming);
    assert!(!tx.is_sent_to_self);
    assert_eq!(tx.confirmations, 2);

    let wallet = state.wallet.as_ref().unwrap();
    // recv-0 confirmed used: the counter advanced and index 0 left the
    // gap set while the untouched allocation at 1 stayed.
    assert_eq!(wallet.last_receive_index, Some(0));
    assert_eq!(
        wallet.receive_index_gaps.iter().copied().collect::<Vec<_>>(),
        vec![1]
    );
    assert_eq!(state.meta.last_block_height, 500_000);
    assert!(state.meta.last_synced_at.is_some());
}

#[tokio::test]
async fn disavowed_identity_deverifies_locally() {
    let store = provisioned_store().await;
    let mut api = MockApi::new();
    api.unauthorized = true;
    let coordinator = coordinator(store.clone(), Arc::new(api));

    let result = coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::Always)
        .expect("request must be admitted")
        .wait()
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Api(ApiError::Unauthorized { .. }))
    ));

    let user = store.snapshot().user.expect("user record must survive");
    assert!(user.id.is_none());
    assert!(user.device_id.is_none());
}

#[tokio::test]
async fn if_stale_skips_after_a_fresh_pass() {
    let store = provisioned_store().await;
    let api = Arc::new(MockApi::new());
    let coordinator = coordinator(store, api);

    coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::Always)
        .expect("request must be admitted")
        .wait()
        .await
        .expect("sync must complete");

    let outcome = coordinator
        .request_sync(SyncKind::Standard, SyncPolicy::IfStale)
        .expect("stale-policy request must resolve")
        .wait()
        .await
        .expect("ticket must resolve");
    assert!(matches!(outcome, SyncOutcome::SkippedFresh));
}
