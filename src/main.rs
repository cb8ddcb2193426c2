use std::sync::Arc;

use rand::Rng;
use tracing::{error, info};

use btc_wallet_sync::api::CoinApiClient;
use btc_wallet_sync::config::EngineConfig;
use btc_wallet_sync::explorer::EsploraExplorer;
use btc_wallet_sync::keys::{DerivationScheme, DescriptorDeriver};
use btc_wallet_sync::store::{UserBroker, WalletBroker, WalletStore};
use btc_wallet_sync::sync::coordinator::SyncCoordinator;
use btc_wallet_sync::sync::types::{SyncKind, SyncOutcome, SyncPolicy};

/// Locally generated identifier for device registration.
fn generate_device_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .init();

    info!("Starting wallet sync service");
    let config = EngineConfig::from_env();

    let store = match WalletStore::open(config.data_dir.clone()).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open wallet store: {:?}", e);
            return;
        }
    };

    let deriver = match DescriptorDeriver::from_descriptor(&config.descriptor, config.network) {
        Ok(deriver) => Arc::new(deriver),
        Err(e) => {
            error!(
                "Failed to parse wallet descriptor (set WALLET_DESCRIPTOR): {:?}",
                e
            );
            return;
        }
    };

    // First launch: provision the wallet record and a device identity so
    // the coordinator's preconditions hold.
    {
        let mut ctx = store.background_context();
        let mut changed = false;
        if ctx.state().wallet.is_none() {
            let scheme = match config.network {
                bitcoin::Network::Bitcoin => DerivationScheme::bip84(),
                _ => DerivationScheme::bip84_testnet(),
            };
            WalletBroker::create_wallet(&mut ctx, scheme, true);
            changed = true;
        }
        if ctx.state().user.is_none() {
            UserBroker::register_device(&mut ctx, generate_device_id(), generate_device_id());
            changed = true;
        }
        if changed {
            if let Err(e) = ctx.save().await {
                error!("Failed to provision wallet: {:?}", e);
                return;
            }
        }
    }

    let api = Arc::new(CoinApiClient::new(config.api_url.clone()));
    let explorer = Arc::new(EsploraExplorer::new(config.explorer_url.clone()));

    info!("Created API and explorer clients");

    let coordinator = SyncCoordinator::new(store, api, explorer, deriver, config.sync.clone());

    let ticket = match coordinator.request_sync(SyncKind::Standard, SyncPolicy::Always) {
        Ok(ticket) => ticket,
        Err(e) => {
            error!("Sync refused: {}", e);
            return;
        }
    };

    match ticket.wait().await {
        Ok(SyncOutcome::Completed(report)) => info!("{}", report.summary()),
        Ok(SyncOutcome::SkippedFresh) => info!("Sync skipped: local state is fresh"),
        Err(e) => error!("Sync failed: {}", e),
    }
}
