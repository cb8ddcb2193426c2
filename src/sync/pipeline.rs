//! The reconciliation pipeline: one full sync pass.
//!
//! A pass runs fetch → classify → persist → ledger update → invitation
//! reconciliation → failure grooming against a single store context and
//! commits once at the end. The coordinator guarantees at most one pass
//! runs at a time; within a pass the independent network sub-fetches run
//! concurrently, but every persistence write lands in the one context
//! before the pass is considered complete.
//!
//! Per-item integrity failures (one bad invitation among many) are logged
//! and skipped; the first fatal error aborts the pass and becomes its
//! terminal result. A 401 that disavows our identity additionally clears
//! the local identity markers before propagating.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::api::client::WalletApi;
use crate::api::types::{ApiError, InvitationStatusDto, InvitationUpdateRequest};
use crate::config::SyncConfig;
use crate::explorer::ChainExplorer;
use crate::keys::AddressDeriver;
use crate::store::context::WalletStore;
use crate::store::invitation_broker::InvitationBroker;
use crate::store::transaction_broker::TransactionBroker;
use crate::store::user_broker::UserBroker;
use crate::sync::grooming::FailureDetector;
use crate::sync::invitations;
use crate::sync::ledger::AddressLedger;
use crate::sync::types::{SyncError, SyncKind, SyncReport};

pub struct SyncPipeline {
    store: WalletStore,
    api: Arc<dyn WalletApi>,
    ledger: AddressLedger,
    grooming: FailureDetector,
    config: SyncConfig,
}

impl SyncPipeline {
    pub fn new(
        store: WalletStore,
        api: Arc<dyn WalletApi>,
        explorer: Arc<dyn ChainExplorer>,
        deriver: Arc<dyn AddressDeriver>,
        config: SyncConfig,
    ) -> Self {
        let ledger = AddressLedger::new(deriver, config.address_lookahead);
        let grooming = FailureDetector::new(explorer, &config);

        Self {
            store,
            api,
            ledger,
            grooming,
            config,
        }
    }

    /// Run one pass to completion. No mid-flight cancellation: callers
    /// needing responsiveness use `SkipIfInProgress` instead.
    pub async fn run(&self, kind: SyncKind) -> Result<SyncReport, SyncError> {
        info!("Starting {:?} sync pass", kind);

        let check_in = match self.api.check_in().await {
            Ok(response) => response,
            Err(e) => return self.fail(e).await,
        };
        let height = check_in.block_height;
        debug!("Checked in at height {}", height);

        let mut ctx = self.store.background_context();

        // Top up the derived-address window first so a fresh wallet has a
        // query surface at all.
        self.ledger.ensure_lookahead(&mut ctx)?;

        // Fetch transaction summaries for every known address, batched and
        // concurrent against the network.
        let addresses = ctx.state().all_addresses();
        let mut summaries = Vec::new();
        if !addresses.is_empty() {
            let batches = addresses
                .chunks(self.config.address_batch_size)
                .map(|chunk| self.api.address_transaction_summaries(chunk))
                .collect::<Vec<_>>();
            match try_join_all(batches).await {
                Ok(results) => summaries.extend(results.into_iter().flatten()),
                Err(e) => return self.fail(e).await,
            }
        }

        let txids: Vec<String> = summaries
            .iter()
            .map(|s| s.txid.clone())
            .unique()
            .sorted()
            .collect();
        let canonical: HashSet<String> = txids.iter().cloned().collect();
        debug!(
            "{} summaries over {} addresses, {} unique txids",
            summaries.len(),
            addresses.len(),
            txids.len()
        );

        let details = txids
            .iter()
            .map(|txid| self.api.transaction(txid))
            .collect::<Vec<_>>();
        let responses = match try_join_all(details).await {
            Ok(responses) => responses,
            Err(e) => return self.fail(e).await,
        };

        let persisted = TransactionBroker::persist_transactions(
            &mut ctx,
            &responses,
            height,
            kind == SyncKind::Full,
        );

        // Index math always follows persistence so it reflects the
        // just-persisted data, never a stale view.
        self.ledger.update_last_indexes(&mut ctx);
        self.ledger.prune_gaps(&mut ctx);
        if self.ledger.ensure_lookahead(&mut ctx)? > 0 {
            TransactionBroker::reconcile_classification(&mut ctx);
        }

        match self.api.user_verification().await {
            Ok(response) => UserBroker::persist_verification(&mut ctx, &response),
            Err(ApiError::NotFound) => debug!("No user record server-side"),
            Err(e) => return self.fail(e).await,
        }

        let mut invitations_updated = 0;
        let mut items_skipped = 0;
        match self.api.invitations().await {
            Ok(responses) => {
                for response in responses {
                    match InvitationBroker::apply_response(&mut ctx, &response) {
                        Ok(true) => invitations_updated += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!("Skipping invitation {}: {}", response.id, e);
                            items_skipped += 1;
                        }
                    }
                }
            }
            Err(e) => return self.fail(e).await,
        }

        let now = Utc::now();
        let expired = invitations::expire_stale(
            &mut ctx.state_mut().invitations,
            now,
            self.config.invitation_validity,
        );
        for id in &expired {
            let update = InvitationUpdateRequest {
                id: id.clone(),
                status: Some(InvitationStatusDto::Expired),
                address: None,
                txid: None,
            };
            // Best effort: the local transition already happened and the
            // server runs its own expiry clock.
            if let Err(e) = self.api.update_invitation(&update).await {
                warn!("Failed to report expiry of {}: {}", id, e);
            }
        }

        let groomed = self.grooming.sweep(&mut ctx, &canonical, now).await;

        ctx.state_mut().meta.last_synced_at = Some(now);
        ctx.state_mut().meta.last_block_height = height;
        ctx.save().await?;

        let report = SyncReport {
            kind,
            block_height: height,
            transactions_upserted: persisted.upserted,
            transactions_removed: persisted.removed,
            temporary_promoted: persisted.promoted,
            invitations_updated,
            invitations_expired: expired.len(),
            groomed_failed: groomed.failed,
            items_skipped,
            finished_at: now,
        };
        info!("{}", report.summary());
        Ok(report)
    }

    /// Terminal API failure for this pass. A 401 that disavows our
    /// identity clears local identity markers first, so the next sync
    /// re-establishes identity instead of failing the same way forever.
    async fn fail(&self, error: ApiError) -> Result<SyncReport, SyncError> {
        if error.should_deverify() {
            warn!("Server disavowed local identity ({}), de-verifying", error);
            let mut ctx = self.store.background_context();
            UserBroker::deverify(&mut ctx);
            ctx.save().await?;
        }
        Err(SyncError::Api(error))
    }
}
