//! User persistence broker: verification state upserts and the deliberate
//! local de-verification performed when the server disavows our identity.

use tracing::{info, warn};

use crate::api::types::{UserVerificationResponse, VerificationStatusDto};
use crate::store::context::StoreContext;
use crate::store::records::{UserRecord, VerificationStatus};

pub struct UserBroker;

impl UserBroker {
    /// Record the server-issued user id and local device id after
    /// registration.
    pub fn register_device(ctx: &mut StoreContext, user_id: String, device_id: String) {
        ctx.state_mut().user = Some(UserRecord {
            id: Some(user_id),
            device_id: Some(device_id),
            verification: VerificationStatus::Unverified,
            verified_identities: Vec::new(),
        });
        info!("Registered user/device");
    }

    /// Merge the server-reported verification status.
    pub fn persist_verification(ctx: &mut StoreContext, response: &UserVerificationResponse) {
        let verification = match response.status {
            VerificationStatusDto::New => VerificationStatus::Unverified,
            VerificationStatusDto::Pending => VerificationStatus::Pending,
            VerificationStatusDto::Verified => VerificationStatus::Verified,
        };

        let user = ctx.state_mut().user.get_or_insert_with(|| UserRecord {
            id: None,
            device_id: None,
            verification: VerificationStatus::Unverified,
            verified_identities: Vec::new(),
        });
        user.id = Some(response.id.clone());
        user.verification = verification;
        user.verified_identities = response.identities.clone();
    }

    /// Clear local identity markers after a 401 device-mismatch or
    /// record-not-found. The next sync re-establishes identity instead of
    /// repeatedly failing against a server that has disavowed us.
    pub fn deverify(ctx: &mut StoreContext) {
        if let Some(user) = ctx.state_mut().user.as_mut() {
            user.id = None;
            user.device_id = None;
            user.verification = VerificationStatus::Unverified;
            user.verified_identities.clear();
            warn!("De-verified local user: identity markers cleared");
        }
    }
}
