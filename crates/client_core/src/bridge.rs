use async_trait::async_trait;
use shared::{
    domain::CustomerUserId,
    error::{BackendError, ErrorCode},
    protocol::{
        ActivationRequest, ActivationResult, IdentityResult, PaywallsResponse, Product,
        ProfileAttributes, ProfileResult, PromoResult, PurchaseResult, PurchaserInfo,
        RestoreResult, SessionEvent,
    },
};
use tokio::sync::broadcast;

pub type BridgeResult<T> = std::result::Result<T, BackendError>;

/// Request/response and push-event contract of the SDK that fronts the
/// commerce backend.
#[async_trait]
pub trait SdkBridge: Send + Sync {
    async fn activate(&self, request: ActivationRequest) -> BridgeResult<ActivationResult>;
    async fn identify(&self, user_id: &CustomerUserId) -> BridgeResult<IdentityResult>;
    async fn logout(&self) -> BridgeResult<()>;
    async fn update_profile(&self, attributes: &ProfileAttributes) -> BridgeResult<ProfileResult>;
    async fn get_purchaser_info(&self) -> BridgeResult<PurchaserInfo>;
    async fn get_paywalls(&self) -> BridgeResult<PaywallsResponse>;
    async fn make_purchase(&self, product: &Product) -> BridgeResult<PurchaseResult>;
    async fn restore_purchases(&self) -> BridgeResult<RestoreResult>;
    async fn get_promo(&self) -> BridgeResult<PromoResult>;
    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent>;
}

pub struct MissingSdkBridge {
    events: broadcast::Sender<SessionEvent>,
}

impl MissingSdkBridge {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for MissingSdkBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable(operation: &str) -> BackendError {
    BackendError::new(
        ErrorCode::Transport,
        format!("sdk bridge is unavailable: {operation}"),
    )
}

#[async_trait]
impl SdkBridge for MissingSdkBridge {
    async fn activate(&self, _request: ActivationRequest) -> BridgeResult<ActivationResult> {
        Err(unavailable("activate"))
    }

    async fn identify(&self, _user_id: &CustomerUserId) -> BridgeResult<IdentityResult> {
        Err(unavailable("identify"))
    }

    async fn logout(&self) -> BridgeResult<()> {
        Err(unavailable("logout"))
    }

    async fn update_profile(&self, _attributes: &ProfileAttributes) -> BridgeResult<ProfileResult> {
        Err(unavailable("update_profile"))
    }

    async fn get_purchaser_info(&self) -> BridgeResult<PurchaserInfo> {
        Err(unavailable("get_purchaser_info"))
    }

    async fn get_paywalls(&self) -> BridgeResult<PaywallsResponse> {
        Err(unavailable("get_paywalls"))
    }

    async fn make_purchase(&self, _product: &Product) -> BridgeResult<PurchaseResult> {
        Err(unavailable("make_purchase"))
    }

    async fn restore_purchases(&self) -> BridgeResult<RestoreResult> {
        Err(unavailable("restore_purchases"))
    }

    async fn get_promo(&self) -> BridgeResult<PromoResult> {
        Err(unavailable("get_promo"))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
