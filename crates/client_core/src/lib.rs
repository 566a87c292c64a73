use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use shared::{
    domain::{CustomerUserId, EventKind, LogLevel, VendorProductId},
    error::{BackendError, ErrorCode},
    protocol::{
        ActivationRequest, ActivationResult, Product, ProfileAttributes, ProfileResult,
        PromoResult, PurchaseResult, PurchaserInfo, RestoreResult, SessionEvent,
    },
};
use tokio::{sync::OnceCell, task::JoinHandle};
use tracing::{debug, info, warn};

pub mod bridge;
pub mod catalog;
pub mod error;
pub mod events;
pub mod http_bridge;
pub mod identity;
pub mod operations;

pub use bridge::{BridgeResult, MissingSdkBridge, SdkBridge};
pub use catalog::{CatalogService, CatalogSnapshot};
pub use error::{CommerceError, CommerceResult};
pub use events::{EventCallback, EventHub, SubscriptionHandle};
pub use http_bridge::HttpBridge;
pub use identity::{BindOutcome, IdentityBinder};
pub use operations::{CommerceOperations, OperationKey, OperationState, Settlement};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub log_level: LogLevel,
}

/// Entry point used by the UI layer.
#[async_trait]
pub trait CommerceHandle: Send + Sync {
    async fn initialize(
        &self,
        sdk_key: &str,
        customer_user_id: Option<CustomerUserId>,
    ) -> CommerceResult<ActivationResult>;
    async fn identify(&self, user_id: CustomerUserId) -> CommerceResult<BindOutcome>;
    async fn logout(&self) -> CommerceResult<()>;
    async fn fetch_paywalls(&self) -> CommerceResult<Arc<CatalogSnapshot>>;
    async fn purchase(&self, product: Product) -> CommerceResult<PurchaseResult>;
    async fn restore(&self) -> CommerceResult<RestoreResult>;
    async fn update_profile(&self, attributes: ProfileAttributes)
        -> CommerceResult<ProfileResult>;
    async fn purchaser_info(&self) -> CommerceResult<PurchaserInfo>;
    async fn promo(&self) -> CommerceResult<PromoResult>;
    fn add_event_listener(&self, kind: EventKind, callback: EventCallback) -> SubscriptionHandle;
    fn remove_event_listener(&self, handle: SubscriptionHandle) -> bool;
    fn current_user_id(&self) -> Option<CustomerUserId>;
}

/// Composes identity, events, catalog and operations over one bridge and
/// gates everything that reaches the network behind activation.
pub struct CommerceSession {
    bridge: Arc<dyn SdkBridge>,
    options: SessionOptions,
    activation: OnceCell<ActivationResult>,
    identity: IdentityBinder,
    events: Arc<EventHub>,
    catalog: CatalogService,
    operations: CommerceOperations,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl CommerceSession {
    pub fn new(bridge: Arc<dyn SdkBridge>) -> Arc<Self> {
        Self::with_options(bridge, SessionOptions::default())
    }

    /// Session with no backend configured. Every network operation fails
    /// with a transport error.
    pub fn detached(options: SessionOptions) -> Arc<Self> {
        Self::with_options(Arc::new(MissingSdkBridge::new()), options)
    }

    pub fn with_options(bridge: Arc<dyn SdkBridge>, options: SessionOptions) -> Arc<Self> {
        Arc::new(Self {
            identity: IdentityBinder::new(Arc::clone(&bridge)),
            catalog: CatalogService::new(Arc::clone(&bridge)),
            operations: CommerceOperations::new(Arc::clone(&bridge)),
            events: Arc::new(EventHub::new()),
            activation: OnceCell::new(),
            event_pump: Mutex::new(None),
            options,
            bridge,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.activation.initialized()
    }

    /// Activates the bridge once. Later calls return the first successful
    /// activation without touching the bridge; a failed activation is not
    /// remembered and may be retried.
    pub async fn initialize(
        &self,
        sdk_key: &str,
        customer_user_id: Option<CustomerUserId>,
    ) -> CommerceResult<ActivationResult> {
        if let Some(activation) = self.activation.get() {
            debug!("session: already initialized, returning cached activation");
            return Ok(activation.clone());
        }
        let activation = self
            .activation
            .get_or_try_init(|| self.activate(sdk_key, customer_user_id))
            .await?;
        Ok(activation.clone())
    }

    async fn activate(
        &self,
        sdk_key: &str,
        customer_user_id: Option<CustomerUserId>,
    ) -> CommerceResult<ActivationResult> {
        let sdk_key = sdk_key.trim();
        if sdk_key.is_empty() {
            return Err(CommerceError::Backend(BackendError::new(
                ErrorCode::Validation,
                "sdk key must not be empty",
            )));
        }
        let customer_user_id = customer_user_id.filter(|id| !id.as_str().trim().is_empty());

        // Subscribe before activating so events pushed right after
        // activation are not lost.
        let bridge_events = self.bridge.subscribe_events();
        let activation = self
            .bridge
            .activate(ActivationRequest {
                sdk_key: sdk_key.to_string(),
                customer_user_id: customer_user_id.clone(),
                log_level: self.options.log_level,
            })
            .await
            .map_err(|source| {
                warn!("session: activation failed: {source}");
                CommerceError::Backend(source)
            })?;

        self.identity
            .adopt(activation.customer_user_id.clone().or(customer_user_id));
        let pump = self.events.attach(bridge_events);
        if let Some(previous) = self
            .event_pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pump)
        {
            previous.abort();
        }

        info!(
            "session: activated profile_id={} customer_user_id={:?}",
            activation.profile_id,
            self.identity.current()
        );
        Ok(activation)
    }

    fn ensure_initialized(&self) -> CommerceResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CommerceError::NotInitialized)
        }
    }

    pub async fn identify(&self, user_id: CustomerUserId) -> CommerceResult<BindOutcome> {
        self.ensure_initialized()?;
        self.identity.bind(user_id).await
    }

    pub async fn logout(&self) -> CommerceResult<()> {
        self.ensure_initialized()?;
        self.identity.clear().await
    }

    pub fn current_user_id(&self) -> Option<CustomerUserId> {
        self.identity.current()
    }

    pub async fn fetch_paywalls(&self) -> CommerceResult<Arc<CatalogSnapshot>> {
        self.ensure_initialized()?;
        self.catalog.fetch_paywalls().await
    }

    /// Last applied catalog snapshot, without a network call.
    pub fn paywalls(&self) -> Option<Arc<CatalogSnapshot>> {
        self.catalog.snapshot()
    }

    pub fn find_product(&self, vendor_product_id: &VendorProductId) -> Option<Product> {
        self.catalog.find_product(vendor_product_id)
    }

    pub async fn purchase(&self, product: Product) -> CommerceResult<PurchaseResult> {
        self.ensure_initialized()?;
        self.operations.purchase(product).await
    }

    pub async fn restore(&self) -> CommerceResult<RestoreResult> {
        self.ensure_initialized()?;
        self.operations.restore().await
    }

    pub async fn update_profile(
        &self,
        attributes: ProfileAttributes,
    ) -> CommerceResult<ProfileResult> {
        self.ensure_initialized()?;
        self.operations.update_profile(attributes).await
    }

    pub async fn purchaser_info(&self) -> CommerceResult<PurchaserInfo> {
        self.ensure_initialized()?;
        self.operations.purchaser_info().await
    }

    pub async fn promo(&self) -> CommerceResult<PromoResult> {
        self.ensure_initialized()?;
        self.operations.promo().await
    }

    pub fn operation_state(&self, key: &OperationKey) -> OperationState {
        self.operations.state(key)
    }

    pub fn last_settlement(&self, key: &OperationKey) -> Option<Settlement> {
        self.operations.last_settlement(key)
    }

    pub fn add_event_listener<F>(&self, kind: EventKind, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, callback)
    }

    pub fn remove_event_listener(&self, handle: SubscriptionHandle) -> bool {
        self.events.unsubscribe(handle)
    }

    pub fn listener_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.events.is_closed()
    }

    /// Stops event delivery and drops every subscription. Listeners added
    /// afterwards are not registered.
    pub fn teardown(&self) {
        if let Some(pump) = self
            .event_pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        self.events.close();
        info!("session: torn down");
    }
}

impl Drop for CommerceSession {
    fn drop(&mut self) {
        if let Some(pump) = self
            .event_pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
    }
}

#[async_trait]
impl CommerceHandle for CommerceSession {
    async fn initialize(
        &self,
        sdk_key: &str,
        customer_user_id: Option<CustomerUserId>,
    ) -> CommerceResult<ActivationResult> {
        CommerceSession::initialize(self, sdk_key, customer_user_id).await
    }

    async fn identify(&self, user_id: CustomerUserId) -> CommerceResult<BindOutcome> {
        CommerceSession::identify(self, user_id).await
    }

    async fn logout(&self) -> CommerceResult<()> {
        CommerceSession::logout(self).await
    }

    async fn fetch_paywalls(&self) -> CommerceResult<Arc<CatalogSnapshot>> {
        CommerceSession::fetch_paywalls(self).await
    }

    async fn purchase(&self, product: Product) -> CommerceResult<PurchaseResult> {
        CommerceSession::purchase(self, product).await
    }

    async fn restore(&self) -> CommerceResult<RestoreResult> {
        CommerceSession::restore(self).await
    }

    async fn update_profile(
        &self,
        attributes: ProfileAttributes,
    ) -> CommerceResult<ProfileResult> {
        CommerceSession::update_profile(self, attributes).await
    }

    async fn purchaser_info(&self) -> CommerceResult<PurchaserInfo> {
        CommerceSession::purchaser_info(self).await
    }

    async fn promo(&self) -> CommerceResult<PromoResult> {
        CommerceSession::promo(self).await
    }

    fn add_event_listener(&self, kind: EventKind, callback: EventCallback) -> SubscriptionHandle {
        self.events.subscribe(kind, move |event| callback(event))
    }

    fn remove_event_listener(&self, handle: SubscriptionHandle) -> bool {
        CommerceSession::remove_event_listener(self, handle)
    }

    fn current_user_id(&self) -> Option<CustomerUserId> {
        CommerceSession::current_user_id(self)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
