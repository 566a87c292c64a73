//! In-process bridge double shared by the unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use shared::{
    domain::{CustomerUserId, DeveloperId, ProfileId, VendorProductId},
    error::{BackendError, ErrorCode, FieldError},
    protocol::{
        ActivationRequest, ActivationResult, Entitlement, IdentityResult, Paywall,
        PaywallsResponse, Product, ProfileAttributes, ProfileResult, PromoOffer, PromoResult,
        PurchaseResult, PurchaserInfo, RestoreResult, SessionEvent,
    },
};
use tokio::sync::{broadcast, Semaphore};

use crate::bridge::{BridgeResult, SdkBridge};

pub fn product(id: &str, price: &str) -> Product {
    Product {
        vendor_product_id: VendorProductId::new(id),
        localized_title: format!("{id} title"),
        localized_description: format!("{id} description"),
        localized_price: price.to_string(),
        price_amount: None,
        currency_code: None,
        subscription_period: None,
    }
}

pub fn paywall(developer_id: &str, products: Vec<Product>) -> Paywall {
    Paywall {
        developer_id: DeveloperId::new(developer_id),
        name: format!("{developer_id} paywall"),
        variation_id: None,
        revision: 1,
        products,
    }
}

/// A paywall response that is held back until the test releases `gate`.
pub struct ScriptedPaywalls {
    pub result: BridgeResult<PaywallsResponse>,
    pub gate: Option<Arc<Semaphore>>,
}

pub struct FakeBridge {
    calls: Mutex<Vec<String>>,
    activation_error: Mutex<Option<BackendError>>,
    rejected_user_ids: HashSet<String>,
    identify_gate: Option<Arc<Semaphore>>,
    logout_error: Option<BackendError>,
    paywalls: Vec<Paywall>,
    scripted_paywalls: Mutex<VecDeque<ScriptedPaywalls>>,
    purchase_errors: HashMap<VendorProductId, BackendError>,
    purchase_gate: Option<Arc<Semaphore>>,
    restore_result: BridgeResult<RestoreResult>,
    restore_gate: Option<Arc<Semaphore>>,
    profile_rejections: Vec<FieldError>,
    applied_profiles: Mutex<Vec<ProfileAttributes>>,
    events: broadcast::Sender<SessionEvent>,
}

impl FakeBridge {
    pub fn ok() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            calls: Mutex::new(Vec::new()),
            activation_error: Mutex::new(None),
            rejected_user_ids: HashSet::new(),
            identify_gate: None,
            logout_error: None,
            paywalls: vec![paywall("pw1", vec![product("p1", "$9.99")])],
            scripted_paywalls: Mutex::new(VecDeque::new()),
            purchase_errors: HashMap::new(),
            purchase_gate: None,
            restore_result: Ok(RestoreResult {
                purchaser_info: PurchaserInfo::default(),
                restored: vec![Entitlement {
                    vendor_product_id: VendorProductId::new("p1"),
                    access_level: Some("premium".to_string()),
                }],
                failed: Vec::new(),
            }),
            restore_gate: None,
            profile_rejections: Vec::new(),
            applied_profiles: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn failing_activation(self, err: BackendError) -> Self {
        *self.activation_error.lock().expect("activation lock") = Some(err);
        self
    }

    pub fn heal_activation(&self) {
        *self.activation_error.lock().expect("activation lock") = None;
    }

    pub fn rejecting_user(mut self, user_id: &str) -> Self {
        self.rejected_user_ids.insert(user_id.to_string());
        self
    }

    pub fn holding_identifies(mut self, gate: Arc<Semaphore>) -> Self {
        self.identify_gate = Some(gate);
        self
    }

    pub fn failing_logout(mut self, err: BackendError) -> Self {
        self.logout_error = Some(err);
        self
    }

    pub fn with_paywalls(mut self, paywalls: Vec<Paywall>) -> Self {
        self.paywalls = paywalls;
        self
    }

    pub fn script_paywalls(&self, scripted: ScriptedPaywalls) {
        self.scripted_paywalls
            .lock()
            .expect("paywall script lock")
            .push_back(scripted);
    }

    pub fn failing_purchase(mut self, product_id: &str, err: BackendError) -> Self {
        self.purchase_errors
            .insert(VendorProductId::new(product_id), err);
        self
    }

    pub fn holding_purchases(mut self, gate: Arc<Semaphore>) -> Self {
        self.purchase_gate = Some(gate);
        self
    }

    pub fn with_restore_result(mut self, result: BridgeResult<RestoreResult>) -> Self {
        self.restore_result = result;
        self
    }

    pub fn holding_restores(mut self, gate: Arc<Semaphore>) -> Self {
        self.restore_gate = Some(gate);
        self
    }

    pub fn rejecting_profile_fields(mut self, fields: Vec<FieldError>) -> Self {
        self.profile_rejections = fields;
        self
    }

    pub fn applied_profiles(&self) -> Vec<ProfileAttributes> {
        self.applied_profiles.lock().expect("profile lock").clone()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("calls lock").push(call.into());
    }

    fn known_product(&self, id: &VendorProductId) -> bool {
        self.paywalls.iter().any(|paywall| paywall.product(id).is_some())
    }
}

async fn wait_for(gate: &Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        gate.acquire().await.expect("gate open").forget();
    }
}

#[async_trait]
impl SdkBridge for FakeBridge {
    async fn activate(&self, request: ActivationRequest) -> BridgeResult<ActivationResult> {
        self.record(format!("activate:{}", request.sdk_key));
        if let Some(err) = self.activation_error.lock().expect("activation lock").clone() {
            return Err(err);
        }
        Ok(ActivationResult {
            profile_id: ProfileId::new("profile-1"),
            customer_user_id: request.customer_user_id,
        })
    }

    async fn identify(&self, user_id: &CustomerUserId) -> BridgeResult<IdentityResult> {
        self.record(format!("identify:{user_id}"));
        wait_for(&self.identify_gate).await;
        if self.rejected_user_ids.contains(user_id.as_str()) {
            return Err(BackendError::new(
                ErrorCode::Validation,
                format!("customer user id {user_id} rejected"),
            ));
        }
        Ok(IdentityResult {
            profile_id: ProfileId::new(format!("profile-{user_id}")),
            customer_user_id: user_id.clone(),
        })
    }

    async fn logout(&self) -> BridgeResult<()> {
        self.record("logout");
        match &self.logout_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn update_profile(&self, attributes: &ProfileAttributes) -> BridgeResult<ProfileResult> {
        self.record("update_profile");
        if !self.profile_rejections.is_empty() {
            return Err(
                BackendError::new(ErrorCode::Validation, "profile attributes rejected")
                    .with_fields(self.profile_rejections.clone()),
            );
        }
        self.applied_profiles
            .lock()
            .expect("profile lock")
            .push(attributes.clone());
        let mut updated_fields = Vec::new();
        if attributes.email.is_some() {
            updated_fields.push("email".to_string());
        }
        if attributes.first_name.is_some() {
            updated_fields.push("first_name".to_string());
        }
        Ok(ProfileResult {
            profile_id: ProfileId::new("profile-1"),
            updated_fields,
        })
    }

    async fn get_purchaser_info(&self) -> BridgeResult<PurchaserInfo> {
        self.record("get_purchaser_info");
        Ok(PurchaserInfo::default())
    }

    async fn get_paywalls(&self) -> BridgeResult<PaywallsResponse> {
        self.record("get_paywalls");
        let scripted = self
            .scripted_paywalls
            .lock()
            .expect("paywall script lock")
            .pop_front();
        match scripted {
            Some(scripted) => {
                wait_for(&scripted.gate).await;
                scripted.result
            }
            None => Ok(PaywallsResponse {
                paywalls: self.paywalls.clone(),
            }),
        }
    }

    async fn make_purchase(&self, product: &Product) -> BridgeResult<PurchaseResult> {
        self.record(format!("purchase:{}", product.vendor_product_id));
        wait_for(&self.purchase_gate).await;
        if let Some(err) = self.purchase_errors.get(&product.vendor_product_id) {
            return Err(err.clone());
        }
        if !self.known_product(&product.vendor_product_id) {
            return Err(BackendError::new(
                ErrorCode::UnknownProduct,
                format!("unknown product {}", product.vendor_product_id),
            ));
        }
        Ok(PurchaseResult {
            vendor_product_id: product.vendor_product_id.clone(),
            transaction_id: format!("tx-{}", product.vendor_product_id),
            purchaser_info: PurchaserInfo::default(),
        })
    }

    async fn restore_purchases(&self) -> BridgeResult<RestoreResult> {
        self.record("restore");
        wait_for(&self.restore_gate).await;
        self.restore_result.clone()
    }

    async fn get_promo(&self) -> BridgeResult<PromoResult> {
        self.record("get_promo");
        Ok(PromoResult {
            promo: Some(PromoOffer {
                promo_type: "discount".to_string(),
                variation_id: "promo-variation".to_string(),
                expires_at: None,
                paywall: None,
            }),
        })
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
