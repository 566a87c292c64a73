use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CustomerUserId, DeveloperId, EventKind, Gender, LogLevel, ProfileId, VendorProductId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub sdk_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_user_id: Option<CustomerUserId>,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub profile_id: ProfileId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_user_id: Option<CustomerUserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyRequest {
    pub customer_user_id: CustomerUserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResult {
    pub profile_id: ProfileId,
    pub customer_user_id: CustomerUserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub vendor_product_id: VendorProductId,
    pub localized_title: String,
    pub localized_description: String,
    pub localized_price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_period: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paywall {
    pub developer_id: DeveloperId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<String>,
    #[serde(default)]
    pub revision: u32,
    pub products: Vec<Product>,
}

impl Paywall {
    pub fn product(&self, vendor_product_id: &VendorProductId) -> Option<&Product> {
        self.products
            .iter()
            .find(|product| &product.vendor_product_id == vendor_product_id)
    }

    /// First vendor product id that appears more than once, if any.
    pub fn duplicate_product_id(&self) -> Option<&VendorProductId> {
        let mut seen = HashSet::new();
        self.products
            .iter()
            .map(|product| &product.vendor_product_id)
            .find(|id| !seen.insert(*id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaywallsResponse {
    pub paywalls: Vec<Paywall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLevel {
    pub id: String,
    pub is_active: bool,
    pub vendor_product_id: VendorProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub will_renew: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub vendor_product_id: VendorProductId,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_sandbox: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonSubscriptionInfo {
    pub vendor_product_id: VendorProductId,
    pub purchased_at: DateTime<Utc>,
    #[serde(default)]
    pub is_consumable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_user_id: Option<CustomerUserId>,
    #[serde(default)]
    pub access_levels: BTreeMap<String, AccessLevel>,
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionInfo>,
    #[serde(default)]
    pub non_subscriptions: BTreeMap<String, Vec<NonSubscriptionInfo>>,
}

impl PurchaserInfo {
    pub fn has_active_access(&self, access_level: &str) -> bool {
        self.access_levels
            .get(access_level)
            .is_some_and(|level| level.is_active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub vendor_product_id: VendorProductId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub vendor_product_id: VendorProductId,
    pub transaction_id: String,
    pub purchaser_info: PurchaserInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub vendor_product_id: VendorProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntitlement {
    pub vendor_product_id: VendorProductId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub purchaser_info: PurchaserInfo,
    #[serde(default)]
    pub restored: Vec<Entitlement>,
    #[serde(default)]
    pub failed: Vec<FailedEntitlement>,
}

impl RestoreResult {
    /// Some receipts restored, some rejected by validation.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Partial profile update: `None` fields are left unchanged server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitude_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitude_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appmetrica_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appmetrica_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_attributes: BTreeMap<String, String>,
}

impl ProfileAttributes {
    pub fn is_empty(&self) -> bool {
        self == &ProfileAttributes::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileResult {
    pub profile_id: ProfileId,
    #[serde(default)]
    pub updated_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoOffer {
    pub promo_type: String,
    pub variation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paywall: Option<Paywall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo: Option<PromoOffer>,
}

/// Push notification surfaced by the bridge outside any request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    ProfileUpdated(PurchaserInfo),
    PromoReceived(PromoOffer),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::ProfileUpdated(_) => EventKind::ProfileUpdated,
            SessionEvent::PromoReceived(_) => EventKind::PromoReceived,
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
