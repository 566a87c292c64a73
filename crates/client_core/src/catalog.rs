use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use shared::{
    domain::VendorProductId,
    error::{BackendError, ErrorCode},
    protocol::{Paywall, Product},
};
use tracing::{info, warn};

use crate::{
    bridge::SdkBridge,
    error::{CommerceError, CommerceResult},
};

/// Paywalls produced by one successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub paywalls: Vec<Paywall>,
    /// Increases by one for every snapshot applied to the cache.
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn paywall(&self, developer_id: &str) -> Option<&Paywall> {
        self.paywalls
            .iter()
            .find(|paywall| paywall.developer_id.as_str() == developer_id)
    }

    pub fn find_product(&self, vendor_product_id: &VendorProductId) -> Option<&Product> {
        self.paywalls
            .iter()
            .find_map(|paywall| paywall.product(vendor_product_id))
    }
}

#[derive(Default)]
struct CatalogCache {
    snapshot: Option<Arc<CatalogSnapshot>>,
    generation: u64,
}

pub struct CatalogService {
    bridge: Arc<dyn SdkBridge>,
    cache: RwLock<CatalogCache>,
}

impl CatalogService {
    pub fn new(bridge: Arc<dyn SdkBridge>) -> Self {
        Self {
            bridge,
            cache: RwLock::new(CatalogCache::default()),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    pub fn find_product(&self, vendor_product_id: &VendorProductId) -> Option<Product> {
        self.snapshot()?.find_product(vendor_product_id).cloned()
    }

    /// Fetches the paywall set and replaces the cached snapshot wholesale.
    /// Overlapping fetches are not coalesced: whichever response lands last
    /// is the one left in the cache.
    pub async fn fetch_paywalls(&self) -> CommerceResult<Arc<CatalogSnapshot>> {
        let response = self.bridge.get_paywalls().await.map_err(|source| {
            warn!("catalog: fetch failed, keeping previous snapshot: {source}");
            CommerceError::Catalog(source)
        })?;

        validate_identifiers(&response.paywalls).map_err(|source| {
            warn!("catalog: rejected malformed snapshot: {source}");
            CommerceError::Catalog(source)
        })?;

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.generation += 1;
        let snapshot = Arc::new(CatalogSnapshot {
            paywalls: response.paywalls,
            generation: cache.generation,
            fetched_at: Utc::now(),
        });
        cache.snapshot = Some(Arc::clone(&snapshot));
        info!(
            "catalog: applied generation={} paywalls={}",
            snapshot.generation,
            snapshot.paywalls.len()
        );
        Ok(snapshot)
    }
}

fn validate_identifiers(paywalls: &[Paywall]) -> Result<(), BackendError> {
    let mut developer_ids = HashSet::new();
    for paywall in paywalls {
        if !developer_ids.insert(&paywall.developer_id) {
            return Err(BackendError::new(
                ErrorCode::Validation,
                format!("duplicate paywall developer id {}", paywall.developer_id),
            ));
        }
        if let Some(product_id) = paywall.duplicate_product_id() {
            return Err(BackendError::new(
                ErrorCode::Validation,
                format!(
                    "duplicate product {product_id} in paywall {}",
                    paywall.developer_id
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
