use std::{
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use shared::{
    domain::VendorProductId,
    error::{BackendError, ErrorCode},
    protocol::{
        Product, ProfileAttributes, ProfileResult, PromoResult, PurchaseResult, PurchaserInfo,
        RestoreResult,
    },
};
use tracing::{debug, info, warn};

use crate::{
    bridge::{BridgeResult, SdkBridge},
    error::{CommerceError, CommerceResult},
};

/// Identity of an operation for in-flight gating.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKey {
    Purchase(VendorProductId),
    Restore,
    ProfileUpdate,
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKey::Purchase(product) => write!(f, "purchase of {product}"),
            OperationKey::Restore => f.write_str("restore"),
            OperationKey::ProfileUpdate => f.write_str("profile update"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    Failed,
}

#[derive(Default)]
struct GateTable {
    in_flight: HashSet<OperationKey>,
    last_settlement: HashMap<OperationKey, Settlement>,
}

/// Marks a key InFlight until dropped; dropping settles it back to Idle.
struct InFlightGuard {
    table: Arc<Mutex<GateTable>>,
    key: OperationKey,
    settlement: Settlement,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.in_flight.remove(&self.key);
        table
            .last_settlement
            .insert(self.key.clone(), self.settlement);
        debug!("operations: {} settled {:?}", self.key, self.settlement);
    }
}

pub struct CommerceOperations {
    bridge: Arc<dyn SdkBridge>,
    gates: Arc<Mutex<GateTable>>,
}

impl CommerceOperations {
    pub fn new(bridge: Arc<dyn SdkBridge>) -> Self {
        Self {
            bridge,
            gates: Arc::new(Mutex::new(GateTable::default())),
        }
    }

    pub fn state(&self, key: &OperationKey) -> OperationState {
        let table = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if table.in_flight.contains(key) {
            OperationState::InFlight
        } else {
            OperationState::Idle
        }
    }

    pub fn last_settlement(&self, key: &OperationKey) -> Option<Settlement> {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_settlement
            .get(key)
            .copied()
    }

    pub async fn purchase(&self, product: Product) -> CommerceResult<PurchaseResult> {
        let vendor_product_id = product.vendor_product_id.clone();
        let key = OperationKey::Purchase(vendor_product_id.clone());
        let result = self
            .run_gated(key, move |bridge| async move {
                bridge.make_purchase(&product).await
            })
            .await;

        match result {
            Ok(Ok(confirmation)) => {
                info!(
                    "operations: purchase confirmed product={} transaction={}",
                    confirmation.vendor_product_id, confirmation.transaction_id
                );
                Ok(confirmation)
            }
            Ok(Err(source)) if source.code == ErrorCode::UnknownProduct => {
                warn!("operations: purchase rejected stale product={vendor_product_id}");
                Err(CommerceError::StaleProduct {
                    vendor_product_id,
                    source,
                })
            }
            Ok(Err(source)) => {
                if source.is_user_cancellation() {
                    info!("operations: purchase cancelled by user product={vendor_product_id}");
                } else {
                    warn!("operations: purchase failed product={vendor_product_id}: {source}");
                }
                Err(CommerceError::Backend(source))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn restore(&self) -> CommerceResult<RestoreResult> {
        let result = self
            .run_gated(OperationKey::Restore, |bridge| async move {
                bridge.restore_purchases().await
            })
            .await?;

        match result {
            Ok(restored) => {
                if restored.is_partial() {
                    warn!(
                        "operations: restore partial restored={} failed={}",
                        restored.restored.len(),
                        restored.failed.len()
                    );
                } else {
                    info!("operations: restore completed restored={}", restored.restored.len());
                }
                Ok(restored)
            }
            Err(source) => {
                warn!("operations: restore failed: {source}");
                Err(CommerceError::Backend(source))
            }
        }
    }

    pub async fn update_profile(
        &self,
        attributes: ProfileAttributes,
    ) -> CommerceResult<ProfileResult> {
        let result = self
            .run_gated(OperationKey::ProfileUpdate, move |bridge| async move {
                bridge.update_profile(&attributes).await
            })
            .await?;

        match result {
            Ok(updated) => {
                info!(
                    "operations: profile updated fields={}",
                    updated.updated_fields.join(",")
                );
                Ok(updated)
            }
            Err(source) if !source.fields.is_empty() => {
                warn!(
                    "operations: profile update rejected fields={}",
                    source.field_names().join(",")
                );
                Err(CommerceError::ProfileUpdate { source })
            }
            Err(source) => {
                warn!("operations: profile update failed: {source}");
                Err(CommerceError::Backend(source))
            }
        }
    }

    pub async fn purchaser_info(&self) -> CommerceResult<PurchaserInfo> {
        self.bridge
            .get_purchaser_info()
            .await
            .map_err(CommerceError::Backend)
    }

    pub async fn promo(&self) -> CommerceResult<PromoResult> {
        self.bridge.get_promo().await.map_err(CommerceError::Backend)
    }

    fn acquire(&self, key: OperationKey) -> CommerceResult<InFlightGuard> {
        let mut table = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if !table.in_flight.insert(key.clone()) {
            debug!("operations: rejected {key}, already in flight");
            return Err(CommerceError::OperationInProgress(key));
        }
        debug!("operations: {key} in flight");
        Ok(InFlightGuard {
            table: Arc::clone(&self.gates),
            key,
            settlement: Settlement::Failed,
        })
    }

    /// Runs the bridge call on its own task so that it settles even when
    /// the awaiting caller goes away. The outer `Result` carries local
    /// rejections, the inner one the backend outcome.
    async fn run_gated<T, F, Fut>(
        &self,
        key: OperationKey,
        call: F,
    ) -> CommerceResult<BridgeResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn SdkBridge>) -> Fut,
        Fut: Future<Output = BridgeResult<T>> + Send + 'static,
    {
        let mut guard = self.acquire(key.clone())?;
        let pending = call(Arc::clone(&self.bridge));
        let task = tokio::spawn(async move {
            let result = pending.await;
            guard.settlement = if result.is_ok() {
                Settlement::Succeeded
            } else {
                Settlement::Failed
            };
            drop(guard);
            result
        });

        task.await.map_err(|err| {
            warn!("operations: {key} task aborted: {err}");
            CommerceError::Backend(BackendError::new(
                ErrorCode::Internal,
                format!("{key} did not complete: {err}"),
            ))
        })
    }
}

#[cfg(test)]
#[path = "tests/operations_tests.rs"]
mod tests;
