use std::sync::{Arc, PoisonError, RwLock};

use shared::{
    domain::CustomerUserId,
    error::{BackendError, ErrorCode},
    protocol::IdentityResult,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    bridge::SdkBridge,
    error::{CommerceError, CommerceResult},
};

/// Outcome of [`IdentityBinder::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The id was already bound; the bridge was not called.
    Unchanged,
    Rebound(IdentityResult),
}

/// Owns the session's customer user id.
pub struct IdentityBinder {
    bridge: Arc<dyn SdkBridge>,
    current: RwLock<Option<CustomerUserId>>,
    // Serializes bind/clear so the stored id always matches the last
    // identity the backend accepted.
    sequencer: Mutex<()>,
}

impl IdentityBinder {
    pub fn new(bridge: Arc<dyn SdkBridge>) -> Self {
        Self {
            bridge,
            current: RwLock::new(None),
            sequencer: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Option<CustomerUserId> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records an id that the bridge already accepted during activation.
    pub(crate) fn adopt(&self, user_id: Option<CustomerUserId>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = user_id;
    }

    pub async fn bind(&self, user_id: CustomerUserId) -> CommerceResult<BindOutcome> {
        if user_id.as_str().trim().is_empty() {
            return Err(CommerceError::Identity {
                user_id: Some(user_id),
                source: BackendError::new(
                    ErrorCode::Validation,
                    "customer user id must not be empty",
                ),
            });
        }

        let _sequence = self.sequencer.lock().await;
        if self.current().as_ref() == Some(&user_id) {
            return Ok(BindOutcome::Unchanged);
        }

        match self.bridge.identify(&user_id).await {
            Ok(result) => {
                info!(
                    "identity: bound customer_user_id={} profile_id={}",
                    user_id, result.profile_id
                );
                self.adopt(Some(user_id));
                Ok(BindOutcome::Rebound(result))
            }
            Err(source) => {
                warn!("identity: bind rejected customer_user_id={user_id}: {source}");
                Err(CommerceError::Identity {
                    user_id: Some(user_id),
                    source,
                })
            }
        }
    }

    pub async fn clear(&self) -> CommerceResult<()> {
        let _sequence = self.sequencer.lock().await;
        if let Err(source) = self.bridge.logout().await {
            warn!("identity: logout failed: {source}");
            return Err(CommerceError::Identity {
                user_id: self.current(),
                source,
            });
        }
        let previous = self.current();
        self.adopt(None);
        info!("identity: cleared previous={previous:?}");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
