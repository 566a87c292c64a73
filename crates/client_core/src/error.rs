use shared::{
    domain::{CustomerUserId, VendorProductId},
    error::{BackendError, FieldError},
};
use thiserror::Error;

use crate::operations::OperationKey;

pub type CommerceResult<T> = std::result::Result<T, CommerceError>;

#[derive(Debug, Clone, Error)]
pub enum CommerceError {
    #[error("session is not initialized; call initialize first")]
    NotInitialized,
    #[error("failed to bind user {user_id:?}: {source}")]
    Identity {
        user_id: Option<CustomerUserId>,
        source: BackendError,
    },
    #[error("failed to fetch paywalls: {0}")]
    Catalog(BackendError),
    #[error("product {vendor_product_id} is not recognized by the backend: {source}")]
    StaleProduct {
        vendor_product_id: VendorProductId,
        source: BackendError,
    },
    #[error("{0} is already in flight")]
    OperationInProgress(OperationKey),
    #[error("profile update rejected for fields [{}]: {source}", field_list(.source.fields.as_slice()))]
    ProfileUpdate { source: BackendError },
    #[error("backend error: {0}")]
    Backend(BackendError),
}

fn field_list(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl CommerceError {
    /// Backend detail for display; `None` for local pre-flight rejections.
    pub fn backend_detail(&self) -> Option<&BackendError> {
        match self {
            CommerceError::NotInitialized | CommerceError::OperationInProgress(_) => None,
            CommerceError::Identity { source, .. }
            | CommerceError::StaleProduct { source, .. }
            | CommerceError::ProfileUpdate { source } => Some(source),
            CommerceError::Catalog(source) | CommerceError::Backend(source) => Some(source),
        }
    }

    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, CommerceError::Backend(source) if source.is_user_cancellation())
    }

    /// Fields the backend refused in a profile update.
    pub fn rejected_fields(&self) -> &[FieldError] {
        match self {
            CommerceError::ProfileUpdate { source } => &source.fields,
            _ => &[],
        }
    }
}
