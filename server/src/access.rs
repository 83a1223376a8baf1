use chrono::Utc;
use quillpad_core::{RelayStore, ids::is_valid_document_id, store::Permission};
use tracing::warn;

use crate::error::RelayError;

/// Structured join denial. Store failures deliberately collapse into
/// `NotFound` so internal state never leaks to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    InvalidId,
    NotFound,
    NoAccess,
}

impl From<AccessDenied> for RelayError {
    fn from(denied: AccessDenied) -> Self {
        match denied {
            AccessDenied::InvalidId | AccessDenied::NotFound => RelayError::DocumentNotFound,
            AccessDenied::NoAccess => RelayError::AccessDenied,
        }
    }
}

/// Resolves the caller's role on a document. Checks are ordered: owner,
/// then the explicit user share, then an unexpired share link; the first
/// grant wins. An unknown share token falls through to `NoAccess`, never
/// `NotFound`. Read-only and idempotent.
pub async fn resolve_access(
    store: &dyn RelayStore,
    document_id: &str,
    user_id: &str,
    share_token: Option<&str>,
) -> Result<Permission, AccessDenied> {
    if !is_valid_document_id(document_id) {
        return Err(AccessDenied::InvalidId);
    }

    let document = match store.find_document_by_id(document_id).await {
        Ok(Some(document)) => document,
        Ok(None) => return Err(AccessDenied::NotFound),
        Err(err) => {
            warn!(document_id, error = %err, "document lookup failed during access resolution");
            return Err(AccessDenied::NotFound);
        }
    };

    if document.owner_id == user_id {
        return Ok(Permission::Owner);
    }

    match store
        .find_share_by_document_and_user(document_id, user_id)
        .await
    {
        Ok(Some(share)) => return Ok(share.permission),
        Ok(None) => {}
        Err(err) => {
            warn!(document_id, error = %err, "share lookup failed during access resolution");
            return Err(AccessDenied::NotFound);
        }
    }

    if let Some(token) = share_token {
        match store
            .find_valid_share_link(document_id, token, Utc::now())
            .await
        {
            Ok(Some(link)) => return Ok(link.permission),
            Ok(None) => {}
            Err(err) => {
                warn!(document_id, error = %err, "share link lookup failed during access resolution");
                return Err(AccessDenied::NotFound);
            }
        }
    }

    Err(AccessDenied::NoAccess)
}
