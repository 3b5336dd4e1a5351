//! Per-client portal switch.
//!
//! Checked after membership so callers can tell "not a member" apart from
//! "portal disabled". Applies to share-link access as well.

use super::resolver::AccessError;
use crate::services::BillingStore;
use tracing::{debug, instrument};
use uuid::Uuid;

#[instrument(skip(store))]
pub async fn enforce_portal_enabled(
    store: &dyn BillingStore,
    client_id: Uuid,
    require: bool,
) -> Result<(), AccessError> {
    if !require {
        return Ok(());
    }

    let client = store
        .get_client(client_id)
        .await?
        .ok_or(AccessError::ClientNotFound)?;

    if !client.portal_enabled() {
        debug!("Portal disabled for client");
        return Err(AccessError::PortalDisabled);
    }

    Ok(())
}
