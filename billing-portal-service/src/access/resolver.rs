//! Client access resolution.
//!
//! A portal request names its client either explicitly (`clientId`, which
//! needs an identity with membership or ownership) or through an invoice share
//! link (`shareId`, identity-free, read-only). The outcome is an
//! [`AccessGrant`] computed once and carried for the rest of the request.

use crate::models::{Client, PortalRole};
use crate::services::metrics::PORTAL_ACCESS_TOTAL;
use crate::services::{BillingStore, Identity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Invalid or expired share link")]
    InvalidShareLink,

    #[error("Cannot determine client")]
    CannotDetermineClient,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("No access to this client")]
    NoAccess,

    #[error("Client portal is disabled")]
    PortalDisabled,

    #[error("Client not found")]
    ClientNotFound,

    #[error("Portal admin role required")]
    AdminRequired,

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::InvalidShareLink | AccessError::ClientNotFound => {
                AppError::NotFound(anyhow::anyhow!("{}", err))
            }
            AccessError::CannotDetermineClient => AppError::BadRequest(anyhow::anyhow!("{}", err)),
            AccessError::Unauthenticated => AppError::Unauthorized(anyhow::anyhow!("{}", err)),
            AccessError::NoAccess | AccessError::PortalDisabled | AccessError::AdminRequired => {
                AppError::Forbidden(anyhow::anyhow!("{}", err))
            }
            AccessError::Store(source) => source,
        }
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Default)]
pub struct ClientSelector {
    pub client_id: Option<Uuid>,
    pub share_id: Option<String>,
}

/// Client named by a selector, before membership is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedClient {
    Explicit(Uuid),
    Shared { client_id: Uuid, invoice_id: Uuid },
}

impl ResolvedClient {
    pub fn client_id(&self) -> Uuid {
        match self {
            ResolvedClient::Explicit(client_id) => *client_id,
            ResolvedClient::Shared { client_id, .. } => *client_id,
        }
    }
}

/// Role an identity holds for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedRole {
    /// A membership row exists.
    Explicit(PortalRole),
    /// No row, but the identity created the client.
    ImplicitOwner,
    None,
}

impl ResolvedRole {
    pub fn effective_role(&self) -> Option<PortalRole> {
        match self {
            ResolvedRole::Explicit(role) => Some(*role),
            ResolvedRole::ImplicitOwner => Some(PortalRole::Admin),
            ResolvedRole::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessChannel {
    Member(ResolvedRole),
    ShareLink { invoice_id: Uuid },
}

impl AccessChannel {
    pub fn label(&self) -> &'static str {
        match self {
            AccessChannel::Member(_) => "member",
            AccessChannel::ShareLink { .. } => "share_link",
        }
    }
}

/// Authorization decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGrant {
    pub client_id: Uuid,
    pub channel: AccessChannel,
}

impl AccessGrant {
    pub fn role(&self) -> Option<PortalRole> {
        match self.channel {
            AccessChannel::Member(role) => role.effective_role(),
            AccessChannel::ShareLink { .. } => None,
        }
    }

    /// Share links never count as admin.
    pub fn require_admin(&self) -> Result<(), AccessError> {
        match self.role() {
            Some(PortalRole::Admin) => Ok(()),
            _ => Err(AccessError::AdminRequired),
        }
    }
}

/// A client visible to an identity, with the role it holds there.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleClient {
    pub id: Uuid,
    pub name: String,
    pub company_name: Option<String>,
    pub role: PortalRole,
    pub portal_enabled: bool,
}

impl AccessibleClient {
    fn new(client: &Client, role: PortalRole) -> Self {
        Self {
            id: client.client_id,
            name: client.name.clone(),
            company_name: client.company_name.clone(),
            role,
            portal_enabled: client.portal_enabled(),
        }
    }
}

/// Work out which client a request targets.
///
/// An explicit client id wins over a share id. An explicit client id without
/// an identity is rejected here since only membership can authorize it.
#[instrument(skip(store, identity, selector), fields(client_id = ?selector.client_id))]
pub async fn resolve_client(
    store: &dyn BillingStore,
    identity: Option<&Identity>,
    selector: &ClientSelector,
    now: DateTime<Utc>,
) -> Result<ResolvedClient, AccessError> {
    if let Some(client_id) = selector.client_id {
        if identity.is_none() {
            return Err(AccessError::Unauthenticated);
        }
        return Ok(ResolvedClient::Explicit(client_id));
    }

    let Some(share_id) = selector.share_id.as_deref().filter(|s| !s.is_empty()) else {
        return Err(AccessError::CannotDetermineClient);
    };

    let invoice = store
        .get_invoice_by_share_id(share_id)
        .await?
        .filter(|invoice| invoice.share_link_active(now))
        .ok_or(AccessError::InvalidShareLink)?;

    Ok(ResolvedClient::Shared {
        client_id: invoice.client_id,
        invoice_id: invoice.invoice_id,
    })
}

/// Membership row first, then ownership.
#[instrument(skip(store, identity), fields(user_id = %identity.user_id))]
pub async fn resolve_role(
    store: &dyn BillingStore,
    client_id: Uuid,
    identity: &Identity,
) -> Result<ResolvedRole, AccessError> {
    if let Some(membership) = store.get_membership(client_id, &identity.user_id).await? {
        return Ok(ResolvedRole::Explicit(membership.portal_role()));
    }

    let owns = store
        .get_client(client_id)
        .await?
        .is_some_and(|client| client.created_by == identity.user_id);

    Ok(if owns {
        ResolvedRole::ImplicitOwner
    } else {
        ResolvedRole::None
    })
}

/// Resolve the client and decide whether the caller may read it.
pub async fn authorize(
    store: &dyn BillingStore,
    identity: Option<&Identity>,
    selector: &ClientSelector,
    now: DateTime<Utc>,
) -> Result<AccessGrant, AccessError> {
    let result = authorize_inner(store, identity, selector, now).await;

    let (channel, outcome) = match &result {
        Ok(grant) => (grant.channel.label(), "granted"),
        Err(AccessError::InvalidShareLink) => ("share_link", "invalid"),
        Err(_) if selector.client_id.is_some() => ("member", "denied"),
        Err(_) => ("unknown", "denied"),
    };
    PORTAL_ACCESS_TOTAL
        .with_label_values(&[channel, outcome])
        .inc();

    result
}

async fn authorize_inner(
    store: &dyn BillingStore,
    identity: Option<&Identity>,
    selector: &ClientSelector,
    now: DateTime<Utc>,
) -> Result<AccessGrant, AccessError> {
    match resolve_client(store, identity, selector, now).await? {
        ResolvedClient::Explicit(client_id) => {
            let identity = identity.ok_or(AccessError::Unauthenticated)?;
            let role = resolve_role(store, client_id, identity).await?;
            if role == ResolvedRole::None {
                debug!(%client_id, user_id = %identity.user_id, "No portal membership");
                return Err(AccessError::NoAccess);
            }
            Ok(AccessGrant {
                client_id,
                channel: AccessChannel::Member(role),
            })
        }
        ResolvedClient::Shared {
            client_id,
            invoice_id,
        } => Ok(AccessGrant {
            client_id,
            channel: AccessChannel::ShareLink { invoice_id },
        }),
    }
}

/// Clients an identity can open in the portal, sorted by name.
///
/// Union of membership rows and created clients. Ownership wins when both
/// exist, so the creator is always admin.
#[instrument(skip(store, identity), fields(user_id = %identity.user_id))]
pub async fn list_accessible_clients(
    store: &dyn BillingStore,
    identity: &Identity,
) -> Result<Vec<AccessibleClient>, AccessError> {
    let memberships = store.list_memberships_for_user(&identity.user_id).await?;
    let member_ids: Vec<Uuid> = memberships.iter().map(|m| m.client_id).collect();
    let member_clients = store.get_clients(&member_ids).await?;
    let owned = store.list_clients_created_by(&identity.user_id).await?;

    let roles: HashMap<Uuid, PortalRole> = memberships
        .iter()
        .map(|m| (m.client_id, m.portal_role()))
        .collect();

    let mut visible: HashMap<Uuid, AccessibleClient> = HashMap::new();
    for client in &member_clients {
        if let Some(role) = roles.get(&client.client_id) {
            visible.insert(client.client_id, AccessibleClient::new(client, *role));
        }
    }
    for client in &owned {
        visible.insert(
            client.client_id,
            AccessibleClient::new(client, PortalRole::Admin),
        );
    }

    let mut clients: Vec<AccessibleClient> = visible.into_values().collect();
    clients.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    Ok(clients)
}
