//! Portal authorization: who may see which client's billing data.

pub mod gate;
pub mod policy;
pub mod resolver;

pub use gate::enforce_portal_enabled;
pub use policy::{is_privileged, AdminPolicy};
pub use resolver::{
    authorize, list_accessible_clients, resolve_client, resolve_role, AccessChannel,
    AccessError, AccessGrant, AccessibleClient, ClientSelector, ResolvedClient, ResolvedRole,
};
