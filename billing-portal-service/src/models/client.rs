//! Client, project, billing period and portal membership models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role a member holds in a client's portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalRole {
    Viewer,
    Admin,
}

impl PortalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortalRole::Viewer => "viewer",
            PortalRole::Admin => "admin",
        }
    }

    /// Unknown role strings degrade to the least privileged role.
    pub fn from_string(s: &str) -> Self {
        match s {
            "admin" => PortalRole::Admin,
            _ => PortalRole::Viewer,
        }
    }
}

/// Client account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub name: String,
    pub company_name: Option<String>,
    pub created_by: String,
    pub client_portal_enabled: Option<bool>,
    pub created_utc: DateTime<Utc>,
}

impl Client {
    /// Only an explicit `false` disables the portal.
    pub fn portal_enabled(&self) -> bool {
        self.client_portal_enabled != Some(false)
    }
}

/// Explicit portal membership row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientPortalMembership {
    pub client_id: Uuid,
    pub user_id: String,
    pub role: String,
    pub created_utc: DateTime<Utc>,
}

impl ClientPortalMembership {
    pub fn portal_role(&self) -> PortalRole {
        PortalRole::from_string(&self.role)
    }
}

/// Project owned by a client. Usage is imported per project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub project_id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

/// Caller-defined interval a usage import is attached to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingPeriod {
    pub billing_period_id: Uuid,
    pub client_id: Uuid,
    pub label: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub created_utc: DateTime<Utc>,
}
