//! Privileged-operator policy.
//!
//! Admin endpoints (usage import, line item edits, draft deletion) are open
//! only to identities whose email is on an allow-list. The list is built once
//! from configuration and handed to request handlers through app state.

use crate::config::AdminConfig;
use crate::services::Identity;

/// Allow-list of privileged operator emails.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    privileged_emails: Vec<String>,
}

impl AdminPolicy {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            privileged_emails: emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &AdminConfig) -> Self {
        Self::new(&config.privileged_emails)
    }

    pub fn privileged_emails(&self) -> &[String] {
        &self.privileged_emails
    }
}

/// Whether `identity` may use admin endpoints.
///
/// Identities without an email are never privileged.
pub fn is_privileged(identity: &Identity, policy: &AdminPolicy) -> bool {
    let Some(email) = identity.email.as_deref() else {
        return false;
    };
    let email = email.trim().to_lowercase();
    policy.privileged_emails.iter().any(|p| *p == email)
}
