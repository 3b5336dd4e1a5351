//! Configuration module for billing-portal-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub payments: PaymentsConfig,
    pub admin: AdminConfig,
    pub portal: PortalSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// PEM file holding auth-service's RS256 public key.
    pub jwt_public_key_path: String,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub api_base_url: String,
    pub api_key: Secret<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    pub privileged_emails: Vec<String>,
}

/// Share link lifetime used when `SHARE_LINK_TTL_DAYS` is unset or invalid.
pub const DEFAULT_SHARE_LINK_TTL_DAYS: i64 = 14;
pub const MAX_SHARE_LINK_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub share_link_ttl_days: i64,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            share_link_ttl_days: DEFAULT_SHARE_LINK_TTL_DAYS,
        }
    }
}

/// Days in `1..=365`, falling back to the default otherwise.
fn share_link_ttl_days(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse().ok())
        .filter(|days| (1..=MAX_SHARE_LINK_TTL_DAYS).contains(days))
        .unwrap_or(DEFAULT_SHARE_LINK_TTL_DAYS)
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl PortalConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "billing-portal-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            auth: AuthConfig {
                jwt_public_key_path: env::var("JWT_PUBLIC_KEY_PATH")
                    .unwrap_or_else(|_| "keys/public.pem".to_string()),
            },
            payments: PaymentsConfig {
                api_base_url: env::var("PAYMENTS_API_BASE_URL").unwrap_or_default(),
                api_key: Secret::new(env::var("PAYMENTS_API_KEY").unwrap_or_default()),
            },
            admin: AdminConfig {
                privileged_emails: env::var("PRIVILEGED_EMAILS")
                    .map(|raw| parse_list(&raw))
                    .unwrap_or_default(),
            },
            portal: PortalSettings {
                share_link_ttl_days: share_link_ttl_days(
                    env::var("SHARE_LINK_TTL_DAYS").ok().as_deref(),
                ),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_email_list_ignores_blanks() {
        assert_eq!(
            parse_list(" ops@example.com, ,Finance@Example.com,"),
            vec!["ops@example.com", "Finance@Example.com"]
        );
    }

    #[test]
    fn share_link_ttl_is_bounded() {
        assert_eq!(share_link_ttl_days(None), 14);
        assert_eq!(share_link_ttl_days(Some("30")), 30);
        assert_eq!(share_link_ttl_days(Some("365")), 365);
        assert_eq!(share_link_ttl_days(Some("366")), 14);
        assert_eq!(share_link_ttl_days(Some("0")), 14);
        assert_eq!(share_link_ttl_days(Some("-3")), 14);
        assert_eq!(share_link_ttl_days(Some("9223372036854775807")), 14);
        assert_eq!(share_link_ttl_days(Some("two weeks")), 14);
    }
}
