//! Bearer token to identity resolution.
//!
//! Tokens are issued by auth-service; this service only verifies them.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::fs;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

/// Claims carried by auth-service access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` means the credential is not valid; `Err` is an upstream failure.
    async fn resolve(&self, bearer: &str) -> Result<Option<Identity>, AppError>;
}

/// Verifies auth-service JWTs locally.
#[derive(Clone)]
pub struct JwtIdentityResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn new(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;

        Self {
            decoding_key,
            validation,
        }
    }

    /// Load the auth-service RS256 public key.
    pub fn from_public_key_file(path: &str) -> Result<Self, AppError> {
        let public_key_pem = fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                path,
                e
            ))
        })?;

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to parse public key: {}", e)))?;

        tracing::info!("JWT identity resolver initialized with RS256 public key");
        Ok(Self::new(decoding_key, Algorithm::RS256))
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, bearer: &str) -> Result<Option<Identity>, AppError> {
        match decode::<AccessTokenClaims>(bearer, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(Some(Identity {
                user_id: data.claims.sub,
                email: data.claims.email,
            })),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected bearer token");
                Ok(None)
            }
        }
    }
}
