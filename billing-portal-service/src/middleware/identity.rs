//! Caller identity extractors.
//!
//! The `Authorization: Bearer` token is verified by the configured
//! [`IdentityResolver`](crate::services::IdentityResolver). Client-supplied
//! user ids are never trusted.

use crate::access::is_privileged;
use crate::services::Identity;
use crate::startup::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};
use service_core::error::AppError;

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<Identity>, AppError> {
    let Some(token) = bearer_token(parts) else {
        return Ok(None);
    };
    let identity = state.identity.resolve(token).await?;
    if let Some(ref identity) = identity {
        tracing::Span::current().record("user_id", identity.user_id.as_str());
    }
    Ok(identity)
}

/// Identity when a valid bearer token is present. Share-link reads use this.
#[derive(Debug, Clone)]
pub struct OptionalIdentity(pub Option<Identity>);

#[async_trait]
impl FromRequestParts<AppState> for OptionalIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(OptionalIdentity(resolve(parts, state).await?))
    }
}

/// A verified caller.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if bearer_token(parts).is_none() {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Missing bearer token"
            )));
        }
        resolve(parts, state)
            .await?
            .map(CurrentIdentity)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token")))
    }
}

/// A verified caller on the operator allow-list.
#[derive(Debug, Clone)]
pub struct PrivilegedIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for PrivilegedIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentIdentity(identity) = CurrentIdentity::from_request_parts(parts, state).await?;

        if !is_privileged(&identity, &state.policy) {
            tracing::warn!(user_id = %identity.user_id, "Admin endpoint denied");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Privileged access required"
            )));
        }

        Ok(PrivilegedIdentity(identity))
    }
}
