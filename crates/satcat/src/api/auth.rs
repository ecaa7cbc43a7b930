use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;

use super::error::ApiError;
use super::AppState;

/// Maps a bearer token to the owner id that scopes sites, groups and
/// notification channels.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<String>, ApiError>;
}

/// Treats the token as an opaque owner id issued by an upstream gateway.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenIsOwner;

#[async_trait]
impl OwnerResolver for TokenIsOwner {
    async fn resolve(&self, token: &str) -> Result<Option<String>, ApiError> {
        let token = token.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }
}

/// The authenticated owner of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(query)| query.token)
    })
}

impl FromRequestParts<Arc<AppState>> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        state
            .owners
            .resolve(&token)
            .await?
            .map(Owner)
            .ok_or_else(|| ApiError::unauthorized("unknown bearer token"))
    }
}
