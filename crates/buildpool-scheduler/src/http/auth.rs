//! Bearer token extraction.

use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};

use crate::error::SchedulerError;

/// The token from an `Authorization: Bearer` header.
pub struct Bearer(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
{
    type Rejection = SchedulerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| Bearer(token.trim().to_string()))
            .ok_or(SchedulerError::UnknownCapability)
    }
}
