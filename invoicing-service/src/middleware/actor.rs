//! Actor context extractor.
//!
//! The `x-actor-id` header carries the identity decided by the external
//! authorization collaborator; this engine records it on mutations but
//! never evaluates roles or permissions itself.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use service_core::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Acting user, extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct ActorContext {
    pub actor_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::ValidationError(anyhow::anyhow!(
                    "Missing {} header (set by the authorization layer)",
                    ACTOR_ID_HEADER
                ))
            })?;

        let actor_id = Uuid::parse_str(raw).map_err(|_| {
            AppError::ValidationError(anyhow::anyhow!(
                "{} header is not a well-formed identifier",
                ACTOR_ID_HEADER
            ))
        })?;

        let span = tracing::Span::current();
        span.record("actor_id", raw);

        Ok(ActorContext { actor_id })
    }
}
