//! Request extractors

use super::error::ApiError;
use super::AppState;
use crate::auth::Identity;
use crate::error::ChatError;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

/// The caller, authenticated from `Authorization: Bearer <token>`
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Identity);

impl AuthUser {
    /// Id of the authenticated caller
    pub fn user_id(&self) -> i64 {
        self.0.user_id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<Self>() {
            return Ok(*user);
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ChatError::Authentication("missing Authorization header".into()))?;
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ChatError::Authentication("Authorization header must be a Bearer token".into())
            })?;

        let user = Self(state.verifier.verify(token)?);
        parts.extensions.insert(user);
        Ok(user)
    }
}
