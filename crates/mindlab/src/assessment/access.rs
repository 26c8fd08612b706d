use std::collections::HashSet;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::domain::UserId;
use super::router::ApiError;

/// Header carrying the caller id set by the upstream identity verifier.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, extracted from [`USER_ID_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| CallerIdentity(UserId(value.to_string())))
            .ok_or(ApiError::Unauthorized)
    }
}

/// User ids trusted with admin-scoped operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowlist {
    ids: HashSet<String>,
}

impl AdminAllowlist {
    pub fn new<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(Into::into)
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    /// Comma-separated list, blanks ignored.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.ids.contains(&user.0)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
