//! Principal extraction. The Non-goals name authentication middleware
//! as out of scope — "assumed to yield a verified principal" — so this
//! crate never validates credentials itself. Instead it trusts three
//! headers an upstream authenticating proxy is assumed to set on every
//! request it forwards, attaching the resulting `Principal` to the request
//! the same way a gateway middleware would attach a validated session.
//!
//! `FromRequestParts` makes this a plain handler argument — `Principal` —
//! rather than a global middleware layer, since a handful of routes (audio
//! retrieval, conversation CRUD) need it and the rest (health, duplex
//! upgrade) don't.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as ResponseJson, Response};
use uuid::Uuid;

use crate::models::ErrorResponse;

const USER_ID_HEADER: &str = "x-chronicle-user-id";
const EMAIL_HEADER: &str = "x-chronicle-user-email";
const SUPERUSER_HEADER: &str = "x-chronicle-superuser";

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub is_superuser: bool,
}

impl Principal {
    /// §7 access control: non-admin principals may act only on their own
    /// resources.
    pub fn may_access(&self, owner_id: Uuid) -> bool {
        self.is_superuser || self.user_id == owner_id
    }
}

pub struct MissingPrincipal(String);

impl IntoResponse for MissingPrincipal {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            ResponseJson(ErrorResponse::new(self.0, "authentication_error")),
        )
            .into_response()
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = MissingPrincipal;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| MissingPrincipal(format!("missing {USER_ID_HEADER} header")))?
            .parse::<Uuid>()
            .map_err(|_| MissingPrincipal(format!("malformed {USER_ID_HEADER} header")))?;
        let email = header(EMAIL_HEADER).ok_or_else(|| MissingPrincipal(format!("missing {EMAIL_HEADER} header")))?;
        let is_superuser = header(SUPERUSER_HEADER).as_deref() == Some("true");

        Ok(Principal {
            user_id,
            email,
            is_superuser,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<axum::body::Body>) -> Result<Principal, MissingPrincipal> {
        let (mut parts, _) = req.into_parts();
        Principal::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_user_id_and_email() {
        let user_id = Uuid::new_v4();
        let req = Request::builder()
            .header(USER_ID_HEADER, user_id.to_string())
            .header(EMAIL_HEADER, "alice@example.com")
            .body(axum::body::Body::empty())
            .unwrap();
        let principal = extract(req).await.unwrap();
        assert_eq!(principal.user_id, user_id);
        assert_eq!(principal.email, "alice@example.com");
        assert!(!principal.is_superuser);
    }

    #[tokio::test]
    async fn rejects_missing_user_id() {
        let req = Request::builder().body(axum::body::Body::empty()).unwrap();
        assert!(extract(req).await.is_err());
    }

    #[tokio::test]
    async fn superuser_may_access_any_owner() {
        let principal = Principal {
            user_id: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
            is_superuser: true,
        };
        assert!(principal.may_access(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn non_admin_may_access_only_own_resources() {
        let user_id = Uuid::new_v4();
        let principal = Principal {
            user_id,
            email: "bob@example.com".to_string(),
            is_superuser: false,
        };
        assert!(principal.may_access(user_id));
        assert!(!principal.may_access(Uuid::new_v4()));
    }
}
