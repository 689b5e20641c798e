use crate::app::AppState;
use crate::error::{AppError, AppResult};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

#[derive(Clone, Debug)]
pub struct AuthState {
    master_key: Option<String>,
}

impl AuthState {
    pub fn new(master_key: Option<String>) -> Self {
        Self { master_key }
    }

    /// Checks the `Authorization: Bearer` header against the master key.
    /// Always passes when no master key is configured.
    pub fn authorize(&self, headers: &HeaderMap) -> AppResult<()> {
        let Some(expected) = self.master_key.as_deref() else {
            return Ok(());
        };
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| {
                AppError::new(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "Bearer token authentication is required",
                )
            })?;
        if token != expected {
            return Err(AppError::new(
                StatusCode::FORBIDDEN,
                "invalid_api_key",
                "invalid API key",
            ));
        }
        Ok(())
    }
}

/// Guards every `/v1/` path, including unknown ones, before routing.
pub async fn require_master_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path().starts_with("/v1/") {
        if let Err(err) = state.auth.authorize(req.headers()) {
            tracing::debug!(path = %req.uri().path(), code = %err.code, "request rejected");
            return err.into_response();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::AuthState;
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, HeaderValue, StatusCode};

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(auth) = auth {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        }
        headers
    }

    #[test]
    fn open_when_no_master_key() {
        let auth = AuthState::new(None);
        assert!(auth.authorize(&headers(None)).is_ok());
        assert!(auth.authorize(&headers(Some("Bearer anything"))).is_ok());
    }

    #[test]
    fn missing_or_malformed_header_is_unauthorized() {
        let auth = AuthState::new(Some("sk-master".to_string()));
        for value in [None, Some("sk-master"), Some("Basic sk-master")] {
            let err = auth.authorize(&headers(value)).unwrap_err();
            assert_eq!(err.status, StatusCode::UNAUTHORIZED);
            assert_eq!(err.code, "unauthorized");
        }
    }

    #[test]
    fn wrong_key_is_forbidden() {
        let auth = AuthState::new(Some("sk-master".to_string()));
        let err = auth.authorize(&headers(Some("Bearer sk-other"))).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, "invalid_api_key");
        assert!(auth.authorize(&headers(Some("Bearer sk-master"))).is_ok());
    }

    #[test]
    fn key_comparison_is_exact() {
        let auth = AuthState::new(Some("sk-master".to_string()));
        for value in ["Bearer  sk-master", "Bearer sk-master "] {
            let err = auth.authorize(&headers(Some(value))).unwrap_err();
            assert_eq!(err.status, StatusCode::FORBIDDEN, "{value:?}");
        }
    }
}
