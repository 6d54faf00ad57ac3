//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs whose `sub` is the account id. [`User`] reads the
//! `Authorization` header only. [`StreamUser`] is for the live stream
//! endpoint and also takes a `?token=` query parameter, since browsers
//! cannot set headers on a WebSocket upgrade.

use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // account id
    pub exp: usize,
}

/// Validates signature and expiry and returns the claims.
pub fn verify_jwt(secret: &str, token: &str) -> Result<Claims, AppError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "rejected token");
            AppError::Unauthorized
        })
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
}

impl User {
    pub fn from_token(secret: &str, token: &str) -> Result<Self, AppError> {
        let claims = verify_jwt(secret, token)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        Ok(User { id })
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn query_token(req: &HttpRequest) -> Option<String> {
    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
}

/// Verifies `token` against the configured secret.
fn authenticate(req: &HttpRequest, token: Option<String>) -> Result<User, AppError> {
    let Some(state) = req.app_data::<web::Data<AppState>>() else {
        tracing::error!("AppState missing from app data");
        return Err(AppError::Internal);
    };
    let token = token.ok_or(AppError::Unauthorized)?;
    User::from_token(&state.config.jwt_secret, &token)
}

/// Bearer header only.
impl FromRequest for User {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req, bearer_token(req)))
    }
}

/// Caller of the stream upgrade: Bearer header, or `?token=` when the
/// client cannot set headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamUser(pub User);

impl FromRequest for StreamUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = bearer_token(req).or_else(|| query_token(req));
        ready(authenticate(req, token).map(StreamUser))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Claims;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    /// Signs a token for `account_id` that expires in an hour.
    pub fn token_for(secret: &str, account_id: Uuid) -> String {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
        let claims = Claims {
            sub: account_id.to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("sign token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::repository::{MemoryStore, Repositories};
    use actix_web::test::TestRequest;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::sync::Arc;

    #[test]
    fn valid_token_yields_user() {
        let id = Uuid::new_v4();
        let token = testing::token_for("secret", id);
        assert_eq!(User::from_token("secret", &token), Ok(User { id }));
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = testing::token_for("secret", Uuid::new_v4());
        assert_eq!(User::from_token("other", &token), Err(AppError::Unauthorized));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            exp: (chrono::Utc::now() - chrono::Duration::hours(2)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert!(verify_jwt("secret", &token).is_err());
    }

    #[test]
    fn non_uuid_subject_is_unauthorized() {
        let claims = Claims {
            sub: "teacher-7".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert_eq!(User::from_token("secret", &token), Err(AppError::Unauthorized));
    }

    const SECRET: &str = "test-secret";

    fn with_state(req: TestRequest) -> HttpRequest {
        let repos = Repositories::from_store(Arc::new(MemoryStore::new()));
        let state = AppState::new(Arc::new(Config::test_defaults()), repos);
        req.app_data(web::Data::new(state)).to_http_request()
    }

    #[actix_web::test]
    async fn query_token_only_counts_for_stream_user() {
        let id = Uuid::new_v4();
        let token = testing::token_for(SECRET, id);
        let req = with_state(TestRequest::with_uri(&format!(
            "/api/v1/conversations?token={token}"
        )));

        assert_eq!(User::extract(&req).await, Err(AppError::Unauthorized));
        assert_eq!(StreamUser::extract(&req).await, Ok(StreamUser(User { id })));
    }

    #[actix_web::test]
    async fn header_token_works_for_both_extractors() {
        let id = Uuid::new_v4();
        let token = testing::token_for(SECRET, id);
        let req = with_state(
            TestRequest::with_uri("/api/v1/conversations")
                .insert_header((header::AUTHORIZATION, format!("Bearer {token}"))),
        );

        assert_eq!(User::extract(&req).await, Ok(User { id }));
        assert_eq!(StreamUser::extract(&req).await, Ok(StreamUser(User { id })));
    }

    #[test]
    fn token_sources() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc"));

        let req = TestRequest::with_uri("/stream?token=xyz").to_http_request();
        assert_eq!(bearer_token(&req), None);
        assert_eq!(query_token(&req).as_deref(), Some("xyz"));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);
    }
}
