//! Authentication middleware for JWT token validation

use axum::{
    extract::State,
    http::{HeaderMap, Request, Uri},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

use crate::{error::ApiError, state::AppState};

/// Query parameter carrying the token for WebSocket upgrades, which cannot
/// set headers from a browser
const TOKEN_QUERY_PARAM: &str = "access_token";

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Public key for verifying tokens
    pub public_key: String,
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    pub fn from_env() -> Result<Self, String> {
        let public_key = env::var("JWT_PUBLIC_KEY")
            .map_err(|_| "JWT_PUBLIC_KEY environment variable not set".to_string())?;

        // A value that is not a PEM block is a path to one
        let public_key = if public_key.starts_with("-----BEGIN") {
            public_key
        } else {
            std::fs::read_to_string(&public_key)
                .map_err(|e| format!("Failed to read public key file: {}", e))?
                .trim()
                .to_string()
        };

        Ok(JwtConfig { public_key })
    }

    pub fn decoding_key(&self) -> Result<DecodingKey, String> {
        DecodingKey::from_rsa_pem(self.public_key.as_bytes())
            .map_err(|e| format!("Failed to create decoding key: {}", e))
    }
}

/// Bearer token from the `Authorization` header, falling back to the
/// `access_token` query parameter
pub fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }

    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(req.headers(), req.uri()).ok_or(ApiError::Unauthorized)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = true;

    // Validate the token
    let token_data = jsonwebtoken::decode::<Claims>(&token, &state.decoding_key, &validation)
        .map_err(|e| {
            debug!("Rejected token: {}", e);
            ApiError::Unauthorized
        })?;

    if token_data.claims.sub.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    // Insert the user into the request extensions
    req.extensions_mut().insert(AuthUser {
        id: token_data.claims.sub,
    });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn test_token_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        let uri: Uri = "/sessions/1".parse().unwrap();

        assert_eq!(extract_token(&headers, &uri).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_token_from_query() {
        let headers = HeaderMap::new();
        let uri: Uri = "/sessions/1/ws?foo=1&access_token=tok".parse().unwrap();
        assert_eq!(extract_token(&headers, &uri).as_deref(), Some("tok"));

        let empty: Uri = "/sessions/1/ws?access_token=".parse().unwrap();
        assert_eq!(extract_token(&headers, &empty), None);
    }

    #[test]
    fn test_missing_or_malformed_token() {
        let mut headers = HeaderMap::new();
        let uri: Uri = "/sessions/1".parse().unwrap();
        assert_eq!(extract_token(&headers, &uri), None);

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(extract_token(&headers, &uri), None);
    }
}
