//! Bearer-token middleware for the streamable HTTP transport.
//!
//! A missing or invalid token rejects with [`Unauthorized`]; the transport's
//! recover handler turns that into a 401 carrying a `WWW-Authenticate`
//! header that points at the protected-resource metadata endpoint. The
//! response body never explains why validation failed.

use {
    super::{JwksCache, TokenClaims},
    crate::{
        config::AuthConfig,
        error::{McpError, McpResult},
    },
    std::sync::Arc,
    tracing::debug,
    warp::{Filter, Rejection},
};

pub const METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

/// Rejection raised for requests that fail bearer validation.
#[derive(Debug)]
pub struct Unauthorized {
    /// Where the client can find the protected-resource metadata.
    pub resource_metadata: String,
}

impl warp::reject::Reject for Unauthorized {}

pub struct OAuthValidator {
    jwks: JwksCache,
}

impl OAuthValidator {
    pub fn new(auth: AuthConfig, client: reqwest::Client) -> Self {
        Self {
            jwks: JwksCache::new(auth, client),
        }
    }

    /// Validate the `Authorization` header value and produce claims.
    pub async fn authenticate(&self, authorization: Option<&str>) -> McpResult<TokenClaims> {
        let header = authorization
            .ok_or_else(|| McpError::Auth("missing Authorization header".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| McpError::Auth("Authorization header is not a bearer token".to_string()))?
            .trim();
        if token.is_empty() {
            return Err(McpError::Auth("empty bearer token".to_string()));
        }
        self.jwks.validate(token).await
    }
}

/// Filter extracting validated claims. With no validator configured the
/// filter passes `None` through; with one, every request must carry a valid
/// bearer token.
pub fn with_auth(
    validator: Option<Arc<OAuthValidator>>,
    scheme: &'static str,
) -> impl Filter<Extract = (Option<TokenClaims>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("host"))
        .and_then(move |authorization: Option<String>, host: Option<String>| {
            let validator = validator.clone();
            async move {
                let Some(validator) = validator else {
                    return Ok(None);
                };
                match validator.authenticate(authorization.as_deref()).await {
                    Ok(claims) => {
                        debug!(sub = %claims.sub, "bearer token validated");
                        Ok(Some(claims))
                    }
                    Err(e) => {
                        // Log the reason server-side only.
                        debug!(error = %e, "bearer validation failed");
                        let host = host.unwrap_or_else(|| "localhost".to_string());
                        Err(warp::reject::custom(Unauthorized {
                            resource_metadata: format!("{scheme}://{host}{METADATA_PATH}"),
                        }))
                    }
                }
            }
        })
}
