//! JWKS discovery, caching, and JWT validation.
//!
//! The keyset comes from the configured `jwksUri` when present; otherwise
//! discovery probes a list of common JWKS paths on each authorization
//! server and finally falls back to the OIDC discovery document. The
//! keyset is cached for the process lifetime and refreshed once when a
//! token arrives with an unknown key id.

use {
    super::TokenClaims,
    crate::{
        config::AuthConfig,
        error::{McpError, McpResult},
    },
    jsonwebtoken::{
        decode, decode_header,
        jwk::{Jwk, JwkSet},
        DecodingKey, Validation,
    },
    serde_json::Value,
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

/// Probed relative to each authorization server before OIDC discovery.
const COMMON_JWKS_PATHS: &[&str] = &[
    "/.well-known/jwks.json",
    "/jwks",
    "/.well-known/jwks",
    "/protocol/openid-connect/certs",
];

pub struct JwksCache {
    auth: AuthConfig,
    client: reqwest::Client,
    keys: RwLock<Option<JwkSet>>,
}

impl JwksCache {
    pub fn new(auth: AuthConfig, client: reqwest::Client) -> Self {
        Self {
            auth,
            client,
            keys: RwLock::new(None),
        }
    }

    /// Validate a bearer JWT: signature against the keyset, standard time
    /// claims, and issuer membership in `authorizationServers`. Audience
    /// checking is intentionally not enforced.
    pub async fn validate(&self, token: &str) -> McpResult<TokenClaims> {
        let header = decode_header(token)
            .map_err(|e| McpError::Auth(format!("malformed token header: {e}")))?;

        let jwk = match self.find_key(header.kid.as_deref(), false).await? {
            Some(jwk) => jwk,
            // Unknown kid: the keyset may have rotated, refresh once.
            None => self
                .find_key(header.kid.as_deref(), true)
                .await?
                .ok_or_else(|| McpError::Auth("no matching key in JWKS".to_string()))?,
        };

        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| McpError::Auth(format!("unusable JWKS key: {e}")))?;
        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.validate_nbf = true;

        let data = decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| McpError::Auth(format!("token validation failed: {e}")))?;
        let claims = data.claims;

        let issuer_known = self
            .auth
            .authorization_servers
            .iter()
            .any(|server| server.trim_end_matches('/') == claims.iss.trim_end_matches('/'));
        if !issuer_known {
            warn!(issuer = %claims.iss, "token from unknown issuer rejected");
            return Err(McpError::Auth("unknown issuer".to_string()));
        }

        Ok(claims)
    }

    async fn find_key(&self, kid: Option<&str>, refresh: bool) -> McpResult<Option<Jwk>> {
        if refresh || self.keys.read().await.is_none() {
            let fetched = self.fetch_keyset().await?;
            *self.keys.write().await = Some(fetched);
        }

        let guard = self.keys.read().await;
        let keyset = guard.as_ref().expect("keyset populated above");
        Ok(match kid {
            Some(kid) => keyset.find(kid).cloned(),
            None => keyset.keys.first().cloned(),
        })
    }

    async fn fetch_keyset(&self) -> McpResult<JwkSet> {
        if let Some(uri) = &self.auth.jwks_uri {
            return self.fetch_jwks_document(uri).await;
        }

        for server in &self.auth.authorization_servers {
            let server = server.trim_end_matches('/');
            for path in COMMON_JWKS_PATHS {
                let url = format!("{server}{path}");
                if let Ok(keyset) = self.fetch_jwks_document(&url).await {
                    if !keyset.keys.is_empty() {
                        debug!(%url, "JWKS discovered");
                        return Ok(keyset);
                    }
                }
            }
            // OIDC discovery fallback
            let discovery = format!("{server}/.well-known/openid-configuration");
            if let Ok(uri) = self.discover_jwks_uri(&discovery).await {
                if let Ok(keyset) = self.fetch_jwks_document(&uri).await {
                    if !keyset.keys.is_empty() {
                        debug!(%uri, "JWKS discovered via OIDC metadata");
                        return Ok(keyset);
                    }
                }
            }
        }

        Err(McpError::Auth(
            "unable to locate a JWKS for any configured authorization server".to_string(),
        ))
    }

    async fn fetch_jwks_document(&self, url: &str) -> McpResult<JwkSet> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| McpError::Auth(format!("JWKS fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McpError::Auth(format!(
                "JWKS fetch from {url} returned {}",
                response.status()
            )));
        }
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| McpError::Auth(format!("JWKS decode failed: {e}")))
    }

    async fn discover_jwks_uri(&self, discovery_url: &str) -> McpResult<String> {
        let document: Value = self
            .client
            .get(discovery_url)
            .send()
            .await
            .map_err(|e| McpError::Auth(format!("OIDC discovery failed: {e}")))?
            .json()
            .await
            .map_err(|e| McpError::Auth(format!("OIDC discovery decode failed: {e}")))?;
        document
            .get("jwks_uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| McpError::Auth("OIDC metadata carries no jwks_uri".to_string()))
    }
}
