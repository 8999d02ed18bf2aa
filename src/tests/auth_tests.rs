//! Bearer-extraction tests for the OAuth middleware. Header-shape failures
//! never reach the JWKS, so these run without any network.

use {
    crate::{
        auth::OAuthValidator,
        config::AuthConfig,
        error::McpError,
        invocation::build_http_client,
    },
};

fn validator() -> OAuthValidator {
    OAuthValidator::new(
        AuthConfig {
            authorization_servers: vec!["https://as.example".to_string()],
            jwks_uri: None,
        },
        build_http_client(None).expect("client builds"),
    )
}

#[tokio::test]
async fn missing_authorization_header_is_rejected() {
    let err = validator()
        .authenticate(None)
        .await
        .expect_err("no header");
    assert!(matches!(err, McpError::Auth(_)));
    assert!(err.to_string().contains("missing Authorization"));
}

#[tokio::test]
async fn non_bearer_schemes_are_rejected() {
    let err = validator()
        .authenticate(Some("Basic dXNlcjpwYXNz"))
        .await
        .expect_err("basic auth is not a bearer token");
    assert!(matches!(err, McpError::Auth(_)));
}

#[tokio::test]
async fn empty_bearer_token_is_rejected() {
    let err = validator()
        .authenticate(Some("Bearer "))
        .await
        .expect_err("empty token");
    assert!(err.to_string().contains("empty bearer token"));
}

#[tokio::test]
async fn garbage_token_fails_before_any_network_call() {
    // A token that is not even three dot-separated segments fails header
    // decoding immediately.
    let err = validator()
        .authenticate(Some("Bearer not-a-jwt"))
        .await
        .expect_err("malformed token");
    assert!(matches!(err, McpError::Auth(_)));
    assert!(err.to_string().contains("malformed token header"));
}
