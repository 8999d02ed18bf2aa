//! RFC 9728 protected-resource metadata document.

use {
    crate::config::AuthConfig,
    serde_json::{json, Value},
};

/// Build the document served at `/.well-known/oauth-protected-resource`.
/// `resource` is the canonical URI of the MCP endpoint;
/// `scopes_supported` is the union of every tool's `requiredScopes`.
pub fn protected_resource_metadata(
    resource: &str,
    resource_name: &str,
    auth: &AuthConfig,
    scopes_supported: &[String],
) -> Value {
    let mut document = json!({
        "resource": resource,
        "resource_name": resource_name,
        "authorization_servers": auth.authorization_servers,
        "bearer_methods_supported": ["header"],
        "scopes_supported": scopes_supported,
    });
    if let Some(jwks_uri) = &auth.jwks_uri {
        document["jwks_uri"] = json!(jwks_uri);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_shape_matches_rfc_9728() {
        let auth = AuthConfig {
            authorization_servers: vec!["https://as".to_string()],
            jwks_uri: None,
        };
        let document = protected_resource_metadata(
            "https://host/mcp",
            "demo",
            &auth,
            &["r".to_string(), "w".to_string()],
        );
        assert_eq!(document["resource"], "https://host/mcp");
        assert_eq!(document["authorization_servers"][0], "https://as");
        assert_eq!(document["bearer_methods_supported"][0], "header");
        assert_eq!(document["scopes_supported"].as_array().unwrap().len(), 2);
        assert!(document.get("jwks_uri").is_none());
    }
}
