//! OAuth 2.1 resource-server support: bearer-token validation against a
//! JWKS, token claims, and the RFC 9728 protected-resource metadata
//! document. Applied to the HTTP transport only, and only when the runtime
//! declares an `auth` block.

mod jwks;
mod metadata;
mod middleware;

pub use jwks::JwksCache;
pub use metadata::protected_resource_metadata;
pub use middleware::{with_auth, OAuthValidator, Unauthorized, METADATA_PATH};

use {
    serde::{Deserialize, Deserializer, Serialize},
    serde_json::Value,
    std::collections::BTreeSet,
};

/// Claims extracted from a validated bearer JWT and attached to the request
/// context for the lifetime of the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub iss: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub aud: Vec<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    /// Space-separated scope string per RFC 6749.
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl TokenClaims {
    /// The scope claim as a set: `"read write"` and `"write read"` are the
    /// same caller.
    pub fn scope_set(&self) -> BTreeSet<String> {
        self.scope
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    pub fn has_scopes(&self, required: &[String]) -> bool {
        let scopes = self.scope_set();
        required.iter().all(|scope| scopes.contains(scope))
    }

    /// Scopes in `required` the caller lacks, for server-side audit logs.
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        let scopes = self.scope_set();
        required
            .iter()
            .filter(|scope| !scopes.contains(*scope))
            .cloned()
            .collect()
    }
}

/// `aud` may be a single string or a list of strings.
fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(aud) => Ok(vec![aud]),
        Value::Array(list) => Ok(list
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect()),
        Value::Null => Ok(Vec::new()),
        _ => Err(serde::de::Error::custom("aud must be a string or a list")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_order_does_not_matter() {
        let a = TokenClaims {
            scope: "read write".to_string(),
            ..Default::default()
        };
        let b = TokenClaims {
            scope: "write read".to_string(),
            ..Default::default()
        };
        assert_eq!(a.scope_set(), b.scope_set());
    }

    #[test]
    fn missing_scopes_reports_the_gap() {
        let claims = TokenClaims {
            scope: "r".to_string(),
            ..Default::default()
        };
        assert!(claims.has_scopes(&["r".to_string()]));
        assert!(!claims.has_scopes(&["r".to_string(), "w".to_string()]));
        assert_eq!(
            claims.missing_scopes(&["r".to_string(), "w".to_string()]),
            vec!["w".to_string()]
        );
    }

    #[test]
    fn aud_accepts_both_wire_shapes() {
        let single: TokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "u1", "aud": "https://rs"
        }))
        .unwrap();
        assert_eq!(single.aud, vec!["https://rs"]);

        let list: TokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "u1", "aud": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(list.aud, vec!["a", "b"]);
    }
}
