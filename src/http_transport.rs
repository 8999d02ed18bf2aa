//! Streamable HTTP transport.
//!
//! One warp server hosts the MCP endpoint at the configured base path, the
//! protected-resource metadata endpoint, and the health probes. The MCP
//! route runs behind the OAuth middleware when auth is configured. Requests
//! are answered as `application/json`; stateful mode issues an
//! `Mcp-Session-Id` header at initialize.

use {
    crate::{
        auth::{protected_resource_metadata, with_auth, OAuthValidator, TokenClaims, Unauthorized},
        config::{AuthConfig, McpServerDefinition},
        context::{CancellationToken, RequestContext},
        engine::ProtocolEngine,
        error::{McpError, McpResult},
        health::HealthChecker,
        logging::{fmt_server_ready, fmt_server_shutdown, fmt_server_startup},
    },
    rand::{distributions::Alphanumeric, Rng},
    serde_json::{json, Value},
    std::collections::BTreeMap,
    std::convert::Infallible,
    std::net::SocketAddr,
    std::sync::Arc,
    tracing::{debug, info, warn},
    warp::{
        filters::BoxedFilter,
        http::{HeaderValue, StatusCode},
        reply::{self, Response},
        Filter, Rejection, Reply,
    },
};

/// Largest accepted request body; oversized requests get a JSON-RPC error.
const MAX_MESSAGE_BYTES: u64 = 2 * 1024 * 1024;

struct HttpState {
    engine: Arc<ProtocolEngine>,
    health: Arc<HealthChecker>,
    server_name: String,
    server_version: String,
    base_path: String,
    stateless: bool,
    scheme: &'static str,
    auth: Option<AuthConfig>,
    scopes_supported: Vec<String>,
    shutdown: CancellationToken,
}

/// Serve MCP over streamable HTTP until the shutdown token fires.
pub async fn serve_http(
    definition: &McpServerDefinition,
    engine: Arc<ProtocolEngine>,
    health: Arc<HealthChecker>,
    validator: Option<Arc<OAuthValidator>>,
    shutdown: CancellationToken,
) -> McpResult<()> {
    let http_config = definition
        .runtime
        .streamable_http_config
        .as_ref()
        .ok_or_else(|| {
            McpError::Validation(
                "streamablehttp transport requires a streamableHttpConfig".to_string(),
            )
        })?;

    let scheme: &'static str = if http_config.tls.is_some() { "https" } else { "http" };
    let state = Arc::new(HttpState {
        engine,
        health: Arc::clone(&health),
        server_name: definition.name.clone(),
        server_version: definition.version.clone(),
        base_path: http_config.base_path().to_string(),
        stateless: http_config.stateless(),
        scheme,
        auth: http_config.auth.clone(),
        scopes_supported: definition.scopes_supported(),
        shutdown: shutdown.clone(),
    });

    let mcp_path = path_filter(http_config.base_path());

    let post_route = mcp_path
        .clone()
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_MESSAGE_BYTES))
        .and(warp::body::json())
        .and(with_auth(validator, scheme))
        .and(warp::header::headers_cloned())
        .and(warp::header::optional::<String>("mcp-session-id"))
        .and(with_state(Arc::clone(&state)))
        .and_then(handle_post);

    let options_route = mcp_path
        .clone()
        .and(warp::options())
        .and(with_state(Arc::clone(&state)))
        .and_then(handle_options);

    let get_route = mcp_path
        .clone()
        .and(warp::get())
        .and(warp::header::optional::<String>("accept"))
        .and(with_state(Arc::clone(&state)))
        .and_then(handle_get);

    let delete_route = mcp_path
        .and(warp::delete())
        .and(warp::header::optional::<String>("mcp-session-id"))
        .and(with_state(Arc::clone(&state)))
        .and_then(handle_delete);

    let mut routes: BoxedFilter<(Response,)> = post_route
        .or(options_route)
        .unify()
        .or(get_route)
        .unify()
        .or(delete_route)
        .unify()
        .boxed();

    if state.auth.is_some() {
        let metadata_get = warp::path!(".well-known" / "oauth-protected-resource")
            .and(warp::get())
            .and(warp::header::optional::<String>("host"))
            .and(with_state(Arc::clone(&state)))
            .and_then(handle_metadata);
        let metadata_options = warp::path!(".well-known" / "oauth-protected-resource")
            .and(warp::options())
            .and(with_state(Arc::clone(&state)))
            .and_then(handle_options);
        routes = routes
            .or(metadata_get)
            .unify()
            .or(metadata_options)
            .unify()
            .boxed();
    }

    if http_config.health_enabled() {
        let liveness = path_filter(http_config.liveness_path())
            .and(warp::get())
            .and(with_state(Arc::clone(&state)))
            .and_then(handle_liveness);
        let readiness = path_filter(http_config.readiness_path())
            .and(warp::get())
            .and(with_state(Arc::clone(&state)))
            .and_then(handle_readiness);
        routes = routes.or(liveness).unify().or(readiness).unify().boxed();
    }

    let routes = routes.recover(handle_rejection);

    let addr: SocketAddr = ([0, 0, 0, 0], http_config.port()).into();
    info!("{}", fmt_server_startup(http_config.port()));

    let signal = {
        let token = shutdown.clone();
        async move { token.cancelled().await }
    };

    match &http_config.tls {
        None => {
            let (bound, server) = warp::serve(routes)
                .try_bind_with_graceful_shutdown(addr, signal)
                .map_err(|e| McpError::Internal(format!("could not bind to {addr}: {e}")))?;
            info!("{}", fmt_server_ready(&bound.to_string()));
            health.mark_ready();
            server.await;
        }
        Some(tls) => {
            // The TLS server panics on bind failure, so probe the socket
            // first to honor the exit-code contract.
            std::net::TcpListener::bind(addr)
                .map_err(|e| McpError::Internal(format!("could not bind to {addr}: {e}")))?;
            let (bound, server) = warp::serve(routes)
                .tls()
                .cert_path(&tls.cert_file)
                .key_path(&tls.key_file)
                .bind_with_graceful_shutdown(addr, signal);
            info!("{}", fmt_server_ready(&bound.to_string()));
            health.mark_ready();
            server.await;
        }
    }

    info!("{}", fmt_server_shutdown());
    Ok(())
}

/// Match an exact slash-separated path such as `/mcp` or `/v1/mcp`.
fn path_filter(path: &str) -> BoxedFilter<()> {
    let mut filter = warp::any().boxed();
    for segment in path.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
        filter = filter.and(warp::path(segment.to_string())).boxed();
    }
    filter.and(warp::path::end()).boxed()
}

fn with_state(
    state: Arc<HttpState>,
) -> impl Filter<Extract = (Arc<HttpState>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&state))
}

async fn handle_post(
    message: Value,
    claims: Option<TokenClaims>,
    headers: warp::http::HeaderMap,
    session: Option<String>,
    state: Arc<HttpState>,
) -> Result<Response, Rejection> {
    let header_map: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect();
    let ctx = RequestContext::new()
        .with_claims(claims)
        .with_headers(header_map)
        .with_cancel(state.shutdown.clone());

    let method = message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    debug!(request_id = %ctx.logger.request_id(), method = %method, "MCP HTTP request received");

    // Stateful mode issues a session id at initialize and keys protocol
    // state by it afterwards.
    let (session_key, issued_session) = if state.stateless {
        (None, None)
    } else {
        match session {
            Some(session) => (Some(session), None),
            None if method == "initialize" => {
                let session = generate_session_id();
                (Some(session.clone()), Some(session))
            }
            None => (None, None),
        }
    };

    let response = state
        .engine
        .handle_message(message, &ctx, session_key.as_deref())
        .await;

    let mut reply = match response {
        Some(body) => reply::with_status(reply::json(&body), StatusCode::OK).into_response(),
        // Notifications produce no body.
        None => reply::with_status(warp::reply(), StatusCode::ACCEPTED).into_response(),
    };
    if let Some(session_id) = issued_session {
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            reply.headers_mut().insert("mcp-session-id", value);
        }
    }
    apply_cors(&mut reply);
    Ok(reply)
}

async fn handle_options(state: Arc<HttpState>) -> Result<Response, Rejection> {
    let info = transport_info(&state);
    let mut response = reply::with_status(reply::json(&info), StatusCode::OK).into_response();
    apply_cors(&mut response);
    Ok(response)
}

async fn handle_get(
    accept: Option<String>,
    state: Arc<HttpState>,
) -> Result<Response, Rejection> {
    if accept
        .as_deref()
        .is_some_and(|accept| accept.contains("text/event-stream"))
    {
        warn!("client requested SSE streaming, pointing it at HTTP POST");
        let error_response = json!({
            "error": {
                "code": -32600,
                "message": "Server-Sent Events streaming is not available",
                "data": {
                    "supported_transports": ["http_post"],
                    "instructions": "Send JSON-RPC messages via HTTP POST",
                }
            }
        });
        let mut response =
            reply::with_status(reply::json(&error_response), StatusCode::OK).into_response();
        apply_cors(&mut response);
        return Ok(response);
    }

    let info = transport_info(&state);
    let mut response = reply::with_status(reply::json(&info), StatusCode::OK).into_response();
    apply_cors(&mut response);
    Ok(response)
}

/// Streamable HTTP clients may terminate their session explicitly.
async fn handle_delete(
    session: Option<String>,
    state: Arc<HttpState>,
) -> Result<Response, Rejection> {
    if let Some(session) = session {
        state.engine.end_session(&session);
    }
    let mut response =
        reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response();
    apply_cors(&mut response);
    Ok(response)
}

async fn handle_metadata(
    host: Option<String>,
    state: Arc<HttpState>,
) -> Result<Response, Rejection> {
    let auth = state.auth.as_ref().expect("metadata route requires auth");
    let host = host.unwrap_or_else(|| "localhost".to_string());
    let resource = format!("{}://{host}{}", state.scheme, state.base_path);
    let document = protected_resource_metadata(
        &resource,
        &state.server_name,
        auth,
        &state.scopes_supported,
    );
    let mut response = reply::with_status(reply::json(&document), StatusCode::OK).into_response();
    apply_cors(&mut response);
    Ok(response)
}

async fn handle_liveness(state: Arc<HttpState>) -> Result<Response, Rejection> {
    let (status, body) = state.health.liveness();
    Ok(reply::with_status(
        body,
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
    )
    .into_response())
}

async fn handle_readiness(state: Arc<HttpState>) -> Result<Response, Rejection> {
    let (status, body) = state.health.readiness();
    Ok(reply::with_status(
        body,
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
    )
    .into_response())
}

fn transport_info(state: &HttpState) -> Value {
    json!({
        "transport": {
            "protocol": "streamablehttp",
            "endpoint": state.base_path,
            "methods": ["POST"],
            "stateless": state.stateless,
        },
        "server": {
            "name": state.server_name,
            "version": state.server_version,
        }
    })
}

fn apply_cors(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type, authorization, mcp-session-id"),
    );
}

fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Map middleware rejections to wire responses. Auth failures answer 401
/// with a `WWW-Authenticate` challenge naming the metadata endpoint and a
/// bare `invalid_request` body, never the validation detail.
async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    if let Some(unauthorized) = rejection.find::<Unauthorized>() {
        let challenge = format!(
            "Bearer resource_metadata=\"{}\"",
            unauthorized.resource_metadata
        );
        let body = json!({
            "error": "invalid_request",
            "error_description": "authentication required",
        });
        let mut response =
            reply::with_status(reply::json(&body), StatusCode::UNAUTHORIZED).into_response();
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.headers_mut().insert("www-authenticate", value);
        }
        return Ok(response);
    }

    if rejection
        .find::<warp::reject::PayloadTooLarge>()
        .is_some()
    {
        let error =
            McpError::MessageTooLarge(MAX_MESSAGE_BYTES as usize + 1, MAX_MESSAGE_BYTES as usize);
        let body = error.to_json_rpc_error(None);
        return Ok(
            reply::with_status(reply::json(&body), StatusCode::PAYLOAD_TOO_LARGE).into_response(),
        );
    }

    if let Some(deserialize) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        debug!(error = %deserialize, "request body failed to parse");
        let body = McpError::InvalidParams("request body is not valid JSON".to_string())
            .to_json_rpc_error(None);
        return Ok(reply::with_status(reply::json(&body), StatusCode::BAD_REQUEST).into_response());
    }

    if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        let body = json!({ "error": "method not allowed" });
        return Ok(
            reply::with_status(reply::json(&body), StatusCode::METHOD_NOT_ALLOWED).into_response(),
        );
    }

    if rejection.is_not_found() {
        let body = json!({ "error": "not found" });
        return Ok(reply::with_status(reply::json(&body), StatusCode::NOT_FOUND).into_response());
    }

    warn!(?rejection, "unhandled rejection");
    let body = json!({ "error": "internal error" });
    Ok(reply::with_status(reply::json(&body), StatusCode::INTERNAL_SERVER_ERROR).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn path_filter_matches_exact_segments() {
        let filter = path_filter("/mcp").map(|| "hit");
        let hit = warp::test::request().path("/mcp").filter(&filter).await;
        assert!(hit.is_ok());
        let miss = warp::test::request().path("/mcp/extra").filter(&filter).await;
        assert!(miss.is_err());
        let miss = warp::test::request().path("/other").filter(&filter).await;
        assert!(miss.is_err());
    }

    #[tokio::test]
    async fn path_filter_supports_multi_segment_base_paths() {
        let filter = path_filter("/api/v2/mcp").map(|| "hit");
        let hit = warp::test::request().path("/api/v2/mcp").filter(&filter).await;
        assert!(hit.is_ok());
        let miss = warp::test::request().path("/api/v2").filter(&filter).await;
        assert!(miss.is_err());
    }

    #[tokio::test]
    async fn unauthorized_rejection_answers_401_with_challenge() {
        let rejection = warp::reject::custom(Unauthorized {
            resource_metadata: "https://host/.well-known/oauth-protected-resource".to_string(),
        });
        let response = handle_rejection(rejection).await.expect("recovers");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get("www-authenticate")
            .expect("challenge header")
            .to_str()
            .unwrap();
        assert!(challenge.starts_with("Bearer resource_metadata="));
        assert!(challenge.contains("oauth-protected-resource"));
    }

    #[test]
    fn session_ids_are_long_and_alphanumeric() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_session_id());
    }
}
