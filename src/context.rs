//! Per-request context threaded through every handler.
//!
//! Carries the authenticated token claims, the inbound HTTP headers (for
//! `{headers.*}` template sources), the request-scoped logger, and the
//! cancellation token that aborts in-flight invocations on shutdown.

use {
    crate::{auth::TokenClaims, logging::RequestLogger},
    std::collections::{BTreeMap, BTreeSet},
    std::sync::Arc,
    tokio::sync::watch,
};

/// Cooperative cancellation handle cloned into every in-flight invocation.
///
/// Backed by a `watch` channel so `cancelled()` is race-free: a token
/// cancelled before the await still wakes immediately.
#[derive(Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for returns immediately when the value is already true
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Context provided to capability handlers and invokers for one request.
#[derive(Clone)]
pub struct RequestContext {
    /// Validated bearer-token claims, when OAuth is configured
    pub claims: Option<TokenClaims>,
    /// Inbound HTTP headers, lower-cased names (empty for stdio)
    pub headers: BTreeMap<String, String>,
    /// Cancellation token derived from the transport's shutdown signal
    pub cancel: CancellationToken,
    /// Request-scoped logger
    pub logger: RequestLogger,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            claims: None,
            headers: BTreeMap::new(),
            cancel: CancellationToken::new(),
            logger: RequestLogger::new(),
        }
    }

    pub fn with_claims(mut self, claims: Option<TokenClaims>) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_logger(mut self, logger: RequestLogger) -> Self {
        self.logger = logger;
        self
    }

    /// The caller's scope set; empty when unauthenticated.
    pub fn scope_set(&self) -> BTreeSet<String> {
        self.claims
            .as_ref()
            .map(|claims| claims.scope_set())
            .unwrap_or_default()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_before_await_still_resolves() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await; // must not hang
    }

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.expect("waiter completes");
    }
}
