//! The concrete interceptors.
//!
//! The *standard* chain (recover, log, secure headers) wraps every request,
//! including ones that never match a route. The *dynamic* chain (session
//! attach, CSRF guard, authenticate) wraps session-aware routes only, and
//! protected routes append [`RequireAuthentication`].

use crate::chain::{Middleware, Next, Request, Response};
use crate::context::{self, AuthContext, SessionHandle};
use crate::models::UserStore;
use crate::respond;
use crate::session_store::SessionManager;
use async_trait::async_trait;
use futures::FutureExt;
use http::header::{HeaderValue, CACHE_CONTROL, COOKIE, SET_COOKIE};
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Login page unauthenticated clients are redirected to.
pub const LOGIN_PATH: &str = "/user/login";

/// Converts a panic anywhere in the rest of the chain into a 500 response.
///
/// This must be the outermost interceptor so that failures in session
/// attachment, CSRF checking and authentication are caught too. The process
/// never terminates because of a single request; the failing response is
/// marked `Connection: close` so a half-written body is not reused.
#[derive(Debug, Clone, Copy)]
pub struct RecoverPanic;

#[async_trait]
impl Middleware for RecoverPanic {
    async fn handle(&self, request: Request, next: Next) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(payload) => {
                tracing::error!(
                    %method,
                    %path,
                    panic = %panic_message(payload.as_ref()),
                    backtrace = %Backtrace::force_capture(),
                    "recovered from panic while handling request"
                );
                // The secure-headers interceptor sits inside this one, so the
                // recovery response has to apply the header set itself.
                let mut response = respond::server_error_page();
                SecureHeaders::apply(&mut response);
                response
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Logs one line per request with method, path, status and elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct RequestLog;

#[async_trait]
impl Middleware for RequestLog {
    async fn handle(&self, request: Request, next: Next) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let started = Instant::now();
        let response = next.run(request).await;
        tracing::info!(
            %method,
            %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "handled request"
        );
        response
    }
}

/// Adds the fixed protective header set to every response, regardless of the
/// downstream outcome.
#[derive(Debug, Clone, Copy)]
pub struct SecureHeaders;

impl SecureHeaders {
    /// The header set itself, shared with the panic-recovery path.
    pub fn apply(response: &mut Response) {
        let headers = response.headers_mut();
        headers.insert("X-Frame-Options", HeaderValue::from_static("deny"));
        headers.insert(
            "X-XSS-Protection",
            HeaderValue::from_static("1; mode=block"),
        );
        headers.insert(
            "X-Content-Type-Options",
            HeaderValue::from_static("nosniff"),
        );
    }
}

#[async_trait]
impl Middleware for SecureHeaders {
    async fn handle(&self, request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        Self::apply(&mut response);
        response
    }
}

/// Loads the session identified by the request cookie, shares it with the
/// rest of the chain, and persists it once the response is ready.
///
/// Loading never fails the request: absent, malformed, expired and unknown
/// cookies all yield a fresh session, and a backend fault on save is logged
/// rather than turned into an error response (the state change is lost, the
/// page is not).
#[derive(Debug)]
pub struct SessionAttach {
    manager: Arc<SessionManager>,
}

impl SessionAttach {
    /// Build the interceptor over the shared session manager.
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Middleware for SessionAttach {
    async fn handle(&self, mut request: Request, next: Next) -> Response {
        let cookie_header = request
            .headers()
            .get(COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let session = self.manager.load(cookie_header.as_deref()).await;

        let handle = SessionHandle::new(session);
        request.extensions_mut().insert(handle.clone());

        let mut response = next.run(request).await;

        match self.manager.save(handle.take()).await {
            Ok(Some(directive)) => match HeaderValue::from_str(&directive) {
                Ok(value) => {
                    response.headers_mut().append(SET_COOKIE, value);
                }
                Err(error) => {
                    tracing::error!(%error, "generated session cookie is not a valid header");
                }
            },
            Ok(None) => {}
            Err(fault) => {
                tracing::error!(%fault, "failed to persist session");
            }
        }
        response
    }
}

/// Resolves the session's stored user id into a request-scoped
/// [`AuthContext`], re-validating against the user store every request.
///
/// A stored id that no longer maps to an active account is cleared from the
/// session and the request proceeds as anonymous: failing open to "logged
/// out" rather than failing closed with an error.
pub struct Authenticate {
    users: Arc<dyn UserStore>,
}

impl std::fmt::Debug for Authenticate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticate").finish_non_exhaustive()
    }
}

impl Authenticate {
    /// Build the interceptor over the user store collaborator.
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Middleware for Authenticate {
    async fn handle(&self, mut request: Request, next: Next) -> Response {
        let session = context::session(&request);
        let user_id = session
            .as_ref()
            .and_then(|handle| handle.with(|session| session.data().user_id));

        let auth = match user_id {
            None => AuthContext::Anonymous,
            Some(id) => match self.users.find_active(id).await {
                Ok(Some(user)) => AuthContext::Authenticated(user),
                Ok(None) => {
                    tracing::debug!(user_id = id, "clearing stale session user id");
                    if let Some(handle) = &session {
                        handle.with(|session| session.data_mut().user_id = None);
                    }
                    AuthContext::Anonymous
                }
                Err(error) => {
                    // The account may well still exist; leave the session
                    // value alone and treat this request as anonymous.
                    tracing::warn!(%error, user_id = id, "user lookup failed, treating as anonymous");
                    AuthContext::Anonymous
                }
            },
        };

        request.extensions_mut().insert(auth);
        next.run(request).await
    }
}

/// Route-scoped gate for protected routes.
///
/// Anonymous requests are redirected to the login page with 303 and the
/// handler never runs. Authenticated responses are marked not publicly
/// cacheable so a shared cache never serves them to another client.
#[derive(Debug, Clone, Copy)]
pub struct RequireAuthentication;

#[async_trait]
impl Middleware for RequireAuthentication {
    async fn handle(&self, request: Request, next: Next) -> Response {
        if !context::is_authenticated(&request) {
            return respond::see_other(LOGIN_PATH);
        }
        let mut response = next.run(request).await;
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}
