//! Application assembly.
//!
//! [`App::pipeline`] builds the route table and both middleware chains once,
//! into immutable structures; nothing about routing or chain order can change
//! after startup. [`App::into_service`] mounts the pipeline as the fallback
//! of an otherwise empty `axum` router, so every request flows through the
//! standard chain whether or not it matches a route.

use crate::chain::{Chain, Endpoint, Handler, Request, Response};
use crate::csrf::CsrfGuard;
use crate::handlers;
use crate::middleware::{
    Authenticate, RecoverPanic, RequestLog, RequireAuthentication, SecureHeaders, SessionAttach,
};
use crate::models::{SnippetStore, UserStore};
use crate::respond;
use crate::router::Router;
use crate::session_store::SessionManager;
use http::StatusCode;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

/// Requests bodies above this size are rejected before the pipeline runs.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state: the storage collaborators and the session
/// manager. Everything is behind `Arc`s, so cloning is cheap and handlers
/// across concurrent requests share the same stores.
pub struct App {
    /// User storage collaborator.
    pub users: Arc<dyn UserStore>,
    /// Snippet storage collaborator.
    pub snippets: Arc<dyn SnippetStore>,
    /// Session store front.
    pub sessions: Arc<SessionManager>,
}

impl Debug for App {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Assemble the application over its collaborators.
    pub fn new(
        users: Arc<dyn UserStore>,
        snippets: Arc<dyn SnippetStore>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            users,
            snippets,
            sessions,
        }
    }

    /// Build the full request pipeline: the standard chain terminated by the
    /// route dispatcher.
    ///
    /// Interceptor order is load-bearing. Recovery is outermost so panics
    /// from any later stage, the session/CSRF/auth interceptors included,
    /// are caught. The CSRF guard runs after session attachment because it
    /// needs the session.
    pub fn pipeline(self: &Arc<Self>) -> Endpoint {
        let standard = Chain::new()
            .append(RecoverPanic)
            .append(RequestLog)
            .append(SecureHeaders);
        let dynamic = Chain::new()
            .append(SessionAttach::new(Arc::clone(&self.sessions)))
            .append(CsrfGuard)
            .append(Authenticate::new(Arc::clone(&self.users)));
        let protected = dynamic.clone().append(RequireAuthentication);

        let mut mux = Router::new();
        mux.get("/", dynamic.then(bind(self, handlers::home)));
        mux.get(
            "/snippet/create",
            protected.then(bind(self, handlers::create_snippet_form)),
        );
        mux.post(
            "/snippet/create",
            protected.then(bind(self, handlers::create_snippet)),
        );
        mux.get("/snippet/:id", dynamic.then(bind(self, handlers::show_snippet)));

        mux.get("/user/signup", dynamic.then(bind(self, handlers::signup_form)));
        mux.post("/user/signup", dynamic.then(bind(self, handlers::signup)));
        mux.get("/user/login", dynamic.then(bind(self, handlers::login_form)));
        mux.post("/user/login", dynamic.then(bind(self, handlers::login)));
        mux.post("/user/logout", protected.then(bind(self, handlers::logout)));
        mux.get("/user/profile", protected.then(bind(self, handlers::profile)));

        // The liveness probe has no session or CSRF concerns; it must stay
        // reachable even when that subsystem is degraded.
        mux.get("/ping", Chain::new().then(handlers::ping));
        mux.get("/about", dynamic.then(bind(self, handlers::about)));

        standard.then(mux)
    }

    /// Mount the pipeline on the HTTP substrate.
    ///
    /// The request body is buffered up front so interceptors (the CSRF guard
    /// reads form fields) and handlers can inspect it without consuming it.
    pub fn into_service(self: Arc<Self>) -> axum::Router {
        let endpoint = self.pipeline();
        axum::Router::new().fallback(move |request: axum::extract::Request| {
            let endpoint = endpoint.clone();
            async move {
                let (parts, body) = request.into_parts();
                let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        // Buffering happens before the pipeline runs, so this
                        // rejection never reaches the standard chain; it gets
                        // the header set and a log line here instead.
                        tracing::info!(
                            method = %parts.method,
                            path = %parts.uri.path(),
                            %error,
                            "rejecting request whose body failed to buffer"
                        );
                        let mut response = respond::status_page(StatusCode::BAD_REQUEST);
                        SecureHeaders::apply(&mut response);
                        return response;
                    }
                };
                endpoint.call(Request::from_parts(parts, bytes)).await
            }
        })
    }
}

/// Adapt an `async fn(Arc<App>, Request) -> Response` into a chain handler.
fn bind<F, Fut>(app: &Arc<App>, f: F) -> impl Handler
where
    F: Fn(Arc<App>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let app = Arc::clone(app);
    move |request: Request| f(Arc::clone(&app), request)
}
