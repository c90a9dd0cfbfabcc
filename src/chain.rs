//! Ordered middleware composition.
//!
//! A [`Chain`] is an explicit ordered list of interceptors. Composing it with
//! a terminal [`Handler`] via [`Chain::then`] folds the list into a single
//! callable [`Endpoint`] without invoking anything; per request, each
//! interceptor receives the request and a [`Next`] continuation and may call
//! the next stage, write a response and stop, or do both around the call.
//!
//! Declaration order is execution order: the first appended interceptor is
//! the outermost one. The order is load-bearing: panic recovery must wrap
//! everything, and the CSRF guard needs the session attached before it runs.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

/// An inbound request as the pipeline sees it: the body is buffered up front
/// so interceptors and handlers can inspect it without consuming it.
pub type Request = http::Request<Bytes>;

/// An outbound response.
pub type Response = http::Response<axum::body::Body>;

/// A terminal request handler.
///
/// Implemented for any `Fn(Request) -> impl Future<Output = Response>`
/// closure, as well as for [`Endpoint`] and the route dispatcher, so chains
/// compose with each other.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Produce the response for this request.
    async fn call(&self, request: Request) -> Response;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn call(&self, request: Request) -> Response {
        (self)(request).await
    }
}

/// A request interceptor.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Process the request. Call `next.run(request)` to continue the chain,
    /// or return a response without doing so to short-circuit.
    async fn handle(&self, request: Request, next: Next) -> Response;
}

/// The continuation handed to a [`Middleware`]: the remaining interceptors
/// followed by the terminal handler.
pub struct Next {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    handler: Arc<dyn Handler>,
    index: usize,
}

impl Debug for Next {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.middlewares.len() - self.index))
            .finish_non_exhaustive()
    }
}

impl Next {
    /// Run the rest of the chain.
    pub async fn run(mut self, request: Request) -> Response {
        if let Some(middleware) = self.middlewares.get(self.index).cloned() {
            self.index += 1;
            middleware.handle(request, self).await
        } else {
            self.handler.call(request).await
        }
    }
}

/// An ordered, immutable sequence of interceptors.
///
/// Cheap to clone and to extend: route-specific chains are built by cloning a
/// base chain and appending (e.g. the require-authentication gate), which
/// never mutates the original.
#[derive(Clone, Default)]
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Debug for Chain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

impl Chain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor. The first appended runs outermost.
    pub fn append<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Terminate the chain with a handler, producing an invocable endpoint.
    /// This is side-effect-free; nothing runs until a request comes in.
    pub fn then<H: Handler>(&self, handler: H) -> Endpoint {
        Endpoint {
            middlewares: Arc::from(self.middlewares.clone()),
            handler: Arc::new(handler),
        }
    }
}

/// A fully composed chain: interceptors plus terminal handler.
#[derive(Clone)]
pub struct Endpoint {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    handler: Arc<dyn Handler>,
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Handler for Endpoint {
    async fn call(&self, request: Request) -> Response {
        let next = Next {
            middlewares: Arc::clone(&self.middlewares),
            handler: Arc::clone(&self.handler),
            index: 0,
        };
        next.run(request).await
    }
}
