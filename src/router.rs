//! Route table and dispatcher.
//!
//! The table maps `(method, path pattern)` to a chain-wrapped endpoint.
//! Patterns support exactly one kind of variable segment: a named parameter
//! such as `:id`, matching a single non-empty path segment. Matching is
//! strict: a wrong method, an extra trailing segment or a trailing slash is
//! "not found", never a silent match.
//!
//! The router is itself a [`Handler`], so it terminates the standard chain;
//! requests that match nothing still get logging, security headers and crash
//! protection.

use crate::chain::{Endpoint, Handler, Request, Response};
use crate::context::PathParams;
use crate::respond;
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse a pattern such as `/snippet/:id`.
    pub fn parse(pattern: &str) -> Self {
        let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed
                .split('/')
                .map(|segment| match segment.strip_prefix(':') {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(segment.to_string()),
                })
                .collect()
        };
        Self { segments }
    }

    /// Match a request path against this pattern, capturing named parameters.
    ///
    /// Segment counts must agree exactly; a parameter matches one non-empty
    /// segment. `/snippet/1/` has a trailing empty segment and therefore does
    /// not match `/snippet/:id`.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };
        if segments.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (expected, actual) in self.segments.iter().zip(segments) {
            match expected {
                Segment::Literal(literal) if literal == actual => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if actual.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), actual.to_string());
                }
            }
        }
        Some(params)
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    endpoint: Endpoint,
}

/// The startup-built, immutable route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Debug for Router {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Create an empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a GET route.
    pub fn get(&mut self, pattern: &str, endpoint: Endpoint) {
        self.add(Method::GET, pattern, endpoint);
    }

    /// Register a POST route.
    pub fn post(&mut self, pattern: &str, endpoint: Endpoint) {
        self.add(Method::POST, pattern, endpoint);
    }

    fn add(&mut self, method: Method, pattern: &str, endpoint: Endpoint) {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            endpoint,
        });
    }
}

#[async_trait]
impl Handler for Router {
    async fn call(&self, mut request: Request) -> Response {
        for route in &self.routes {
            if route.method != *request.method() {
                continue;
            }
            let Some(params) = route.pattern.matches(request.uri().path()) else {
                continue;
            };
            request.extensions_mut().insert(PathParams::new(params));
            return route.endpoint.call(request).await;
        }
        respond::status_page(StatusCode::NOT_FOUND)
    }
}
