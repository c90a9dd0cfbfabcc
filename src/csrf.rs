//! Anti-forgery tokens.
//!
//! Each session carries one random token, issued lazily when a page first
//! needs to embed it and stable for the lifetime of the session, so a token
//! rendered into a form stays valid for subsequent submissions. Session
//! renewal clears the token; the next issue regenerates it under the new
//! session id, so a token is only ever valid for the session that issued it.

use crate::chain::{Middleware, Next, Request, Response};
use crate::context;
use crate::forms::Form;
use crate::respond;
use crate::session::Session;
use async_trait::async_trait;
use http::{Method, StatusCode};
use rand::distributions::{Alphanumeric, DistString};
use subtle::ConstantTimeEq;

/// Form field carrying the submitted token.
pub const TOKEN_FIELD: &str = "csrf_token";

/// Length of a token, in characters.
const TOKEN_LENGTH: usize = 32;

/// Return the session's token, generating and storing one if the session has
/// none yet. Reading an existing token does not mark the session changed.
pub fn issue(session: &mut Session) -> String {
    if let Some(token) = &session.data().csrf_token {
        return token.clone();
    }
    let token = Alphanumeric.sample_string(&mut rand::thread_rng(), TOKEN_LENGTH);
    session.data_mut().csrf_token = Some(token.clone());
    token
}

/// Compare a submitted token against the session's token.
///
/// The comparison is constant-time over the token bytes so it cannot leak
/// where the first mismatching byte sits. Length is not hidden; tokens have
/// a fixed public length anyway.
pub fn verify(submitted: Option<&str>, session: &Session) -> bool {
    let (Some(submitted), Some(expected)) = (submitted, &session.data().csrf_token) else {
        return false;
    };
    submitted.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Interceptor rejecting unsafe-method requests without a matching token.
///
/// Positioned after session attachment (it needs the session) and before any
/// handler logic, so a handler never sees a forged request. Safe methods pass
/// without so much as a session lookup, so merely reading a page never
/// requires a session.
#[derive(Debug, Clone, Copy)]
pub struct CsrfGuard;

#[async_trait]
impl Middleware for CsrfGuard {
    async fn handle(&self, request: Request, next: Next) -> Response {
        if is_safe(request.method()) {
            return next.run(request).await;
        }

        let Some(session) = context::session(&request) else {
            // The dynamic chain always attaches a session first; reaching
            // this point without one means the route was wired wrong, and
            // failing closed is the only safe answer.
            tracing::warn!("csrf guard ran without an attached session");
            return respond::status_page(StatusCode::BAD_REQUEST);
        };

        let form = Form::parse(request.body());
        let submitted = form.get(TOKEN_FIELD);
        let submitted = (!submitted.is_empty()).then_some(submitted);
        let ok = session.with(|session| verify(submitted, session));
        if !ok {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                "rejecting request with missing or mismatched csrf token"
            );
            return respond::status_page(StatusCode::BAD_REQUEST);
        }

        next.run(request).await
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}
