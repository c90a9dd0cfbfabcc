//! Request-scoped state.
//!
//! Interceptors attach values to the request's extensions; downstream stages
//! and handlers read them back through the typed accessors in this module
//! rather than through ambient lookup. Nothing here crosses a request
//! boundary.

use crate::chain::Request;
use crate::models::User;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Named path parameters captured by the dispatcher, e.g. `id` for a route
/// registered as `/snippet/:id`.
#[derive(Debug, Clone, Default)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub(crate) fn new(params: HashMap<String, String>) -> Self {
        Self(params)
    }

    /// Look up a captured parameter by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Read a named path parameter from the request.
pub fn path_param<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.extensions().get::<PathParams>()?.get(name)
}

/// Read a path parameter that a handler expects to be a strictly positive
/// integer. Negative, zero, decimal, non-numeric and absent values all yield
/// `None`; the caller turns that into a 404, so a malformed identifier is
/// indistinguishable from a missing resource.
pub fn positive_id_param(request: &Request, name: &str) -> Option<i64> {
    let id = path_param(request, name)?.parse::<i64>().ok()?;
    (id > 0).then_some(id)
}

/// Shared handle to the current request's session.
///
/// The session-attach interceptor inserts one clone into the request
/// extensions and keeps another to persist the session once the rest of the
/// chain has run. Access goes through [`SessionHandle::with`], which takes a
/// synchronous closure so the lock can never be held across an await point.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    /// Wrap a freshly loaded session.
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Run a closure against the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        // A handler that panicked while holding the lock poisons it; the
        // recovery interceptor still needs the session afterwards to save
        // whatever state is left, so poisoning is not propagated.
        let mut session = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    /// Take the session out of the handle for saving, leaving a fresh empty
    /// one behind. Called exactly once, by the session-attach interceptor.
    pub(crate) fn take(&self) -> Session {
        let mut session = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *session)
    }
}

/// Access the current request's session.
/// Present only on routes wrapped by the dynamic chain.
pub fn session(request: &Request) -> Option<SessionHandle> {
    request.extensions().get::<SessionHandle>().cloned()
}

/// The authentication state resolved for this request.
#[derive(Debug, Clone)]
pub enum AuthContext {
    /// No valid authenticated user is bound to this request.
    Anonymous,
    /// The session is bound to this active account.
    Authenticated(User),
}

/// Returns true if the request carries a validated authenticated identity.
/// Requests that never ran the authenticate interceptor are anonymous.
pub fn is_authenticated(request: &Request) -> bool {
    matches!(
        request.extensions().get::<AuthContext>(),
        Some(AuthContext::Authenticated(_))
    )
}

/// The authenticated user for this request, if any.
pub fn current_user(request: &Request) -> Option<&User> {
    match request.extensions().get::<AuthContext>() {
        Some(AuthContext::Authenticated(user)) => Some(user),
        _ => None,
    }
}
