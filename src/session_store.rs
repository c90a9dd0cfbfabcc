//! Cookie handling and session persistence.

use crate::error::SessionFault;
use crate::session::{Session, SessionData, SessionId, SessionState};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Length of the session cookie value, in characters.
///
/// 64 alphanumeric characters give far more entropy than the 128 bits usually
/// considered sufficient for an unguessable token.
pub const COOKIE_LENGTH: usize = 64;

/// Generate a random cookie value.
/// Callers must pass a cryptographically secure random generator.
fn generate_cookie(rng: &mut impl Rng) -> String {
    let mut cookie = String::new();
    Alphanumeric.append_string(rng, &mut cookie, COOKIE_LENGTH);
    cookie
}

/// A session as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    /// Absolute expiry; enforced by the manager on every load.
    pub expiry: DateTime<Utc>,
    /// The session values.
    pub data: SessionData,
}

/// The backend-facing interface of the session store.
///
/// It defines simple CRUD-style operations keyed by [`SessionId`], so the
/// pipeline's concurrency and persistence guarantees can be tested against an
/// in-memory implementation without coupling to a store technology.
///
/// Implementations must serialize concurrent access to the same session id:
/// in particular [`replace`](SessionBackend::replace) must atomically remove
/// the old id and insert the new one, so concurrent requests never observe a
/// half-renewed session.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Create a session under the given id.
    async fn create(
        &self,
        id: &SessionId,
        expiry: DateTime<Utc>,
        data: &SessionData,
    ) -> Result<(), SessionFault>;

    /// Read the session with the given id, expired or not.
    async fn read(&self, id: &SessionId) -> Result<Option<StoredSession>, SessionFault>;

    /// Update the values of an existing session, keeping its id and expiry.
    async fn update(&self, id: &SessionId, data: &SessionData) -> Result<(), SessionFault>;

    /// Atomically invalidate `old_id` and store the session under `new_id`.
    async fn replace(
        &self,
        old_id: &SessionId,
        new_id: &SessionId,
        expiry: DateTime<Utc>,
        data: &SessionData,
    ) -> Result<(), SessionFault>;

    /// Delete the session with the given id. Deleting an unknown id is not
    /// an error.
    async fn delete(&self, id: &SessionId) -> Result<(), SessionFault>;
}

/// Attributes of the session cookie sent to clients.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    /// Cookie name.
    pub name: String,
    /// Whether to set the `Secure` attribute. Off only for local development.
    pub secure: bool,
    /// Session lifetime; also used for the cookie's `Max-Age`.
    pub ttl: Duration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: "sid".to_string(),
            secure: true,
            ttl: Duration::hours(12),
        }
    }
}

/// The user-facing session store.
///
/// Owns the mapping between the client-held cookie value and the backend
/// state. [`load`](SessionManager::load) never fails from the caller's point
/// of view: an absent, malformed, unknown or expired cookie, and even a
/// backend fault, all yield a fresh empty session (fail open to anonymous).
pub struct SessionManager {
    backend: Arc<dyn SessionBackend>,
    options: CookieOptions,
}

impl Debug for SessionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a session manager over the given backend.
    pub fn new(backend: Arc<dyn SessionBackend>, options: CookieOptions) -> Self {
        Self { backend, options }
    }

    /// Resolve the request's `Cookie` header into a session.
    ///
    /// Expiry is enforced here: an expired session is treated identically to
    /// "no session" and is deleted from the backend on a best-effort basis.
    pub async fn load(&self, cookie_header: Option<&str>) -> Session {
        let Some(cookie_value) = cookie_header.and_then(|header| self.cookie_value(header)) else {
            return Session::new();
        };
        if cookie_value.len() != COOKIE_LENGTH {
            tracing::debug!("session cookie has wrong length, starting fresh session");
            return Session::new();
        }

        let id = SessionId::from_cookie_value(cookie_value);
        match self.backend.read(&id).await {
            Ok(Some(stored)) => {
                if stored.expiry < Utc::now() {
                    tracing::debug!("session expired, starting fresh session");
                    if let Err(fault) = self.backend.delete(&id).await {
                        tracing::warn!(%fault, "failed to delete expired session");
                    }
                    Session::new()
                } else {
                    Session::from_store(id, stored.expiry, stored.data)
                }
            }
            Ok(None) => Session::new(),
            Err(fault) => {
                tracing::warn!(%fault, "session backend fault on load, starting fresh session");
                Session::new()
            }
        }
    }

    /// Persist the session and produce the `Set-Cookie` directive the
    /// response needs, if any.
    ///
    /// An unchanged session writes nothing and sets no cookie. A renewed
    /// session invalidates the old id immediately and issues a fresh cookie.
    /// A destroyed session clears the client cookie.
    pub async fn save(&self, session: Session) -> Result<Option<String>, SessionFault> {
        match session.state {
            SessionState::New { changed: false, .. } => Ok(None),
            SessionState::New { data, .. } => {
                let cookie_value = generate_cookie(&mut rand::thread_rng());
                let id = SessionId::from_cookie_value(&cookie_value);
                let expiry = Utc::now() + self.options.ttl;
                self.backend.create(&id, expiry, &data).await?;
                Ok(Some(self.set_cookie(&cookie_value)))
            }
            SessionState::Loaded { changed: false, .. } => Ok(None),
            SessionState::Loaded { id, data, .. } => {
                self.backend.update(&id, &data).await?;
                Ok(None)
            }
            SessionState::Renewed { old_id, data } => {
                let cookie_value = generate_cookie(&mut rand::thread_rng());
                let new_id = SessionId::from_cookie_value(&cookie_value);
                let expiry = Utc::now() + self.options.ttl;
                self.backend.replace(&old_id, &new_id, expiry, &data).await?;
                Ok(Some(self.set_cookie(&cookie_value)))
            }
            SessionState::Deleted { id: Some(id) } => {
                self.backend.delete(&id).await?;
                Ok(Some(self.clear_cookie()))
            }
            SessionState::Deleted { id: None } => Ok(None),
            SessionState::Invalid => unreachable!("invalid state is used internally only"),
        }
    }

    /// Extract this manager's cookie value from a `Cookie` header.
    fn cookie_value<'a>(&self, header: &'a str) -> Option<&'a str> {
        header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == self.options.name).then_some(value)
        })
    }

    fn set_cookie(&self, cookie_value: &str) -> String {
        let mut directive = format!(
            "{}={cookie_value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.options.name,
            self.options.ttl.num_seconds()
        );
        if self.options.secure {
            directive.push_str("; Secure");
        }
        directive
    }

    fn clear_cookie(&self) -> String {
        let mut directive = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.options.name
        );
        if self.options.secure {
            directive.push_str("; Secure");
        }
        directive
    }
}
