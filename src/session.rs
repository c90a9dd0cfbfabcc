//! The session value and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::mem;

/// The values a session can carry.
///
/// Handlers never touch the backend directly; they read and write these
/// fields through accessor functions scoped to the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    /// Id of the authenticated user, if any. Re-validated against the user
    /// store on every request before being trusted.
    pub user_id: Option<i64>,
    /// One-shot message shown on the next rendered page.
    pub flash: Option<String>,
    /// Anti-forgery token. Stable for the lifetime of the session, cleared
    /// on renewal so the next issue regenerates it.
    pub csrf_token: Option<String>,
}

/// A session with a client, tracking its own lifecycle.
///
/// Changes are tracked automatically: whenever the data is accessed mutably,
/// the session is marked as changed. The [`SessionManager`] only writes to
/// the backend (and only emits a cookie) when something actually changed, so
/// a request that merely reads a page never creates a session.
///
/// It is marked `#[must_use]`, as dropping it will not update the backend.
/// The session-attach interceptor passes it back to
/// [`SessionManager::save`](crate::session_store::SessionManager::save)
/// after the rest of the chain has run.
#[derive(Debug, Clone)]
#[must_use]
pub struct Session {
    pub(crate) state: SessionState,
}

#[derive(Debug, Clone)]
pub(crate) enum SessionState {
    /// Freshly created for this request, not yet known to backend or client.
    New { data: SessionData, changed: bool },
    /// Loaded from the backend under `id`.
    Loaded {
        id: SessionId,
        expiry: DateTime<Utc>,
        data: SessionData,
        changed: bool,
    },
    /// Marked for id renewal: the old id must be invalidated and a fresh one
    /// issued, carrying the data over. Used at login to defeat fixation.
    Renewed { old_id: SessionId, data: SessionData },
    /// Marked for destruction. `id` is `None` if the session was never
    /// communicated to backend or client.
    Deleted { id: Option<SessionId> },
    /// Used internally to replace the state through a mutable reference
    /// without unsafe code.
    Invalid,
}

impl Session {
    /// Create a fresh empty session. Nothing is persisted and no cookie is
    /// issued unless the data is written to.
    pub fn new() -> Self {
        Self {
            state: SessionState::New {
                data: SessionData::default(),
                changed: false,
            },
        }
    }

    /// Rehydrate a session from parts loaded by a session backend.
    pub(crate) fn from_store(id: SessionId, expiry: DateTime<Utc>, data: SessionData) -> Self {
        Self {
            state: SessionState::Loaded {
                id,
                expiry,
                data,
                changed: false,
            },
        }
    }

    /// Read access to the session values. Does not mark the session changed.
    ///
    /// **Panics** if the session was marked for destruction.
    pub fn data(&self) -> &SessionData {
        match &self.state {
            SessionState::New { data, .. }
            | SessionState::Loaded { data, .. }
            | SessionState::Renewed { data, .. } => data,
            SessionState::Deleted { .. } => {
                panic!("attempted to read a destroyed session")
            }
            SessionState::Invalid => unreachable!("invalid state is used internally only"),
        }
    }

    /// Mutable access to the session values, marking the session as changed.
    ///
    /// Note that the session is marked changed even if the returned reference
    /// is never written to.
    ///
    /// **Panics** if the session was marked for destruction.
    pub fn data_mut(&mut self) -> &mut SessionData {
        match &mut self.state {
            SessionState::New { data, changed } => {
                *changed = true;
                data
            }
            SessionState::Loaded { data, changed, .. } => {
                *changed = true;
                data
            }
            SessionState::Renewed { data, .. } => data,
            SessionState::Deleted { .. } => {
                panic!("attempted to write to a destroyed session")
            }
            SessionState::Invalid => unreachable!("invalid state is used internally only"),
        }
    }

    /// Mark this session for id renewal, carrying its values over.
    ///
    /// The old id is invalidated the moment the session is saved, so a cookie
    /// captured before login cannot ride on the authenticated session. The
    /// CSRF token is cleared so it is regenerated under the new id.
    pub fn renew(&mut self) {
        match mem::replace(&mut self.state, SessionState::Invalid) {
            SessionState::New { mut data, .. } => {
                data.csrf_token = None;
                self.state = SessionState::New {
                    data,
                    changed: true,
                };
            }
            SessionState::Loaded { id, mut data, .. } => {
                data.csrf_token = None;
                self.state = SessionState::Renewed { old_id: id, data };
            }
            state @ SessionState::Renewed { .. } => {
                // Renewing twice within one request is a no-op.
                self.state = state;
            }
            SessionState::Deleted { .. } => {
                panic!("attempted to renew a destroyed session")
            }
            SessionState::Invalid => unreachable!("invalid state is used internally only"),
        }
    }

    /// Mark this session for destruction. Further data access will panic.
    pub fn delete(&mut self) {
        match mem::replace(&mut self.state, SessionState::Invalid) {
            SessionState::New { .. } => {
                self.state = SessionState::Deleted { id: None };
            }
            SessionState::Loaded { id, .. } => {
                self.state = SessionState::Deleted { id: Some(id) };
            }
            SessionState::Renewed { old_id, .. } => {
                self.state = SessionState::Deleted { id: Some(old_id) };
            }
            SessionState::Deleted { .. } => {
                panic!("attempted to destroy a destroyed session")
            }
            SessionState::Invalid => unreachable!("invalid state is used internally only"),
        }
    }

    /// Returns true if this session is marked for destruction.
    pub fn is_deleted(&self) -> bool {
        matches!(self.state, SessionState::Deleted { .. })
    }

    /// Returns true if saving this session would write to the backend.
    pub fn is_changed(&self) -> bool {
        match &self.state {
            SessionState::New { changed, .. } | SessionState::Loaded { changed, .. } => *changed,
            SessionState::Renewed { .. } | SessionState::Deleted { .. } => true,
            SessionState::Invalid => unreachable!("invalid state is used internally only"),
        }
    }

    /// Take the flash message out of the session, if there is one.
    /// Only marks the session changed when a message was actually present.
    pub fn take_flash(&mut self) -> Option<String> {
        if self.data().flash.is_some() {
            self.data_mut().flash.take()
        } else {
            None
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// The type backing a session id.
pub type SessionIdType = [u8; blake3::OUT_LEN];

/// The backend-side identifier of a session.
///
/// This is the blake3 hash of the cookie value, so the backend never stores
/// the raw client-held secret.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionId(Box<SessionIdType>);

impl SessionId {
    /// Applies a cryptographic hash function on a cookie value to obtain the
    /// session id for that cookie.
    pub fn from_cookie_value(cookie_value: &str) -> Self {
        let hash = blake3::hash(cookie_value.as_bytes());
        Self(Box::new(hash.into()))
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId(")?;
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_unchanged() {
        let session = Session::new();
        assert!(!session.is_changed());
        assert!(!session.is_deleted());
        assert_eq!(session.data(), &SessionData::default());
    }

    #[test]
    fn mutable_access_marks_changed() {
        let mut session = Session::new();
        session.data_mut().user_id = Some(7);
        assert!(session.is_changed());
        assert_eq!(session.data().user_id, Some(7));
    }

    #[test]
    fn renew_clears_csrf_token_and_keeps_values() {
        let id = SessionId::from_cookie_value("cookie");
        let mut session = Session::from_store(
            id.clone(),
            Utc::now(),
            SessionData {
                user_id: None,
                flash: Some("hi".into()),
                csrf_token: Some("token".into()),
            },
        );
        session.renew();
        assert!(session.is_changed());
        assert_eq!(session.data().flash.as_deref(), Some("hi"));
        assert_eq!(session.data().csrf_token, None);
        assert!(matches!(
            &session.state,
            SessionState::Renewed { old_id, .. } if *old_id == id
        ));
    }

    #[test]
    fn renew_is_idempotent_within_a_request() {
        let mut session = Session::from_store(
            SessionId::from_cookie_value("cookie"),
            Utc::now(),
            SessionData::default(),
        );
        session.renew();
        session.renew();
        assert!(matches!(session.state, SessionState::Renewed { .. }));
    }

    #[test]
    fn delete_never_communicated_session_carries_no_id() {
        let mut session = Session::new();
        session.delete();
        assert!(matches!(session.state, SessionState::Deleted { id: None }));
    }

    #[test]
    fn take_flash_pops_once() {
        let mut session = Session::new();
        session.data_mut().flash = Some("created".into());
        assert_eq!(session.take_flash().as_deref(), Some("created"));
        assert_eq!(session.take_flash(), None);
    }

    #[test]
    fn take_flash_on_empty_session_does_not_mark_changed() {
        let mut session = Session::new();
        assert_eq!(session.take_flash(), None);
        assert!(!session.is_changed());
    }

    #[test]
    fn session_ids_are_stable_per_cookie() {
        assert_eq!(
            SessionId::from_cookie_value("abc"),
            SessionId::from_cookie_value("abc")
        );
        assert_ne!(
            SessionId::from_cookie_value("abc"),
            SessionId::from_cookie_value("abd")
        );
    }
}
