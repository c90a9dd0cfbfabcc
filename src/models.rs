//! Domain types and the storage collaborator interfaces.
//!
//! Persistence is out of scope for the pipeline core: handlers consume the
//! [`UserStore`] and [`SnippetStore`] capabilities and never a concrete
//! database. The in-memory implementations here back the binary's default
//! configuration and the test suite.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Mutex;
use subtle::ConstantTimeEq;

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Unique login email.
    pub email: String,
    /// Deactivated accounts fail authentication and invalidate stale
    /// sessions on the next request.
    pub active: bool,
}

/// A published snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// Primary key.
    pub id: i64,
    /// Title shown in listings.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Id of the authoring user.
    pub author_id: i64,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

/// User lookup and credential capability consumed by the pipeline.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Register a new account. Fails with [`StoreError::DuplicateEmail`] if
    /// the email is taken.
    async fn insert(&self, name: &str, email: &str, password: &str) -> Result<i64, StoreError>;

    /// Check credentials, returning the user id on success. Bad credentials
    /// are `Ok(None)`, not an error.
    async fn authenticate(&self, email: &str, password: &str)
        -> Result<Option<i64>, StoreError>;

    /// Look up an account that exists and is active. Deleted and deactivated
    /// accounts both resolve to `None`.
    async fn find_active(&self, id: i64) -> Result<Option<User>, StoreError>;
}

/// Snippet lookup capability consumed by the thin CRUD handlers.
#[async_trait]
pub trait SnippetStore: Send + Sync + 'static {
    /// Store a new snippet and return its id.
    async fn insert(&self, title: &str, content: &str, author_id: i64)
        -> Result<i64, StoreError>;

    /// Fetch one snippet.
    async fn get(&self, id: i64) -> Result<Option<Snippet>, StoreError>;

    /// The most recently created snippets, newest first.
    async fn latest(&self, limit: usize) -> Result<Vec<Snippet>, StoreError>;
}

struct UserRecord {
    user: User,
    password_digest: [u8; 32],
}

/// In-memory [`UserStore`].
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<UserTable>,
}

#[derive(Default)]
struct UserTable {
    next_id: i64,
    by_id: HashMap<i64, UserRecord>,
}

impl Debug for MemoryUserStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryUserStore").finish_non_exhaustive()
    }
}

impl MemoryUserStore {
    /// Create an empty user store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered accounts.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_id.len()
    }

    /// True if no accounts are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deactivate an account, as an administrative action would.
    pub fn deactivate(&self, id: i64) {
        let mut table = self.inner.lock().unwrap();
        if let Some(record) = table.by_id.get_mut(&id) {
            record.user.active = false;
        }
    }

    fn digest(password: &str) -> [u8; 32] {
        Sha256::digest(password.as_bytes()).into()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, name: &str, email: &str, password: &str) -> Result<i64, StoreError> {
        let mut table = self.inner.lock().unwrap();
        if table
            .by_id
            .values()
            .any(|record| record.user.email == email)
        {
            return Err(StoreError::DuplicateEmail);
        }
        table.next_id += 1;
        let id = table.next_id;
        table.by_id.insert(
            id,
            UserRecord {
                user: User {
                    id,
                    name: name.to_string(),
                    email: email.to_string(),
                    active: true,
                },
                password_digest: Self::digest(password),
            },
        );
        Ok(id)
    }

    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<i64>, StoreError> {
        let table = self.inner.lock().unwrap();
        let digest = Self::digest(password);
        Ok(table
            .by_id
            .values()
            .find(|record| record.user.email == email && record.user.active)
            .filter(|record| bool::from(record.password_digest.ct_eq(&digest)))
            .map(|record| record.user.id))
    }

    async fn find_active(&self, id: i64) -> Result<Option<User>, StoreError> {
        let table = self.inner.lock().unwrap();
        Ok(table
            .by_id
            .get(&id)
            .filter(|record| record.user.active)
            .map(|record| record.user.clone()))
    }
}

/// In-memory [`SnippetStore`].
#[derive(Default)]
pub struct MemorySnippetStore {
    inner: Mutex<SnippetTable>,
}

#[derive(Default)]
struct SnippetTable {
    next_id: i64,
    snippets: Vec<Snippet>,
}

impl Debug for MemorySnippetStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySnippetStore").finish_non_exhaustive()
    }
}

impl MemorySnippetStore {
    /// Create an empty snippet store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snippets.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().snippets.len()
    }

    /// True if no snippets are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnippetStore for MemorySnippetStore {
    async fn insert(
        &self,
        title: &str,
        content: &str,
        author_id: i64,
    ) -> Result<i64, StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.next_id += 1;
        let id = table.next_id;
        table.snippets.push(Snippet {
            id,
            title: title.to_string(),
            content: content.to_string(),
            author_id,
            created: Utc::now(),
        });
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<Snippet>, StoreError> {
        let table = self.inner.lock().unwrap();
        Ok(table
            .snippets
            .iter()
            .find(|snippet| snippet.id == id)
            .cloned())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Snippet>, StoreError> {
        let table = self.inner.lock().unwrap();
        Ok(table.snippets.iter().rev().take(limit).cloned().collect())
    }
}
