//! Server-rendered snippet publishing app.
//!
//! The interesting part of this crate is not the CRUD glue but the
//! request-processing pipeline: an ordered composition of interceptors
//! (panic recovery, request logging, security headers, session attachment,
//! CSRF protection, authentication) around a strict route dispatcher.
//!
//! # Pipeline
//!
//! Every inbound request flows through the *standard* chain, which applies to
//! literally everything including requests that never match a route:
//!
//! ```text
//! recover panic -> log request -> secure headers -> dispatcher
//! ```
//!
//! Session-aware routes additionally run the *dynamic* chain, and protected
//! routes append a require-authentication gate:
//!
//! ```text
//! attach session -> CSRF guard -> authenticate [-> require auth] -> handler
//! ```
//!
//! Chains are built once at startup into immutable [`Endpoint`]s; there is no
//! process-global mutable state outside the session backend.
//!
//! # Sessions
//!
//! Sessions are identified by an opaque random cookie value. The backend
//! never sees the raw cookie: it keys sessions by the blake3 hash of the
//! cookie value ([`SessionId`]). Expiry is enforced on every load, and an
//! expired, unknown or malformed cookie is indistinguishable from no cookie
//! at all. Logging in renews the session id to defeat session fixation.

#![forbid(unsafe_code)]
#![deny(
    future_incompatible,
    missing_debug_implementations,
    nonstandard_style,
    missing_docs,
    unreachable_pub
)]

pub mod app;
pub mod chain;
pub mod config;
pub mod context;
pub mod csrf;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod memory_store;
pub mod middleware;
pub mod models;
pub mod respond;
pub mod router;
pub mod session;
pub mod session_store;

pub use app::App;
pub use chain::{Chain, Endpoint, Handler, Middleware, Next, Request, Response};
pub use config::Config;
pub use error::{AppError, SessionFault, StoreError};
pub use memory_store::MemoryStore;
pub use session::{Session, SessionData, SessionId};
pub use session_store::{CookieOptions, SessionBackend, SessionManager};
