//! Error types and their resolution into HTTP responses.

use crate::respond;
use crate::Response;
use http::StatusCode;

/// Errors that handlers resolve into HTTP responses themselves.
///
/// Only [`AppError::Internal`] is treated as a server fault; everything else
/// is part of normal request handling and is logged at debug level at most.
/// Authorization failures are deliberately absent: an unauthenticated access
/// to a protected route is control flow (a 303 redirect), not an error.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The client sent a malformed request (bad form data, missing CSRF
    /// token). Resolved to 400 without a server-side error log.
    #[error("bad request: {0}")]
    Client(String),

    /// The requested resource does not exist. Malformed path parameters
    /// resolve here too, so resource non-existence and malformed identifiers
    /// are indistinguishable to the client.
    #[error("not found")]
    NotFound,

    /// Unexpected failure. Resolved to 500 and logged with full context.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Resolve this error into the response the client should see.
    pub fn into_response(self) -> Response {
        match self {
            Self::Client(reason) => {
                tracing::debug!(%reason, "rejecting malformed request");
                respond::status_page(StatusCode::BAD_REQUEST)
            }
            Self::NotFound => respond::status_page(StatusCode::NOT_FOUND),
            Self::Internal(error) => {
                tracing::error!(
                    error = %error,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "internal server error"
                );
                respond::server_error_page()
            }
        }
    }
}

/// A fault in the session backend (store unreachable, corrupt payload).
///
/// Session faults never fail a request on the read path: the session manager
/// treats a faulty load as "no valid session" and hands out a fresh anonymous
/// session instead. Unsafe-method requests then fail the CSRF check naturally,
/// because a fresh session carries no token.
#[derive(Debug, thiserror::Error)]
#[error("session backend fault: {0}")]
pub struct SessionFault(#[from] pub anyhow::Error);

/// Errors reported by the user and snippet store collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A signup used an email address that already belongs to an account.
    #[error("email address is already in use")]
    DuplicateEmail,

    /// The storage backend itself failed.
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}
