//! Error types for fedcore
//!
//! All engine errors are expressed as `Error`. The request-level
//! orchestrators map known kinds to specific HTTP statuses; anything
//! else propagates to the host framework unchanged.

use http::StatusCode;
use thiserror::Error;
use url::Url;

/// A single failed delivery inside a batch fan-out.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Inbox the POST was addressed to
    pub inbox: Url,
    /// Why it failed
    pub reason: String,
}

/// Engine-wide error type
///
/// The variants mirror the protocol's error taxonomy. Capability
/// implementations (database, transport) wrap their own failures in
/// `Database`/`Transport` so causes survive propagation.
#[derive(Debug, Error)]
pub enum Error {
    /// JSON did not resolve to a known ActivityStreams type (400)
    #[error("JSON did not resolve to a known ActivityStreams type")]
    UnmatchedType,

    /// A value that must carry an id does not (400 at the boundary)
    #[error("value is missing a required id")]
    MissingId,

    /// An activity that must carry a non-empty object does not (400)
    #[error("activity requires an object")]
    ObjectRequired,

    /// An activity that must carry a target does not (400)
    #[error("activity requires a target")]
    TargetRequired,

    /// An activity that must carry an actor does not (400)
    #[error("activity requires an actor")]
    ActorRequired,

    /// Objects referenced by an S2S Update/Delete come from a host other
    /// than the activity's
    #[error("object ids do not share the activity's origin")]
    WrongOrigin,

    /// The delegate rejected authentication (401); the delegate normally
    /// writes the response itself
    #[error("request is not authenticated")]
    NotAuthenticated,

    /// The delegate rejected authorization (403)
    #[error("request is not authorized")]
    NotAuthorized,

    /// A protocol half was exercised without its delegate configured
    #[error("no {0} delegate is configured")]
    DelegateMissing(&'static str),

    /// Request body was not valid JSON (400)
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else the engine can detect about a malformed value (400)
    #[error("validation error: {0}")]
    Validation(String),

    /// Database capability failure (500)
    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),

    /// Transport I/O failure, propagated unchanged (502)
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// A batch delivery where one or more per-recipient POSTs failed (502)
    #[error("delivery failed for {} recipient(s)", .0.len())]
    DeliveryFailed(Vec<DeliveryFailure>),

    /// Internal error (500)
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status the orchestrators answer with for this kind.
    ///
    /// Unknown kinds collapse to 500; the host can still downcast the
    /// propagated error and render something richer.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::UnmatchedType
            | Error::MissingId
            | Error::ObjectRequired
            | Error::TargetRequired
            | Error::ActorRequired
            | Error::Json(_)
            | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Error::NotAuthorized => StatusCode::FORBIDDEN,
            Error::DelegateMissing(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Transport(_) | Error::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
            Error::WrongOrigin | Error::Database(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Result type alias using Error
pub type Result<T> = std::result::Result<T, Error>;
