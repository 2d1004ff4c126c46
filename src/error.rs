//! Error taxonomy shared by every component (§7).
//!
//! Each component classifies whatever goes wrong into one of these kinds
//! before it crosses a module boundary; nothing propagates unclassified.

use rocket::Request;
use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not authorized")]
    AuthorizationDenied,

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidInput(_) => Status::BadRequest,
            // Not-authorized and not-found share a status and body shape
            // deliberately (§7: "to avoid probing").
            Error::AuthorizationDenied | Error::NotFound => Status::NotFound,
            Error::Conflict(_) => Status::Conflict,
            Error::Transient(_) => Status::ServiceUnavailable,
            Error::Permanent(_) => Status::BadGateway,
            Error::Invariant(_) => Status::InternalServerError,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "input_invalid",
            Error::AuthorizationDenied => "authorization_denied",
            Error::NotFound => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Transient(_) => "transient",
            Error::Permanent(_) => "permanent",
            Error::Invariant(_) => "internal_invariant_violation",
        }
    }

    /// True if the caller (or the daemon retry loop) may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e
            && db_err.code().as_deref() == Some("23505")
        {
            return Error::Conflict(db_err.message().to_string());
        }
        match e {
            sqlx::Error::RowNotFound => Error::NotFound,
            other => Error::Transient(other.to_string()),
        }
    }
}

impl From<lapin::Error> for Error {
    fn from(e: lapin::Error) -> Self {
        Error::Transient(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Transient(e.to_string())
    }
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        }));
        Response::build_from(body.respond_to(req)?)
            .status(self.status())
            .ok()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
