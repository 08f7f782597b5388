//! Error taxonomy shared by every component.
//!
//! Domain errors bubble out of components unchanged; only the API boundary
//! maps them to HTTP status codes via [`IntoResponse`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Constraint on input values: bad coordinates, empty location lists,
    /// unparseable RUT, invalid state transitions.
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    /// Unique-constraint violation (duplicate identifier, already-activated
    /// account).
    #[error("{0}")]
    Conflict(String),

    #[error("autenticación requerida")]
    AuthRequired,

    #[error("{0}")]
    Forbidden(String),

    /// The optimizer ran but could not form any feasible route. Reported as
    /// `success=false` inside a well-formed result, never as HTTP 5xx.
    #[error("{0}")]
    Infeasible(String),

    /// Every distance provider failed. The geodesic fallback always succeeds
    /// for valid coordinates, so reaching this implies a bug.
    #[error("all distance providers failed: {0}")]
    ProviderUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Machine-readable kind, stable across message wording changes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::AuthRequired => "auth_required",
            Error::Forbidden(_) => "forbidden",
            Error::Infeasible(_) => "infeasible",
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::AuthRequired => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            // Partial assignment is a business outcome, not a server fault.
            Error::Infeasible(_) => StatusCode::OK,
            Error::ProviderUnavailable(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
