use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by the relay.
///
/// The `Display` text of the signaling variants is sent verbatim as the
/// `reason` of a failure reply.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Username is already taken. Try different one.")]
    NameTaken(String),

    #[error("Name must not be empty.")]
    EmptyName,

    #[error("Already logged in as '{0}'.")]
    AlreadyLoggedIn(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Unknown action '{0}'.")]
    UnknownAction(String),

    #[error("Too many connections (max {0})")]
    TooManyConnections(usize),

    #[error("Relay is shutting down")]
    Unavailable,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::TooManyConnections(_) | RelayError::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RelayError::NotLoggedIn => StatusCode::UNAUTHORIZED,
            RelayError::NameTaken(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
