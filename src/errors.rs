//! Error handling
//!
//! [`CoreError`] is the typed taxonomy: the HTTP and worker layers match on
//! it to decide status codes / ack-vs-log behavior. Anything that doesn't fit
//! a named variant is wrapped in [`AppError`], which renders as a 500 and
//! logs the full chain.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown project {owner}/{name}")]
    UnknownProject { owner: String, name: String },

    #[error("unknown job {0:?}")]
    UnknownJob(String),

    #[error("git operation failed for {owner}/{name}: {source}")]
    GitFetchError {
        owner: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("event bus unavailable: {0}")]
    BusUnavailable(anyhow::Error),

    #[error("provider API call failed: {0}")]
    ProviderApiError(anyhow::Error),
}

impl CoreError {
    /// The HTTP status an ingest endpoint should return for this error, if it
    /// maps to one (otherwise fall through to the generic `AppError`
    /// handling).
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            CoreError::UnknownProject { .. } | CoreError::UnknownJob(_) => {
                Some(StatusCode::NOT_FOUND)
            }
            CoreError::BusUnavailable(_) => Some(StatusCode::SERVICE_UNAVAILABLE),
            CoreError::GitFetchError { .. } | CoreError::ProviderApiError(_) => None,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::warn!("{:?}", &self);
        (status, self.to_string()).into_response()
    }
}

/// Catch-all for the HTTP boundary: anything that isn't one of the named
/// [`CoreError`] variants, rendered as a 500 with the full chain logged.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("{:?}", &self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

/// The error type HTTP handlers actually return: a named [`CoreError`] where
/// one applies (a 404 on unknown project/job, a 503 specifically for
/// `bus::enqueue` failures) and [`AppError`]'s generic 500 for everything
/// else a `?` can surface (failed connections, bad queries, git/provider
/// errors not worth a dedicated status). `?` picks the right arm on its own:
/// `anyhow::Error` (what the db/git/provider layers return) converts to
/// `App`, a `CoreError` constructed at a lookup site converts to `Core`.
#[derive(Debug)]
pub enum HandlerError {
    Core(CoreError),
    App(AppError),
}

impl From<CoreError> for HandlerError {
    fn from(err: CoreError) -> Self {
        HandlerError::Core(err)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::App(AppError(err))
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Core(err) => err.into_response(),
            HandlerError::App(err) => err.into_response(),
        }
    }
}
