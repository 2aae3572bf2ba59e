use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid room path {0:?}")]
    InvalidRoomPath(String),

    #[error("room {0:?} does not exist")]
    RoomNotFound(String),

    #[error("parent room of {0:?} does not exist")]
    ParentNotFound(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handler-facing wrapper. Anything `Into<anyhow::Error>` converts, and the
/// domain errors above map to proper status codes on the way out.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::InvalidRoomPath(_) | Error::Malformed(_)) => StatusCode::BAD_REQUEST,
            Some(Error::RoomNotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::ParentNotFound(_)) => StatusCode::CONFLICT,
            Some(Error::Store(StoreError::NotFound)) => StatusCode::NOT_FOUND,
            Some(Error::Store(StoreError::Unavailable(_))) => StatusCode::SERVICE_UNAVAILABLE,
            None => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("{}\n\n{}", self.0, self.0.backtrace()),
                )
                    .into_response();
            }
        };

        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
