use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::Span;

use crate::{contracts::StoreError, erasure::ErasureError, error::Error as RenterError};

#[derive(ThisError, Debug)]
pub enum HttpError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl HttpError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn renter_status(err: &RenterError) -> StatusCode {
    match err {
        RenterError::FileNotFound(_) | RenterError::Store(StoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        RenterError::Settings(_)
        | RenterError::NoAllowance
        | RenterError::FileExists(_)
        | RenterError::InvalidRange { .. }
        | RenterError::InvalidHistoryRange
        | RenterError::Erasure(ErasureError::InvalidParams { .. }) => StatusCode::BAD_REQUEST,
        RenterError::Unrecoverable { .. } | RenterError::NoContracts => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct Error(anyhow::Error);

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = if let Some(http_error) = self.0.downcast_ref::<HttpError>() {
            http_error.status_code()
        } else if let Some(renter_error) = self.0.downcast_ref::<RenterError>() {
            renter_status(renter_error)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let message = self.0.to_string();
        Span::current().record("error", message.clone());
        let error_response = Json(ErrorResponse { error: message });
        (status, error_response).into_response()
    }
}
