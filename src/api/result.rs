use axum::{Json, response::IntoResponse};
use serde::{Deserialize, Serialize};

use super::error::Error;

/// JSON envelope of every renter API reply: `{"result": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse<T> {
    pub result: T,
}

impl<T> ResultResponse<T> {
    pub fn into_inner(self) -> T {
        self.result
    }
}

#[derive(Debug)]
pub struct Response<T: Serialize>(pub Json<ResultResponse<T>>);

impl<T: Serialize> IntoResponse for Response<T> {
    fn into_response(self) -> axum::response::Response {
        self.0.into_response()
    }
}

impl<T: Serialize> From<T> for Response<T> {
    fn from(value: T) -> Self {
        Response(Json(ResultResponse { result: value }))
    }
}

pub type Result<T> = std::result::Result<Response<T>, Error>;

/// Replies whose body is file data rather than a JSON envelope.
pub type RawResult<T> = std::result::Result<T, Error>;
