use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sna_gateway_core::{GatewayError, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::Gateway(GatewayError::InvalidRequest(_) | GatewayError::Decode(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (code, Json(Status::error(self.to_string()))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
