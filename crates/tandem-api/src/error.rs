use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;

use tandem_sync::SyncError;
use tandem_types::api::ErrorResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not allowed for this account")]
    Forbidden,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(e) => match e {
                SyncError::Authentication => StatusCode::UNAUTHORIZED,
                SyncError::Network(_) => StatusCode::BAD_GATEWAY,
                SyncError::Validation(_) => StatusCode::BAD_REQUEST,
                SyncError::NotFound(_) => StatusCode::NOT_FOUND,
                SyncError::Forbidden(_) => StatusCode::FORBIDDEN,
                SyncError::Conflict(_) => StatusCode::CONFLICT,
            },
            ApiError::Internal(e) => {
                warn!("Internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_errors_map_to_statuses() {
        let cases = [
            (ApiError::from(SyncError::Validation("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(SyncError::NotFound("x".into())), StatusCode::NOT_FOUND),
            (ApiError::from(SyncError::Forbidden("x".into())), StatusCode::FORBIDDEN),
            (ApiError::from(SyncError::Conflict("x".into())), StatusCode::CONFLICT),
            (ApiError::from(SyncError::Network(anyhow::anyhow!("down"))), StatusCode::BAD_GATEWAY),
            (ApiError::from(SyncError::Authentication), StatusCode::UNAUTHORIZED),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
