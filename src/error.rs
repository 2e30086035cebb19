use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::core::analysis::AnalysisError;
use crate::core::feed::FeedError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("missing required query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Feed(error) => error.kind(),
            ApiError::Analysis(error) => error.kind(),
            ApiError::MissingParameter(_) => "InvalidURL",
            ApiError::InvalidBody(_) => "InvalidArgument",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Feed(FeedError::InvalidUrl(_)) | ApiError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::Feed(FeedError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Feed(FeedError::Unreachable(_) | FeedError::MalformedFeed(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Analysis(AnalysisError::InvalidArgument(_)) | ApiError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Analysis(AnalysisError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if status.is_server_error() {
            error!(kind, status = status.as_u16(), "{self}");
        } else {
            warn!(kind, status = status.as_u16(), "{self}");
        }

        let payload = Json(json!({"error": self.to_string(), "kind": kind}));
        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn maps_errors_to_status_codes() {
        let cases = [
            (ApiError::from(FeedError::InvalidUrl("x".to_string())), 400, "InvalidURL"),
            (ApiError::MissingParameter("url"), 400, "InvalidURL"),
            (ApiError::from(FeedError::Timeout(Duration::from_secs(30))), 504, "Timeout"),
            (ApiError::from(FeedError::Unreachable("dns".to_string())), 502, "Unreachable"),
            (ApiError::from(FeedError::MalformedFeed("html".to_string())), 502, "MalformedFeed"),
            (
                ApiError::from(AnalysisError::InvalidArgument("count".to_string())),
                400,
                "InvalidArgument",
            ),
            (ApiError::from(AnalysisError::Internal("panic".to_string())), 500, "Internal"),
        ];
        for (error, status, kind) in cases {
            assert_eq!(error.status().as_u16(), status, "{error}");
            assert_eq!(error.kind(), kind);
        }
    }
}
