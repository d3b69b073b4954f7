use crate::api::extractor::Json;
use aide::OperationIo;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::MultipartRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use error_set::error_set;
use schemars::JsonSchema;
use tone_system::AnalysisError;

error_set! {
    #[derive(OperationIo)]
    ApiError = {
        #[display("Internal error, please submit a bug report: {0}")]
        Other(eyre::Error),
        #[display("Expected a multipart/form-data upload: {source}")]
        Multipart {
            source: MultipartRejection
        },
        #[display("Malformed multipart upload: {source}")]
        MultipartField {
            source: MultipartError
        },
        #[display("The upload has no 'audio' field")]
        MissingAudio,
        #[display("{0}")]
        Analysis(AnalysisError),
    };
}

/// Body of every error response.
#[derive(serde::Serialize, serde::Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct ApiResponseError {
    pub error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Multipart { .. } | ApiError::MultipartField { .. } | ApiError::MissingAudio => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Analysis(e) => match e {
                AnalysisError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
                AnalysisError::AudioTooQuiet
                | AnalysisError::EmptyPayload
                | AnalysisError::Undecodable { .. }
                | AnalysisError::TranscodedUnreadable { .. }
                | AnalysisError::Unprocessable { .. } => StatusCode::BAD_REQUEST,
                AnalysisError::Staging(_) | AnalysisError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = ?self, "Internal error occurred");
        } else {
            tracing::debug!(error = %self, "Rejected request");
        }

        let response = ApiResponseError { error: self.to_string() };

        (status, Json(response)).into_response()
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(value: MultipartRejection) -> Self {
        ApiError::Multipart { source: value }
    }
}

impl From<MultipartError> for ApiError {
    fn from(value: MultipartError) -> Self {
        ApiError::MultipartField { source: value }
    }
}
