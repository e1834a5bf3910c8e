//! HTTP mapping for `BridgeError`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use hermes_core::error::{BridgeError, ClientCode};

/// Handler error: renders `{status: "error", error: CODE, message}`.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.client_code() {
            ClientCode::RateLimited | ClientCode::QuietHoursBlocked => StatusCode::TOO_MANY_REQUESTS,
            ClientCode::PriorityNotAllowed => StatusCode::FORBIDDEN,
            ClientCode::UnknownTarget => StatusCode::NOT_FOUND,
            ClientCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ClientCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ClientCode::Upstream | ClientCode::DeliveryFailed => StatusCode::BAD_GATEWAY,
            ClientCode::BadRequest => StatusCode::BAD_REQUEST,
            ClientCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        Self(BridgeError::BadRequest(r.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(r: QueryRejection) -> Self {
        Self(BridgeError::BadRequest(r.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let body = json!({
            "status": "error",
            "error": self.0.client_code().as_str(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
