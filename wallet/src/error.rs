use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dcrbridge::BridgeError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Bridge(err) => match err {
                BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
                BridgeError::InvalidInput(_)
                | BridgeError::InsufficientFunds { .. }
                | BridgeError::NoInputsSelected
                | BridgeError::MalformedTransaction(_) => StatusCode::BAD_REQUEST,
                BridgeError::StaleState(_) | BridgeError::SyncInProgress | BridgeError::NotSynced => {
                    StatusCode::CONFLICT
                }
                BridgeError::Transport { .. } | BridgeError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                BridgeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
