use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engine::EngineError;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The backend could not be reached or answered with a failure. Local
    /// state has not been touched.
    #[error("backend: {0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self { ApiError::Backend(e) }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::UnknownOperation(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::AlreadyClosed(_)) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::PriceUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(_) => StatusCode::BAD_REQUEST,
            ApiError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() { warn!(target: "dashboard", "{self}"); }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(EngineError::UnknownOperation(1)).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(EngineError::AlreadyClosed(1)).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::from(EngineError::InvalidInput("volume")).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(EngineError::PriceUnavailable("BTCUSDT".into())).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::from(anyhow::anyhow!("timeout")).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_response_status() {
        let resp = ApiError::from(anyhow::anyhow!("down")).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
