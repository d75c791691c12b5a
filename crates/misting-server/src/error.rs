use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use misting_core::error::MistError;

/// Seconds a client should wait before retrying a retryable failure.
const RETRY_AFTER_SECS: &str = "1";

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(MistError::Validation(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(MistError::NotFound(msg.into()).into())
    }
}

fn status_for(err: &MistError) -> StatusCode {
    match err {
        MistError::NotFound(_) => StatusCode::NOT_FOUND,
        MistError::Validation(_) => StatusCode::BAD_REQUEST,
        MistError::StoreUnavailable(_)
        | MistError::ActuationQueueFull
        | MistError::ActuatorStopped => StatusCode::SERVICE_UNAVAILABLE,
        MistError::HardwareWrite { .. }
        | MistError::Sensor(_)
        | MistError::Audit(_)
        | MistError::Config(_)
        | MistError::Io(_)
        | MistError::Yaml(_)
        | MistError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mist = self.0.downcast_ref::<MistError>();
        let status = mist.map(status_for).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        let mut response = (status, axum::Json(body)).into_response();
        if mist.is_some_and(MistError::is_retryable) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        response
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = AppError(MistError::NotFound("pin 99".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_maps_to_400() {
        let response = AppError::bad_request("pin must be an integer").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_unavailable_maps_to_503_with_retry_after() {
        let err = AppError(MistError::StoreUnavailable("timed out".into()).into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            RETRY_AFTER_SECS
        );
    }

    #[test]
    fn queue_full_maps_to_503_with_retry_after() {
        let response = AppError(MistError::ActuationQueueFull.into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            RETRY_AFTER_SECS
        );
    }

    #[test]
    fn stopped_worker_maps_to_503() {
        let response = AppError(MistError::ActuatorStopped.into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn hardware_error_maps_to_500() {
        let err = AppError(
            MistError::HardwareWrite {
                pin: 6,
                reason: "EBUSY".into(),
            }
            .into(),
        );
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn foreign_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError::not_found("pin 3").into_response();
        let ct = response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
