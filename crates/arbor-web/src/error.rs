use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use arbor_core::ArborError;

#[expect(
    clippy::needless_pass_by_value,
    reason = "handlers naturally own error values from `Result` and pass them through"
)]
pub fn arbor_error_response(err: ArborError, operation: &str, path: Option<String>) -> Response {
    let status = status_for_arbor_error(&err);
    if status.is_server_error() {
        tracing::warn!(
            target: "arbor::web",
            operation,
            code = err.code(),
            error = %err,
            "request failed"
        );
    }
    let payload = err.to_payload(operation.to_string(), path);
    (status, Json(payload)).into_response()
}

fn status_for_arbor_error(err: &ArborError) -> StatusCode {
    if err.is_transient() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match err {
        ArborError::InvalidPath(_) | ArborError::Validation(_) => StatusCode::BAD_REQUEST,
        ArborError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ArborError::NotFound(_) => StatusCode::NOT_FOUND,
        ArborError::Conflict(_) | ArborError::RevisionConflict(_) => StatusCode::CONFLICT,
        ArborError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        ArborError::OperationFailed(_)
        | ArborError::Io(_)
        | ArborError::Json(_)
        | ArborError::Sqlite(_)
        | ArborError::Http(_)
        | ArborError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status() {
        let cases = [
            (ArborError::InvalidPath("x".into()), StatusCode::BAD_REQUEST),
            (ArborError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ArborError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ArborError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (ArborError::Conflict("x".into()), StatusCode::CONFLICT),
            (ArborError::Transient("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                ArborError::OperationFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ArborError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for_arbor_error(&err), expected, "{err}");
        }
    }
}
