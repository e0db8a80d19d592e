//! RFC 7807 problem responses.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::deployment::DeploymentError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://riser.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
            retryable: false,
        }
    }

    fn set_request_id(&mut self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.request_id = request_id.clone();
        if self.instance.is_none() {
            self.instance = Some(request_id);
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.set_request_id(request_id);
        self
    }

    pub fn retryable(mut self) -> Self {
        self.problem.retryable = true;
        self
    }

    /// Map an orchestration error to a response.
    ///
    /// Validation errors and conflicts carry their message; infrastructure
    /// failures are logged and answered with a generic 500.
    pub fn from_deployment(err: DeploymentError, request_id: &str) -> Self {
        let api_error = match &err {
            DeploymentError::InvalidRequest { .. } => {
                Self::bad_request("invalid_request", err.to_string())
            }
            DeploymentError::NameAlreadyReserved { .. } => {
                Self::conflict("name_already_reserved", err.to_string())
            }
            DeploymentError::DeploymentNotFound { .. } => {
                Self::not_found("deployment_not_found", err.to_string())
            }
            _ if err.is_conflict() => Self::conflict("conflict", err.to_string()).retryable(),
            _ => {
                tracing::error!(
                    error = %err,
                    request_id = %request_id,
                    "Deployment request failed"
                );
                Self::internal("internal_error", "Internal server error")
            }
        };
        api_error.with_request_id(request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use riser_state_repo::StateRepoError;

    use super::*;
    use crate::db::DbError;

    #[test]
    fn test_validation_errors_keep_their_message() {
        let err = ApiError::from_deployment(
            DeploymentError::DeploymentNotFound {
                name: "myapp".to_string(),
                namespace: "apps".to_string(),
                stage: "dev".to_string(),
            },
            "req-1",
        );
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.problem.detail.contains("myapp"));
        assert_eq!(err.problem.request_id, "req-1");
        assert!(!err.problem.retryable);
    }

    #[test]
    fn test_push_rejected_is_retryable_conflict() {
        let err = ApiError::from_deployment(
            DeploymentError::Commit {
                name: "myapp".to_string(),
                stage: "dev".to_string(),
                source: StateRepoError::PushRejected {
                    branch: "main".to_string(),
                    stderr: "[rejected]".to_string(),
                },
            },
            "req-2",
        );
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(err.problem.retryable);
    }

    #[test]
    fn test_infrastructure_errors_hide_details() {
        let err = ApiError::from_deployment(
            DeploymentError::Reservation(DbError::Unavailable("secret host down".to_string())),
            "req-3",
        );
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.problem.detail, "Internal server error");
    }

    #[test]
    fn test_problem_json_content_type() {
        let response = ApiError::bad_request("invalid_request", "bad").into_response();
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
