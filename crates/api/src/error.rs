//! Mapping of service failures onto HTTP responses.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use services::{
    AccessError, AiSummaryError, AuthError, CourseServiceError, DashboardError, EnrollmentError,
    MaterialServiceError, PaymentServiceError, ProgressServiceError, QuizServiceError,
    StudySessionError, SubscriptionServiceError, TokenError,
};
use storage::repository::StorageError;

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// Logged in full, answered with a generic message.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl ToString) -> Self {
        Self::BadRequest(message.to_string())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Internal(detail) => {
                error!(%detail, "request failed");
                INTERNAL_MESSAGE.to_owned()
            }
            ApiError::BadRequest(m)
            | ApiError::Unauthorized(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m) => m,
        };
        let body = Json(json!({
            "success": false,
            "message": message,
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound(_) => Self::NotFound(capitalize(&err.to_string())),
            _ => Self::Forbidden(capitalize(&err.to_string())),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::NotFound("Resource not found".into()),
            StorageError::Conflict => {
                Self::BadRequest("Request conflicts with the current state".into())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => Self::Unauthorized("Invalid token".into()),
            TokenError::Expired => Self::Unauthorized("Token expired".into()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(format!("Malformed upload: {}", err.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        debug!(status = %err.status(), "rejected request body");
        Self::BadRequest(format!("Invalid request body: {}", err.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(err: PathRejection) -> Self {
        match err {
            PathRejection::FailedToDeserializePathParams(e) => {
                Self::BadRequest(format!("Invalid path parameter: {}", e.body_text()))
            }
            other => Self::Internal(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(err: QueryRejection) -> Self {
        Self::BadRequest(format!("Invalid query string: {}", err.body_text()))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::EmailTaken => Self::BadRequest("Email is already registered".into()),
            AuthError::InvalidCredentials => {
                Self::Unauthorized("Invalid email or password".into())
            }
            AuthError::User(e) => Self::bad_request(capitalize(&e.to_string())),
            AuthError::Token(e) => e.into(),
            AuthError::Access(e) => e.into(),
            AuthError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CourseServiceError> for ApiError {
    fn from(err: CourseServiceError) -> Self {
        match err {
            CourseServiceError::Course(e) => Self::bad_request(capitalize(&e.to_string())),
            CourseServiceError::Access(e) => e.into(),
            CourseServiceError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(err: EnrollmentError) -> Self {
        match err {
            EnrollmentError::AlreadyEnrolled | EnrollmentError::NotPublished => {
                Self::bad_request(capitalize(&err.to_string()))
            }
            EnrollmentError::Access(e) => e.into(),
            EnrollmentError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<MaterialServiceError> for ApiError {
    fn from(err: MaterialServiceError) -> Self {
        match err {
            MaterialServiceError::NoFile => Self::NotFound("Material has no downloadable file".into()),
            MaterialServiceError::Material(e) => Self::bad_request(capitalize(&e.to_string())),
            MaterialServiceError::Access(e) => e.into(),
            MaterialServiceError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<QuizServiceError> for ApiError {
    fn from(err: QuizServiceError) -> Self {
        match err {
            QuizServiceError::Quiz(e) => Self::bad_request(capitalize(&e.to_string())),
            QuizServiceError::Access(e) => e.into(),
            QuizServiceError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ProgressServiceError> for ApiError {
    fn from(err: ProgressServiceError) -> Self {
        match err {
            ProgressServiceError::Course(e) => Self::bad_request(capitalize(&e.to_string())),
            ProgressServiceError::Access(e) => e.into(),
            ProgressServiceError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StudySessionError> for ApiError {
    fn from(err: StudySessionError) -> Self {
        match err {
            StudySessionError::Session(e) => Self::bad_request(capitalize(&e.to_string())),
            StudySessionError::Access(e) => e.into(),
            StudySessionError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        match err {
            DashboardError::Access(e) => e.into(),
            DashboardError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<SubscriptionServiceError> for ApiError {
    fn from(err: SubscriptionServiceError) -> Self {
        match err {
            SubscriptionServiceError::Subscription(e) => {
                Self::bad_request(capitalize(&e.to_string()))
            }
            SubscriptionServiceError::Access(e) => e.into(),
            SubscriptionServiceError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<PaymentServiceError> for ApiError {
    fn from(err: PaymentServiceError) -> Self {
        match err {
            PaymentServiceError::Payment(e) => Self::bad_request(capitalize(&e.to_string())),
            PaymentServiceError::Subscription(e) => Self::bad_request(capitalize(&e.to_string())),
            PaymentServiceError::Access(e) => e.into(),
            PaymentServiceError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AiSummaryError> for ApiError {
    fn from(err: AiSummaryError) -> Self {
        match err {
            AiSummaryError::Access(e) => e.into(),
            AiSummaryError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnsy_core::model::{Feature, Role};

    #[test]
    fn access_errors_map_to_forbidden_or_not_found() {
        assert_eq!(
            ApiError::from(AccessError::NotFound("course")).status(),
            StatusCode::NOT_FOUND
        );
        for err in [
            AccessError::NotOwner,
            AccessError::NotEnrolled,
            AccessError::WrongRole(Role::Faculty),
            AccessError::PlanRequired(Feature::AiSummary),
        ] {
            assert_eq!(ApiError::from(err).status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn duplicates_are_bad_requests() {
        assert_eq!(
            ApiError::from(EnrollmentError::AlreadyEnrolled).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AuthError::EmailTaken).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(TokenError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn stale_writes_are_bad_requests() {
        let err = ApiError::from(StorageError::Conflict);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Request conflicts with the current state");
    }

    #[test]
    fn storage_failures_are_masked() {
        let err = ApiError::from(StorageError::Connection("pool timed out".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(capitalize("course not found"), "Course not found");
    }
}
