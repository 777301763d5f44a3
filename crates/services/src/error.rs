//! Shared error types for the services crate.

use std::future::Future;

use thiserror::Error;
use tracing::debug;

use learnsy_core::model::{
    CourseError, Feature, MaterialError, PaymentError, QuizError, Role, SessionStateError,
    SubscriptionError, UserError,
};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Authorization failures shared by every service.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("only the owner can do this")]
    NotOwner,
    #[error("you are not enrolled in this course")]
    NotEnrolled,
    #[error("this action requires the {0} role")]
    WrongRole(Role),
    #[error("your plan does not include {0}")]
    PlanRequired(Feature),
}

/// Result of loading something that the caller must be allowed to see.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LookupError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Routes `LookupError` into a service error's `Access`/`Storage` variants.
macro_rules! from_lookup {
    ($($target:ty),+ $(,)?) => {
        $(
            impl From<LookupError> for $target {
                fn from(err: LookupError) -> Self {
                    match err {
                        LookupError::Access(e) => Self::Access(e),
                        LookupError::Storage(e) => Self::Storage(e),
                    }
                }
            }
        )+
    };
}

/// Flags errors caused by a write racing another write to the same record.
pub(crate) trait WriteConflict {
    fn is_write_conflict(&self) -> bool;
}

macro_rules! write_conflict {
    ($($target:ty),+ $(,)?) => {
        $(
            impl WriteConflict for $target {
                fn is_write_conflict(&self) -> bool {
                    matches!(self, Self::Storage(StorageError::Conflict))
                }
            }
        )+
    };
}

/// Attempts made at a read-modify-write before a conflict is returned.
pub(crate) const WRITE_ATTEMPTS: usize = 3;

/// Run `op` again, from a fresh read, while the store rejects its write as stale.
pub(crate) async fn retry_on_conflict<T, E, F, Fut>(mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: WriteConflict,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_write_conflict() && attempt < WRITE_ATTEMPTS => {
                debug!(attempt, "concurrent write, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Errors emitted while issuing or verifying access tokens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenError {
    #[error("token is invalid")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token could not be signed: {0}")]
    Signing(String),
}

/// Errors emitted by `AuthService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `CourseService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CourseServiceError {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `EnrollmentService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnrollmentError {
    #[error("already enrolled in this course")]
    AlreadyEnrolled,
    #[error("course is not open for enrollment")]
    NotPublished,
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `MaterialService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MaterialServiceError {
    #[error("material has no downloadable file")]
    NoFile,
    #[error(transparent)]
    Material(#[from] MaterialError),
    #[error("file storage failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `QuizService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizServiceError {
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `StudySessionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StudySessionError {
    #[error(transparent)]
    Session(#[from] SessionStateError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `DashboardService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DashboardError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SubscriptionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubscriptionServiceError {
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `PaymentService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PaymentServiceError {
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `AiSummaryService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AiSummaryError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

from_lookup!(
    AuthError,
    CourseServiceError,
    EnrollmentError,
    MaterialServiceError,
    QuizServiceError,
    ProgressServiceError,
    StudySessionError,
    DashboardError,
    SubscriptionServiceError,
    PaymentServiceError,
    AiSummaryError,
);

write_conflict!(
    CourseServiceError,
    EnrollmentError,
    MaterialServiceError,
    QuizServiceError,
    ProgressServiceError,
    StudySessionError,
);

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("upload directory unavailable: {0}")]
    UploadDir(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn conflicts_are_retried_a_bounded_number_of_times() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), ProgressServiceError> = retry_on_conflict(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Conflict.into())
        })
        .await;
        assert!(matches!(
            result,
            Err(ProgressServiceError::Storage(StorageError::Conflict))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), WRITE_ATTEMPTS);

        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<usize, ProgressServiceError> = retry_on_conflict(move || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(StorageError::Conflict.into()),
                n => Ok(n),
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), ProgressServiceError> = retry_on_conflict(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AccessError::NotEnrolled.into())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
