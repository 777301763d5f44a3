#![forbid(unsafe_code)]

pub mod access;
pub mod ai_summary;
pub mod app_services;
pub mod auth;
pub mod courses;
pub mod dashboards;
pub mod enrollments;
pub mod error;
pub mod materials;
pub mod payments;
pub mod progress;
pub mod quizzes;
pub mod study_sessions;
pub mod subscriptions;

#[cfg(test)]
mod test_support;

pub use learnsy_core::Clock;

pub use access::{Actor, CourseAccess};
pub use ai_summary::{AiSummaryService, MaterialSummary};
pub use app_services::{AppServices, ServicesConfig};
pub use auth::{AuthService, AuthSession, Claims, TokenService};
pub use courses::CourseService;
pub use dashboards::{CourseAnalytics, DashboardService, FacultyDashboard, StudentDashboard};
pub use enrollments::{CourseStudent, EnrolledCourse, EnrollmentService};
pub use error::{
    AccessError, AiSummaryError, AppServicesError, AuthError, CourseServiceError,
    DashboardError, EnrollmentError, MaterialServiceError, PaymentServiceError,
    ProgressServiceError, QuizServiceError, StudySessionError, SubscriptionServiceError,
    TokenError,
};
pub use materials::{
    CompletionToggle, MaterialFile, MaterialService, MaterialUpload, MaterialView,
    NewMaterialSource,
};
pub use payments::{PaymentConfirmation, PaymentService};
pub use progress::{CourseProgress, LessonCompletion, ProgressService};
pub use quizzes::{AttemptResult, QuizService, QuizView};
pub use study_sessions::{EndedSession, SessionStats, StudySessionService};
pub use subscriptions::{SubscriptionService, SubscriptionView};
