//! HTTP handlers grouped by resource.

mod ai;
mod auth;
mod courses;
mod dashboards;
mod enrollments;
mod health;
mod materials;
mod payments;
mod progress;
mod quizzes;
mod study_sessions;
mod subscriptions;

pub use ai::ai_routes;
pub use auth::auth_routes;
pub use courses::course_routes;
pub use dashboards::dashboard_routes;
pub use enrollments::enrollment_routes;
pub use health::health_routes;
pub use materials::material_routes;
pub use payments::payment_routes;
pub use progress::progress_routes;
pub use quizzes::quiz_routes;
pub use study_sessions::study_session_routes;
pub use subscriptions::subscription_routes;
