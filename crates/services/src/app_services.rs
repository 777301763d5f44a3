use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use storage::repository::Storage;
use tracing::info;

use learnsy_core::model::DEFAULT_PAYMENT_TTL_MINUTES;

use crate::Clock;
use crate::ai_summary::{AiSummaryService, DEFAULT_AI_DELAY};
use crate::auth::{AuthService, DEFAULT_TOKEN_TTL_HOURS, TokenService};
use crate::courses::CourseService;
use crate::dashboards::DashboardService;
use crate::enrollments::EnrollmentService;
use crate::error::AppServicesError;
use crate::materials::MaterialService;
use crate::payments::PaymentService;
use crate::progress::ProgressService;
use crate::quizzes::QuizService;
use crate::study_sessions::StudySessionService;
use crate::subscriptions::SubscriptionService;

/// Knobs the binary passes down to the services.
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub upload_dir: PathBuf,
    pub ai_delay: StdDuration,
    pub payment_ttl: Duration,
}

impl ServicesConfig {
    #[must_use]
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
            upload_dir: PathBuf::from("uploads"),
            ai_delay: DEFAULT_AI_DELAY,
            payment_ttl: Duration::minutes(DEFAULT_PAYMENT_TTL_MINUTES),
        }
    }
}

/// Assembles every service over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    tokens: TokenService,
    auth: Arc<AuthService>,
    courses: Arc<CourseService>,
    enrollments: Arc<EnrollmentService>,
    materials: Arc<MaterialService>,
    quizzes: Arc<QuizService>,
    progress: Arc<ProgressService>,
    study_sessions: Arc<StudySessionService>,
    dashboards: Arc<DashboardService>,
    subscriptions: Arc<SubscriptionService>,
    payments: Arc<PaymentService>,
    ai_summary: Arc<AiSummaryService>,
}

impl AppServices {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage, config: &ServicesConfig) -> Self {
        let tokens = TokenService::new(clock, config.jwt_secret.as_bytes(), config.token_ttl);
        Self {
            auth: Arc::new(AuthService::new(
                clock,
                Arc::clone(&storage.users),
                Arc::clone(&storage.subscriptions),
                tokens.clone(),
            )),
            tokens,
            courses: Arc::new(CourseService::new(clock, storage)),
            enrollments: Arc::new(EnrollmentService::new(clock, storage)),
            materials: Arc::new(MaterialService::new(clock, storage, config.upload_dir.clone())),
            quizzes: Arc::new(QuizService::new(clock, storage)),
            progress: Arc::new(ProgressService::new(clock, storage)),
            study_sessions: Arc::new(StudySessionService::new(clock, storage)),
            dashboards: Arc::new(DashboardService::new(clock, storage)),
            subscriptions: Arc::new(SubscriptionService::new(clock, storage)),
            payments: Arc::new(PaymentService::with_ttl(clock, storage, config.payment_ttl)),
            ai_summary: Arc::new(AiSummaryService::new(clock, storage, config.ai_delay)),
        }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails or the
    /// upload directory cannot be created.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: &ServicesConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        tokio::fs::create_dir_all(&config.upload_dir).await?;
        info!(upload_dir = %config.upload_dir.display(), "storage ready");
        Ok(Self::new(clock, &storage, config))
    }

    #[must_use]
    pub fn in_memory(clock: Clock, config: &ServicesConfig) -> Self {
        Self::new(clock, &Storage::in_memory(), config)
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn auth(&self) -> Arc<AuthService> {
        Arc::clone(&self.auth)
    }

    #[must_use]
    pub fn courses(&self) -> Arc<CourseService> {
        Arc::clone(&self.courses)
    }

    #[must_use]
    pub fn enrollments(&self) -> Arc<EnrollmentService> {
        Arc::clone(&self.enrollments)
    }

    #[must_use]
    pub fn materials(&self) -> Arc<MaterialService> {
        Arc::clone(&self.materials)
    }

    #[must_use]
    pub fn quizzes(&self) -> Arc<QuizService> {
        Arc::clone(&self.quizzes)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn study_sessions(&self) -> Arc<StudySessionService> {
        Arc::clone(&self.study_sessions)
    }

    #[must_use]
    pub fn dashboards(&self) -> Arc<DashboardService> {
        Arc::clone(&self.dashboards)
    }

    #[must_use]
    pub fn subscriptions(&self) -> Arc<SubscriptionService> {
        Arc::clone(&self.subscriptions)
    }

    #[must_use]
    pub fn payments(&self) -> Arc<PaymentService> {
        Arc::clone(&self.payments)
    }

    #[must_use]
    pub fn ai_summary(&self) -> Arc<AiSummaryService> {
        Arc::clone(&self.ai_summary)
    }
}
