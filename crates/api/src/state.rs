use axum::http::HeaderValue;
use chrono::{DateTime, Utc};

use services::AppServices;

/// HTTP-level settings that do not belong to any service.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub max_upload_bytes: usize,
    /// `None` allows any origin.
    pub cors_origin: Option<HeaderValue>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            cors_origin: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: AppServices,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(services: AppServices) -> Self {
        Self {
            services,
            started_at: Utc::now(),
        }
    }
}
