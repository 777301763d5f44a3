use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use learnsy_core::model::{
    Feature, Plan, PlanInfo, Subscription, SubscriptionStatus, UserId,
};
use storage::repository::{Storage, SubscriptionRepository};

use crate::Clock;
use crate::access::AccessGuard;
use crate::error::SubscriptionServiceError;

/// A subscription as observed now, with lapsed plans already degraded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub plan: Plan,
    pub effective_plan: Plan,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub features: Vec<Feature>,
}

impl SubscriptionView {
    #[must_use]
    pub fn at(subscription: &Subscription, now: DateTime<Utc>) -> Self {
        let effective = subscription.effective_plan(now);
        Self {
            plan: subscription.plan(),
            effective_plan: effective,
            status: subscription.status_at(now),
            started_at: subscription.started_at(),
            expires_at: subscription.expires_at(),
            auto_renew: subscription.auto_renew(),
            features: effective.features().to_vec(),
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionService {
    clock: Clock,
    subscriptions: Arc<dyn SubscriptionRepository>,
    guard: AccessGuard,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            subscriptions: Arc::clone(&storage.subscriptions),
            guard: AccessGuard::new(clock, storage),
        }
    }

    /// The plan catalogue, cheapest first.
    #[must_use]
    pub fn plans(&self) -> Vec<PlanInfo> {
        Plan::ALL.iter().map(|p| p.info()).collect()
    }

    /// # Errors
    ///
    /// Returns `SubscriptionServiceError::Storage` if repository access fails.
    pub async fn current(&self, user: UserId) -> Result<SubscriptionView, SubscriptionServiceError> {
        let subscription = self.guard.subscription(user).await?;
        Ok(SubscriptionView::at(&subscription, self.clock.now()))
    }

    /// Stop auto-renewal; paid features stay until the period ends.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::NothingToCancel` on the free plan.
    pub async fn cancel(&self, user: UserId) -> Result<SubscriptionView, SubscriptionServiceError> {
        let now = self.clock.now();
        let mut subscription = self.guard.subscription(user).await?;
        subscription.cancel(now)?;
        self.subscriptions.save_subscription(&subscription).await?;
        info!(user = %user, plan = %subscription.plan(), "cancelled subscription");
        Ok(SubscriptionView::at(&subscription, now))
    }

    /// # Errors
    ///
    /// Returns `AccessError::PlanRequired` when the feature is not included.
    pub async fn check_feature(
        &self,
        user: UserId,
        feature: Feature,
    ) -> Result<(), SubscriptionServiceError> {
        self.guard.require_feature(user, feature).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::test_support::{actor, clock, set_plan};
    use chrono::Duration;
    use learnsy_core::model::{Role, SubscriptionError};

    #[tokio::test]
    async fn current_creates_free_subscription() {
        let storage = Storage::in_memory();
        let user = actor(&storage, "s@example.com", Role::Student).await;
        let service = SubscriptionService::new(clock(), &storage);

        let view = service.current(user.id).await.unwrap();
        assert_eq!(view.plan, Plan::Free);
        assert!(view.features.is_empty());
        assert!(storage.subscriptions.get_subscription(user.id).await.unwrap().is_some());

        assert!(matches!(
            service.cancel(user.id).await,
            Err(SubscriptionServiceError::Subscription(SubscriptionError::NothingToCancel))
        ));
        assert_eq!(service.plans().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_plan_keeps_features_until_expiry() {
        let storage = Storage::in_memory();
        let user = actor(&storage, "s@example.com", Role::Student).await;
        set_plan(&storage, user.id, Plan::Premium).await;
        let service = SubscriptionService::new(clock(), &storage);

        let view = service.cancel(user.id).await.unwrap();
        assert_eq!(view.status, SubscriptionStatus::Cancelled);
        assert!(!view.auto_renew);
        service.check_feature(user.id, Feature::AiSummary).await.unwrap();

        let later = SubscriptionService::new(clock().advanced(Duration::days(31)), &storage);
        let view = later.current(user.id).await.unwrap();
        assert_eq!(view.effective_plan, Plan::Free);
        assert!(matches!(
            later.check_feature(user.id, Feature::AiSummary).await,
            Err(SubscriptionServiceError::Access(AccessError::PlanRequired(Feature::AiSummary)))
        ));
    }
}
