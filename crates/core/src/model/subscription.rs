use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::UserId;
use crate::model::material::MaterialKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubscriptionError {
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("unknown subscription status: {0}")]
    UnknownStatus(String),

    #[error("the free plan cannot be cancelled")]
    NothingToCancel,

    #[error("the free plan cannot be purchased")]
    FreePlanNotPurchasable,
}

/// Currency used for all plan prices.
pub const CURRENCY: &str = "INR";

//
// ─── PLANS & FEATURES ──────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    UnlimitedVideos,
    UnlimitedDocuments,
    AiSummary,
    AdvancedAnalytics,
}

impl Feature {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::UnlimitedVideos => "unlimited_videos",
            Feature::UnlimitedDocuments => "unlimited_documents",
            Feature::AiSummary => "ai_summary",
            Feature::AdvancedAnalytics => "advanced_analytics",
        }
    }

    /// Feature that lifts the per-course cap on materials of `kind`, if any.
    #[must_use]
    pub fn unlimited(kind: MaterialKind) -> Option<Feature> {
        match kind {
            MaterialKind::Video => Some(Feature::UnlimitedVideos),
            MaterialKind::Document => Some(Feature::UnlimitedDocuments),
            _ => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Basic,
    Premium,
}

/// Catalogue entry describing what a plan costs and unlocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub plan: Plan,
    pub name: &'static str,
    pub price_minor: u64,
    pub currency: &'static str,
    pub duration_days: u32,
    pub features: Vec<Feature>,
    pub video_limit: Option<usize>,
    pub document_limit: Option<usize>,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Basic, Plan::Premium];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Premium => "premium",
        }
    }

    /// Price in minor currency units (paise).
    #[must_use]
    pub fn price_minor(self) -> u64 {
        match self {
            Plan::Free => 0,
            Plan::Basic => 49_900,
            Plan::Premium => 99_900,
        }
    }

    #[must_use]
    pub fn duration_days(self) -> u32 {
        match self {
            Plan::Free => 0,
            Plan::Basic | Plan::Premium => 30,
        }
    }

    #[must_use]
    pub fn features(self) -> &'static [Feature] {
        match self {
            Plan::Free => &[],
            Plan::Basic => &[Feature::UnlimitedVideos, Feature::UnlimitedDocuments],
            Plan::Premium => &[
                Feature::UnlimitedVideos,
                Feature::UnlimitedDocuments,
                Feature::AiSummary,
                Feature::AdvancedAnalytics,
            ],
        }
    }

    #[must_use]
    pub fn includes(self, feature: Feature) -> bool {
        self.features().contains(&feature)
    }

    /// Number of materials of `kind` per course viewable on this plan;
    /// `None` means unlimited.
    #[must_use]
    pub fn limit_for(self, kind: MaterialKind) -> Option<usize> {
        let feature = Feature::unlimited(kind)?;
        if self.includes(feature) {
            return None;
        }
        match kind {
            MaterialKind::Video => Some(2),
            _ => Some(3),
        }
    }

    #[must_use]
    pub fn info(self) -> PlanInfo {
        PlanInfo {
            plan: self,
            name: match self {
                Plan::Free => "Free",
                Plan::Basic => "Basic",
                Plan::Premium => "Premium",
            },
            price_minor: self.price_minor(),
            currency: CURRENCY,
            duration_days: self.duration_days(),
            features: self.features().to_vec(),
            video_limit: self.limit_for(MaterialKind::Video),
            document_limit: self.limit_for(MaterialKind::Document),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "basic" => Ok(Plan::Basic),
            "premium" => Ok(Plan::Premium),
            other => Err(SubscriptionError::UnknownPlan(other.to_owned())),
        }
    }
}

//
// ─── SUBSCRIPTION ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(SubscriptionError::UnknownStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    user_id: UserId,
    plan: Plan,
    status: SubscriptionStatus,
    started_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    auto_renew: bool,
}

impl Subscription {
    #[must_use]
    pub fn free(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan: Plan::Free,
            status: SubscriptionStatus::Active,
            started_at: now,
            expires_at: None,
            auto_renew: false,
        }
    }

    #[must_use]
    pub fn from_persisted(
        user_id: UserId,
        plan: Plan,
        status: SubscriptionStatus,
        started_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        auto_renew: bool,
    ) -> Self {
        Self {
            user_id,
            plan,
            status,
            started_at,
            expires_at,
            auto_renew,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn plan(&self) -> Plan {
        self.plan
    }

    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[must_use]
    pub fn auto_renew(&self) -> bool {
        self.auto_renew
    }

    fn lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|end| end <= now)
    }

    /// Status as observed at `now`; paid plans past their end date read as expired.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        if self.plan != Plan::Free && self.lapsed(now) {
            SubscriptionStatus::Expired
        } else {
            self.status
        }
    }

    /// Plan whose features apply at `now`. Cancelled plans keep their
    /// features until the paid period ends.
    #[must_use]
    pub fn effective_plan(&self, now: DateTime<Utc>) -> Plan {
        match self.status_at(now) {
            SubscriptionStatus::Expired => Plan::Free,
            SubscriptionStatus::Active | SubscriptionStatus::Cancelled => self.plan,
        }
    }

    #[must_use]
    pub fn has_access(&self, feature: Feature, now: DateTime<Utc>) -> bool {
        self.effective_plan(now).includes(feature)
    }

    /// Whether the `index`-th material of `kind` in a course is viewable.
    #[must_use]
    pub fn can_view(&self, kind: MaterialKind, index: usize, now: DateTime<Utc>) -> bool {
        self.effective_plan(now)
            .limit_for(kind)
            .is_none_or(|limit| index < limit)
    }

    /// Start or extend a paid plan. Renewing the same unexpired plan extends
    /// from the current end date.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::FreePlanNotPurchasable` for `Plan::Free`.
    pub fn activate(&mut self, plan: Plan, now: DateTime<Utc>) -> Result<(), SubscriptionError> {
        if plan == Plan::Free {
            return Err(SubscriptionError::FreePlanNotPurchasable);
        }
        let base = match self.expires_at {
            Some(end) if self.plan == plan && end > now => end,
            _ => {
                self.started_at = now;
                now
            }
        };
        self.plan = plan;
        self.status = SubscriptionStatus::Active;
        self.expires_at = Some(base + Duration::days(i64::from(plan.duration_days())));
        self.auto_renew = true;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SubscriptionError::NothingToCancel` on the free plan.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), SubscriptionError> {
        if self.effective_plan(now) == Plan::Free {
            return Err(SubscriptionError::NothingToCancel);
        }
        self.status = SubscriptionStatus::Cancelled;
        self.auto_renew = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn free_plan_limits_videos_and_documents() {
        let sub = Subscription::free(UserId::new(1), fixed_now());
        let now = fixed_now();
        assert!(sub.can_view(MaterialKind::Video, 1, now));
        assert!(!sub.can_view(MaterialKind::Video, 2, now));
        assert!(sub.can_view(MaterialKind::Document, 2, now));
        assert!(!sub.can_view(MaterialKind::Document, 3, now));
        assert!(sub.can_view(MaterialKind::Link, 50, now));
        assert!(!sub.has_access(Feature::AiSummary, now));
    }

    #[test]
    fn basic_unlocks_content_but_not_ai() {
        let now = fixed_now();
        let mut sub = Subscription::free(UserId::new(1), now);
        sub.activate(Plan::Basic, now).unwrap();
        assert!(sub.can_view(MaterialKind::Video, 10, now));
        assert!(!sub.has_access(Feature::AiSummary, now));
        assert_eq!(sub.expires_at(), Some(now + Duration::days(30)));
    }

    #[test]
    fn expired_plan_degrades_to_free() {
        let now = fixed_now();
        let mut sub = Subscription::free(UserId::new(1), now);
        sub.activate(Plan::Premium, now).unwrap();
        let later = now + Duration::days(31);
        assert_eq!(sub.status_at(later), SubscriptionStatus::Expired);
        assert_eq!(sub.effective_plan(later), Plan::Free);
        assert!(!sub.has_access(Feature::AiSummary, later));
    }

    #[test]
    fn cancelled_keeps_access_until_expiry() {
        let now = fixed_now();
        let mut sub = Subscription::free(UserId::new(1), now);
        assert_eq!(sub.cancel(now), Err(SubscriptionError::NothingToCancel));
        sub.activate(Plan::Premium, now).unwrap();
        sub.cancel(now).unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::Cancelled);
        assert!(sub.has_access(Feature::AiSummary, now + Duration::days(10)));
        assert!(!sub.auto_renew());
    }

    #[test]
    fn renewing_same_plan_extends() {
        let now = fixed_now();
        let mut sub = Subscription::free(UserId::new(1), now);
        sub.activate(Plan::Basic, now).unwrap();
        sub.activate(Plan::Basic, now + Duration::days(10)).unwrap();
        assert_eq!(sub.expires_at(), Some(now + Duration::days(60)));
        assert_eq!(sub.started_at(), now);

        sub.activate(Plan::Premium, now + Duration::days(10)).unwrap();
        assert_eq!(sub.expires_at(), Some(now + Duration::days(40)));
    }
}
