use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{PaymentId, UserId};
use crate::model::subscription::{CURRENCY, Plan};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PaymentError {
    #[error("the free plan does not require payment")]
    FreePlan,

    #[error("payment reference cannot be empty")]
    EmptyReference,

    #[error("payment request has expired")]
    Expired,

    #[error("payment request is already {0}")]
    NotPending(&'static str),

    #[error("unknown payment status: {0}")]
    UnknownStatus(String),
}

/// How long a QR payment request stays payable.
pub const DEFAULT_PAYMENT_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Expired,
}

impl PaymentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Expired => "expired",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "expired" => Ok(PaymentStatus::Expired),
            other => Err(PaymentError::UnknownStatus(other.to_owned())),
        }
    }
}

/// A pending plan upgrade, rendered by the client as a QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    id: PaymentId,
    user_id: UserId,
    plan: Plan,
    amount_minor: u64,
    currency: String,
    reference: String,
    qr_payload: String,
    status: PaymentStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

#[must_use]
pub fn qr_payload(reference: &str, plan: Plan) -> String {
    format!(
        "learnsy://pay?ref={reference}&plan={}&amount={}&cur={CURRENCY}",
        plan.as_str(),
        plan.price_minor()
    )
}

impl PaymentRequest {
    /// # Errors
    ///
    /// Returns `PaymentError::FreePlan` for `Plan::Free` and
    /// `PaymentError::EmptyReference` for a blank reference.
    pub fn new(
        id: PaymentId,
        user_id: UserId,
        plan: Plan,
        reference: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, PaymentError> {
        if plan == Plan::Free {
            return Err(PaymentError::FreePlan);
        }
        let reference = reference.into().trim().to_owned();
        if reference.is_empty() {
            return Err(PaymentError::EmptyReference);
        }
        Ok(Self {
            id,
            user_id,
            plan,
            amount_minor: plan.price_minor(),
            currency: CURRENCY.to_owned(),
            qr_payload: qr_payload(&reference, plan),
            reference,
            status: PaymentStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            confirmed_at: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        id: PaymentId,
        user_id: UserId,
        plan: Plan,
        amount_minor: u64,
        currency: String,
        reference: String,
        status: PaymentStatus,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            user_id,
            plan,
            amount_minor,
            qr_payload: qr_payload(&reference, plan),
            currency,
            reference,
            status,
            created_at,
            expires_at,
            confirmed_at,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: PaymentId) -> Self {
        self.id = id;
        self
    }

    /// Mark the request paid.
    ///
    /// A pending request past its expiry moves to `Expired` and the call
    /// fails; the caller should persist that transition.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Expired` or `PaymentError::NotPending`.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Pending {
            return Err(PaymentError::NotPending(self.status.as_str()));
        }
        if now >= self.expires_at {
            self.status = PaymentStatus::Expired;
            return Err(PaymentError::Expired);
        }
        self.status = PaymentStatus::Confirmed;
        self.confirmed_at = Some(now);
        Ok(())
    }

    /// Move a pending request past its expiry to `Expired`; returns whether
    /// anything changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status_at(now) == PaymentStatus::Expired && self.status == PaymentStatus::Pending {
            self.status = PaymentStatus::Expired;
            return true;
        }
        false
    }

    #[must_use]
    pub fn id(&self) -> PaymentId {
        self.id
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
    pub fn amount_minor(&self) -> u64 {
        self.amount_minor
    }

    #[must_use]
    pub fn currency(&self) -> &str {
        &self.currency
    }

    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    #[must_use]
    pub fn qr_payload(&self) -> &str {
        &self.qr_payload
    }

    #[must_use]
    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Status as observed at `now`, without mutating the request.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> PaymentStatus {
        if self.status == PaymentStatus::Pending && now >= self.expires_at {
            PaymentStatus::Expired
        } else {
            self.status
        }
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn request(plan: Plan) -> Result<PaymentRequest, PaymentError> {
        PaymentRequest::new(
            PaymentId::new(1),
            UserId::new(7),
            plan,
            "AB12CD34",
            fixed_now(),
            Duration::minutes(DEFAULT_PAYMENT_TTL_MINUTES),
        )
    }

    #[test]
    fn builds_qr_payload_from_catalogue() {
        let req = request(Plan::Premium).unwrap();
        assert_eq!(req.amount_minor(), 99_900);
        assert_eq!(
            req.qr_payload(),
            "learnsy://pay?ref=AB12CD34&plan=premium&amount=99900&cur=INR"
        );
        assert_eq!(req.status(), PaymentStatus::Pending);
    }

    #[test]
    fn free_plan_is_rejected() {
        assert_eq!(request(Plan::Free), Err(PaymentError::FreePlan));
    }

    #[test]
    fn confirm_only_once() {
        let mut req = request(Plan::Basic).unwrap();
        req.confirm(fixed_now() + Duration::minutes(1)).unwrap();
        assert_eq!(req.status(), PaymentStatus::Confirmed);
        assert_eq!(
            req.confirm(fixed_now()),
            Err(PaymentError::NotPending("confirmed"))
        );
    }

    #[test]
    fn late_confirmation_expires_request() {
        let mut req = request(Plan::Basic).unwrap();
        let late = fixed_now() + Duration::minutes(DEFAULT_PAYMENT_TTL_MINUTES);
        assert_eq!(req.status_at(late), PaymentStatus::Expired);
        assert_eq!(req.confirm(late), Err(PaymentError::Expired));
        assert_eq!(req.status(), PaymentStatus::Expired);
        assert!(req.confirmed_at().is_none());
    }

    #[test]
    fn expiry_is_applied_once() {
        let mut req = request(Plan::Premium).unwrap();
        assert!(!req.expire_if_due(fixed_now()));
        let late = fixed_now() + Duration::hours(1);
        assert!(req.expire_if_due(late));
        assert!(!req.expire_if_due(late));
        assert_eq!(req.status(), PaymentStatus::Expired);
    }
}
