use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use tracing::{info, warn};

use learnsy_core::model::{
    DEFAULT_PAYMENT_TTL_MINUTES, PaymentError, PaymentId, PaymentRequest, Plan, UserId,
};
use storage::repository::{PaymentRepository, Storage, StorageError};

use crate::Clock;
use crate::access::{AccessGuard, FoundExt};
use crate::error::{AccessError, PaymentServiceError};
use crate::subscriptions::SubscriptionView;

const REFERENCE_LEN: usize = 10;
const REFERENCE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub payment: PaymentRequest,
    pub subscription: SubscriptionView,
}

/// Mock QR checkout: requests are created pending and confirmed by the
/// payer without any gateway in between.
#[derive(Clone)]
pub struct PaymentService {
    clock: Clock,
    payments: Arc<dyn PaymentRepository>,
    guard: AccessGuard,
    ttl: Duration,
}

impl PaymentService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self::with_ttl(clock, storage, Duration::minutes(DEFAULT_PAYMENT_TTL_MINUTES))
    }

    #[must_use]
    pub fn with_ttl(clock: Clock, storage: &Storage, ttl: Duration) -> Self {
        Self {
            clock,
            payments: Arc::clone(&storage.payments),
            guard: AccessGuard::new(clock, storage),
            ttl,
        }
    }

    /// Open a pending payment for `plan` under a fresh random reference.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::FreePlan` for the free plan.
    pub async fn create_qr_payment(
        &self,
        user: UserId,
        plan: Plan,
    ) -> Result<PaymentRequest, PaymentServiceError> {
        let now = self.clock.now();
        for _ in 0..REFERENCE_ATTEMPTS {
            let request = PaymentRequest::new(
                PaymentId::new(0),
                user,
                plan,
                generate_reference(),
                now,
                self.ttl,
            )?;
            match self.payments.insert_payment(&request).await {
                Ok(id) => {
                    info!(user = %user, plan = %plan, reference = request.reference(), "created payment request");
                    return Ok(request.with_id(id));
                }
                Err(StorageError::Conflict) => {
                    warn!(reference = request.reference(), "payment reference collision");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::Conflict.into())
    }

    /// Confirm a pending request and activate the plan it pays for.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Expired` once the request has lapsed (the
    /// transition is stored) and `PaymentError::NotPending` for repeats.
    pub async fn confirm(
        &self,
        user: UserId,
        reference: &str,
    ) -> Result<PaymentConfirmation, PaymentServiceError> {
        let mut payment = self.owned_payment(user, reference).await?;
        let now = self.clock.now();
        match payment.confirm(now) {
            Ok(()) => {}
            Err(PaymentError::Expired) => {
                if let Err(e) = self.payments.update_payment(&payment).await {
                    return Err(self.lost_transition(reference, e).await);
                }
                warn!(reference, "payment request expired before confirmation");
                return Err(PaymentError::Expired.into());
            }
            Err(e) => return Err(e.into()),
        }

        let mut subscription = self.guard.subscription(user).await?;
        subscription.activate(payment.plan(), now)?;
        if let Err(e) = self.payments.confirm_payment(&payment, &subscription).await {
            return Err(self.lost_transition(reference, e).await);
        }
        info!(user = %user, plan = %payment.plan(), reference, "payment confirmed");
        Ok(PaymentConfirmation {
            payment,
            subscription: SubscriptionView::at(&subscription, now),
        })
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotFound` for unknown references.
    pub async fn get(
        &self,
        user: UserId,
        reference: &str,
    ) -> Result<PaymentRequest, PaymentServiceError> {
        let mut payment = self.owned_payment(user, reference).await?;
        if payment.expire_if_due(self.clock.now()) {
            match self.payments.update_payment(&payment).await {
                Ok(()) => {}
                Err(StorageError::Conflict) => return self.owned_payment(user, reference).await,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(payment)
    }

    /// A concurrent request moved the payment out of `pending` first; report
    /// the state it ended in.
    async fn lost_transition(&self, reference: &str, err: StorageError) -> PaymentServiceError {
        if !matches!(err, StorageError::Conflict) {
            return err.into();
        }
        match self.payments.get_payment_by_reference(reference.trim()).await {
            Ok(current) => {
                warn!(reference, status = current.status().as_str(), "payment already settled");
                PaymentError::NotPending(current.status().as_str()).into()
            }
            Err(StorageError::NotFound) => AccessError::NotFound("payment").into(),
            Err(e) => e.into(),
        }
    }

    async fn owned_payment(
        &self,
        user: UserId,
        reference: &str,
    ) -> Result<PaymentRequest, PaymentServiceError> {
        let payment = self
            .payments
            .get_payment_by_reference(reference.trim())
            .await
            .or_missing("payment")?;
        if payment.user_id() != user {
            warn!(user = %user, reference, "rejected: foreign payment request");
            return Err(AccessError::NotOwner.into());
        }
        Ok(payment)
    }
}

fn generate_reference() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{actor, clock};
    use learnsy_core::model::{PaymentStatus, Role};

    #[test]
    fn references_are_short_uppercase_codes() {
        let r = generate_reference();
        assert_eq!(r.len(), REFERENCE_LEN);
        assert!(r.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn confirming_activates_the_plan() {
        let storage = Storage::in_memory();
        let user = actor(&storage, "s@example.com", Role::Student).await;
        let service = PaymentService::new(clock(), &storage);

        let request = service.create_qr_payment(user.id, Plan::Premium).await.unwrap();
        assert_eq!(request.amount_minor(), 99_900);
        assert!(request.qr_payload().contains(request.reference()));

        let confirmed = service.confirm(user.id, request.reference()).await.unwrap();
        assert_eq!(confirmed.payment.status(), PaymentStatus::Confirmed);
        assert_eq!(confirmed.subscription.effective_plan, Plan::Premium);

        let again = service.confirm(user.id, request.reference()).await.unwrap_err();
        assert!(matches!(
            again,
            PaymentServiceError::Payment(PaymentError::NotPending("confirmed"))
        ));
    }

    #[tokio::test]
    async fn concurrent_confirmations_extend_the_plan_once() {
        let storage = Storage::in_memory();
        let user = actor(&storage, "s@example.com", Role::Student).await;
        let service = PaymentService::new(clock(), &storage);
        let request = service.create_qr_payment(user.id, Plan::Premium).await.unwrap();

        // Both callers read the request while it is still pending.
        let stale = storage
            .payments
            .get_payment_by_reference(request.reference())
            .await
            .unwrap();
        service.confirm(user.id, request.reference()).await.unwrap();
        let mut second = stale.clone();
        second.confirm(clock().now()).unwrap();
        let mut doubled = storage.subscriptions.get_subscription(user.id).await.unwrap().unwrap();
        doubled.activate(Plan::Premium, clock().now()).unwrap();
        assert!(matches!(
            storage.payments.confirm_payment(&second, &doubled).await,
            Err(StorageError::Conflict)
        ));

        let sub = storage.subscriptions.get_subscription(user.id).await.unwrap().unwrap();
        assert_eq!(sub.expires_at(), Some(clock().now() + Duration::days(30)));

        let (a, b) = tokio::join!(
            service.confirm(user.id, request.reference()),
            service.confirm(user.id, request.reference()),
        );
        for outcome in [a, b] {
            assert!(matches!(
                outcome,
                Err(PaymentServiceError::Payment(PaymentError::NotPending("confirmed")))
            ));
        }
    }

    #[tokio::test]
    async fn expired_requests_cannot_be_confirmed() {
        let storage = Storage::in_memory();
        let user = actor(&storage, "s@example.com", Role::Student).await;
        let request = PaymentService::new(clock(), &storage)
            .create_qr_payment(user.id, Plan::Basic)
            .await
            .unwrap();

        let late = PaymentService::new(clock().advanced(Duration::minutes(30)), &storage);
        assert!(matches!(
            late.confirm(user.id, request.reference()).await,
            Err(PaymentServiceError::Payment(PaymentError::Expired))
        ));
        let stored = late.get(user.id, request.reference()).await.unwrap();
        assert_eq!(stored.status(), PaymentStatus::Expired);
        let sub = storage.subscriptions.get_subscription(user.id).await.unwrap();
        assert!(sub.is_none_or(|s| s.plan() == Plan::Free));
    }

    #[tokio::test]
    async fn only_the_payer_can_confirm() {
        let storage = Storage::in_memory();
        let payer = actor(&storage, "s@example.com", Role::Student).await;
        let other = actor(&storage, "t@example.com", Role::Student).await;
        let service = PaymentService::new(clock(), &storage);
        let request = service.create_qr_payment(payer.id, Plan::Basic).await.unwrap();

        assert!(matches!(
            service.confirm(other.id, request.reference()).await,
            Err(PaymentServiceError::Access(AccessError::NotOwner))
        ));
        assert!(matches!(
            service.get(payer.id, "NOPE").await,
            Err(PaymentServiceError::Access(AccessError::NotFound("payment")))
        ));
        assert!(matches!(
            service.create_qr_payment(payer.id, Plan::Free).await,
            Err(PaymentServiceError::Payment(PaymentError::FreePlan))
        ));
    }
}
