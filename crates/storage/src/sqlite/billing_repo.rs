use learnsy_core::model::{PaymentId, PaymentRequest, Subscription, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{bool_i64, db, get_bool, get_id, get_parsed, get_u64, i64_to_u64, id_i64, ser};
use crate::repository::{PaymentRepository, StorageError, SubscriptionRepository};

const PAYMENT_COLUMNS: &str = "id, user_id, plan, amount_minor, currency, reference, status, \
     created_at, expires_at, confirmed_at";

fn map_subscription_row(row: &SqliteRow) -> Result<Subscription, StorageError> {
    Ok(Subscription::from_persisted(
        get_id(row, "user_id", UserId::new)?,
        get_parsed(row, "plan")?,
        get_parsed(row, "status")?,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("expires_at").map_err(ser)?,
        get_bool(row, "auto_renew")?,
    ))
}

fn map_payment_row(row: &SqliteRow) -> Result<PaymentRequest, StorageError> {
    Ok(PaymentRequest::from_persisted(
        get_id(row, "id", PaymentId::new)?,
        get_id(row, "user_id", UserId::new)?,
        get_parsed(row, "plan")?,
        get_u64(row, "amount_minor")?,
        row.try_get("currency").map_err(ser)?,
        row.try_get("reference").map_err(ser)?,
        get_parsed(row, "status")?,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("expires_at").map_err(ser)?,
        row.try_get("confirmed_at").map_err(ser)?,
    ))
}

async fn write_subscription(
    conn: &mut SqliteConnection,
    subscription: &Subscription,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
            INSERT INTO subscriptions (user_id, plan, status, started_at, expires_at, auto_renew)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                plan = excluded.plan,
                status = excluded.status,
                started_at = excluded.started_at,
                expires_at = excluded.expires_at,
                auto_renew = excluded.auto_renew
        ",
    )
    .bind(id_i64("user_id", subscription.user_id().value())?)
    .bind(subscription.plan().as_str())
    .bind(subscription.status().as_str())
    .bind(subscription.started_at())
    .bind(subscription.expires_at())
    .bind(bool_i64(subscription.auto_renew()))
    .execute(&mut *conn)
    .await
    .map_err(db)?;
    Ok(())
}

/// Move a payment out of `pending`; only one transition can ever win.
async fn write_payment_status(
    conn: &mut SqliteConnection,
    payment: &PaymentRequest,
) -> Result<(), StorageError> {
    let id = id_i64("payment_id", payment.id().value())?;
    let res = sqlx::query(
        "UPDATE payments SET status = ?2, confirmed_at = ?3 WHERE id = ?1 AND status = 'pending'",
    )
    .bind(id)
    .bind(payment.status().as_str())
    .bind(payment.confirmed_at())
    .execute(&mut *conn)
    .await
    .map_err(db)?;
    if res.rows_affected() == 0 {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM payments WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db)?;
        return Err(if exists.is_some() {
            StorageError::Conflict
        } else {
            StorageError::NotFound
        });
    }
    Ok(())
}

#[async_trait::async_trait]
impl SubscriptionRepository for SqliteRepository {
    async fn get_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT user_id, plan, status, started_at, expires_at, auto_renew
                FROM subscriptions
                WHERE user_id = ?1
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(map_subscription_row).transpose()
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        write_subscription(&mut conn, subscription).await
    }
}

#[async_trait::async_trait]
impl PaymentRepository for SqliteRepository {
    async fn insert_payment(&self, payment: &PaymentRequest) -> Result<PaymentId, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO payments (
                    user_id, plan, amount_minor, currency, reference, status,
                    created_at, expires_at, confirmed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(id_i64("user_id", payment.user_id().value())?)
        .bind(payment.plan().as_str())
        .bind(id_i64("amount_minor", payment.amount_minor())?)
        .bind(payment.currency())
        .bind(payment.reference())
        .bind(payment.status().as_str())
        .bind(payment.created_at())
        .bind(payment.expires_at())
        .bind(payment.confirmed_at())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        i64_to_u64("payment_id", res.last_insert_rowid()).map(PaymentId::new)
    }

    async fn get_payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<PaymentRequest, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = ?1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or(StorageError::NotFound)?;
        map_payment_row(&row)
    }

    async fn update_payment(&self, payment: &PaymentRequest) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        write_payment_status(&mut conn, payment).await
    }

    async fn confirm_payment(
        &self,
        payment: &PaymentRequest,
        subscription: &Subscription,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        write_payment_status(&mut tx, payment).await?;
        write_subscription(&mut tx, subscription).await?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }
}
