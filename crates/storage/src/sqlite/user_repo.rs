use learnsy_core::model::{Profile, User, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{db, get_id, get_parsed, i64_to_u64, id_i64, ser};
use crate::repository::{StorageError, UserRepository};

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, bio, institution, avatar_url, created_at";

fn map_user_row(row: &SqliteRow) -> Result<User, StorageError> {
    let profile = Profile {
        bio: row.try_get("bio").map_err(ser)?,
        institution: row.try_get("institution").map_err(ser)?,
        avatar_url: row.try_get("avatar_url").map_err(ser)?,
    };
    Ok(User::from_persisted(
        get_id(row, "id", UserId::new)?,
        row.try_get("name").map_err(ser)?,
        row.try_get("email").map_err(ser)?,
        row.try_get("password_hash").map_err(ser)?,
        get_parsed(row, "role")?,
        profile,
        row.try_get("created_at").map_err(ser)?,
    ))
}

#[async_trait::async_trait]
impl UserRepository for SqliteRepository {
    async fn insert_user(&self, user: &User) -> Result<UserId, StorageError> {
        let profile = user.profile();
        let res = sqlx::query(
            r"
                INSERT INTO users (
                    name, email, password_hash, role, bio, institution, avatar_url, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(user.name())
        .bind(user.email())
        .bind(user.password_hash())
        .bind(user.role().as_str())
        .bind(profile.bio.as_deref())
        .bind(profile.institution.as_deref())
        .bind(profile.avatar_url.as_deref())
        .bind(user.created_at())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        i64_to_u64("user_id", res.last_insert_rowid()).map(UserId::new)
    }

    async fn get_user(&self, id: UserId) -> Result<User, StorageError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
            .bind(id_i64("user_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or(StorageError::NotFound)?;
        map_user_row(&row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(map_user_row).transpose()
    }

    async fn update_user(&self, user: &User) -> Result<(), StorageError> {
        let profile = user.profile();
        let res = sqlx::query(
            r"
                UPDATE users SET
                    name = ?2,
                    email = ?3,
                    password_hash = ?4,
                    bio = ?5,
                    institution = ?6,
                    avatar_url = ?7
                WHERE id = ?1
            ",
        )
        .bind(id_i64("user_id", user.id().value())?)
        .bind(user.name())
        .bind(user.email())
        .bind(user.password_hash())
        .bind(profile.bio.as_deref())
        .bind(profile.institution.as_deref())
        .bind(profile.avatar_url.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
