use learnsy_core::model::{CourseId, MaterialId, Progress, StudySession, StudySessionId, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::enrollment_repo::write_progress;
use super::mapping::{db, get_id, get_opt_id, get_parsed, get_u64, i64_to_u64, id_i64, ser};
use crate::repository::{StorageError, StudySessionRepository};

const SESSION_COLUMNS: &str = "id, student_id, course_id, material_id, activity, started_at, \
     last_activity_at, ended_at, active_seconds, idle_seconds";

fn map_session_row(row: &SqliteRow) -> Result<StudySession, StorageError> {
    Ok(StudySession::from_persisted(
        get_id(row, "id", StudySessionId::new)?,
        get_id(row, "student_id", UserId::new)?,
        get_id(row, "course_id", CourseId::new)?,
        get_opt_id(row, "material_id", MaterialId::new)?,
        get_parsed(row, "activity")?,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("last_activity_at").map_err(ser)?,
        row.try_get("ended_at").map_err(ser)?,
        get_u64(row, "active_seconds")?,
        get_u64(row, "idle_seconds")?,
    ))
}

/// Overwrite the timing of a session that has not ended yet.
async fn write_session(
    conn: &mut SqliteConnection,
    session: &StudySession,
) -> Result<(), StorageError> {
    let res = sqlx::query(
        r"
            UPDATE study_sessions SET
                last_activity_at = ?2,
                ended_at = ?3,
                active_seconds = ?4,
                idle_seconds = ?5
            WHERE id = ?1 AND ended_at IS NULL
        ",
    )
    .bind(id_i64("session_id", session.id().value())?)
    .bind(session.last_activity_at())
    .bind(session.ended_at())
    .bind(id_i64("active_seconds", session.active_seconds())?)
    .bind(id_i64("idle_seconds", session.idle_seconds())?)
    .execute(&mut *conn)
    .await
    .map_err(db)?;

    if res.rows_affected() == 0 {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM study_sessions WHERE id = ?1")
            .bind(id_i64("session_id", session.id().value())?)
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
impl StudySessionRepository for SqliteRepository {
    async fn insert_session(
        &self,
        session: &StudySession,
    ) -> Result<StudySessionId, StorageError> {
        let material = session
            .material_id()
            .map(|m| id_i64("material_id", m.value()))
            .transpose()?;
        let res = sqlx::query(
            r"
                INSERT INTO study_sessions (
                    student_id, course_id, material_id, activity, started_at,
                    last_activity_at, ended_at, active_seconds, idle_seconds
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(id_i64("student_id", session.student_id().value())?)
        .bind(id_i64("course_id", session.course_id().value())?)
        .bind(material)
        .bind(session.activity().as_str())
        .bind(session.started_at())
        .bind(session.last_activity_at())
        .bind(session.ended_at())
        .bind(id_i64("active_seconds", session.active_seconds())?)
        .bind(id_i64("idle_seconds", session.idle_seconds())?)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        i64_to_u64("session_id", res.last_insert_rowid()).map(StudySessionId::new)
    }

    async fn get_session(&self, id: StudySessionId) -> Result<StudySession, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions WHERE id = ?1"
        ))
        .bind(id_i64("session_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or(StorageError::NotFound)?;
        map_session_row(&row)
    }

    async fn active_session(
        &self,
        student_id: UserId,
    ) -> Result<Option<StudySession>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions \
             WHERE student_id = ?1 AND ended_at IS NULL \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(id_i64("student_id", student_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(map_session_row).transpose()
    }

    async fn update_session(&self, session: &StudySession) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        write_session(&mut conn, session).await
    }

    async fn finish_session(
        &self,
        session: &StudySession,
        progress: &Progress,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        write_session(&mut tx, session).await?;
        write_progress(&mut tx, progress).await?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn list_student_sessions(
        &self,
        student_id: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<StudySession>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM study_sessions WHERE student_id = ?1 \
             ORDER BY started_at DESC, id DESC LIMIT ?2"
        ))
        .bind(id_i64("student_id", student_id.value())?)
        .bind(limit.map_or(-1, i64::from))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(map_session_row).collect()
    }
}
