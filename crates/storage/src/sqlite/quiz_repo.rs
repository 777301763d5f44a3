use learnsy_core::model::{CourseId, Progress, Quiz, QuizAttempt, QuizAttemptId, QuizId, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::enrollment_repo::write_progress;
use super::mapping::{db, get_id, get_json, get_u32, i64_to_u64, id_i64, ser, to_json, u8_from_i64};
use crate::repository::{QuizRepository, StorageError};

fn map_quiz_row(row: &SqliteRow) -> Result<Quiz, StorageError> {
    Ok(Quiz::from_persisted(
        get_id(row, "id", QuizId::new)?,
        get_id(row, "course_id", CourseId::new)?,
        row.try_get("title").map_err(ser)?,
        get_json(row, "questions")?,
        row.try_get("created_at").map_err(ser)?,
    ))
}

fn map_attempt_row(row: &SqliteRow) -> Result<QuizAttempt, StorageError> {
    Ok(QuizAttempt {
        id: get_id(row, "id", QuizAttemptId::new)?,
        quiz_id: get_id(row, "quiz_id", QuizId::new)?,
        student_id: get_id(row, "student_id", UserId::new)?,
        answers: get_json(row, "answers")?,
        score: get_u32(row, "score")?,
        max_score: get_u32(row, "max_score")?,
        percent: u8_from_i64("percent", row.try_get::<i64, _>("percent").map_err(ser)?)?,
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
    })
}

#[async_trait::async_trait]
impl QuizRepository for SqliteRepository {
    async fn insert_quiz(&self, quiz: &Quiz) -> Result<QuizId, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO quizzes (course_id, title, questions, created_at)
                VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(id_i64("course_id", quiz.course_id().value())?)
        .bind(quiz.title())
        .bind(to_json(quiz.questions())?)
        .bind(quiz.created_at())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        i64_to_u64("quiz_id", res.last_insert_rowid()).map(QuizId::new)
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError> {
        let row = sqlx::query(
            "SELECT id, course_id, title, questions, created_at FROM quizzes WHERE id = ?1",
        )
        .bind(id_i64("quiz_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or(StorageError::NotFound)?;
        map_quiz_row(&row)
    }

    async fn list_course_quizzes(&self, course_id: CourseId) -> Result<Vec<Quiz>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, course_id, title, questions, created_at
                FROM quizzes
                WHERE course_id = ?1
                ORDER BY id ASC
            ",
        )
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(map_quiz_row).collect()
    }

    async fn record_attempt(
        &self,
        attempt: &QuizAttempt,
        progress: &Progress,
    ) -> Result<QuizAttemptId, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let res = sqlx::query(
            r"
                INSERT INTO quiz_attempts (
                    quiz_id, student_id, answers, score, max_score, percent, submitted_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(id_i64("quiz_id", attempt.quiz_id.value())?)
        .bind(id_i64("student_id", attempt.student_id.value())?)
        .bind(to_json(&attempt.answers)?)
        .bind(i64::from(attempt.score))
        .bind(i64::from(attempt.max_score))
        .bind(i64::from(attempt.percent))
        .bind(attempt.submitted_at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        write_progress(&mut tx, progress).await?;
        tx.commit().await.map_err(db)?;

        i64_to_u64("attempt_id", res.last_insert_rowid()).map(QuizAttemptId::new)
    }

    async fn list_attempts(
        &self,
        student_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, quiz_id, student_id, answers, score, max_score, percent, submitted_at
                FROM quiz_attempts
                WHERE student_id = ?1 AND quiz_id = ?2
                ORDER BY id DESC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("quiz_id", quiz_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(map_attempt_row).collect()
    }
}
