use chrono::{DateTime, Utc};
use learnsy_core::model::{
    CourseId, Enrollment, EnrollmentId, Progress, ProgressSnapshot, UserId,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::course_repo::fetch_course;
use super::mapping::{
    db, get_id, get_json, get_parsed, get_u32, get_u64, i64_to_u64, id_i64, ser, to_json,
    u8_from_i64,
};
use crate::repository::{EnrollmentRepository, ProgressRepository, StorageError};

const ENROLLMENT_COLUMNS: &str = "id, student_id, course_id, status, lessons_completed, \
     materials_completed, percent, enrolled_at, completed_at, last_accessed_at";

const PROGRESS_COLUMNS: &str = "student_id, course_id, completed_lessons, quiz_points, \
     total_study_secs, current_streak, longest_streak, last_study_date, study_calendar, \
     achievements, updated_at, revision";

fn map_enrollment_row(row: &SqliteRow) -> Result<Enrollment, StorageError> {
    let progress = ProgressSnapshot {
        lessons_completed: get_u32(row, "lessons_completed")?,
        materials_completed: get_u32(row, "materials_completed")?,
        percent: u8_from_i64("percent", row.try_get::<i64, _>("percent").map_err(ser)?)?,
    };
    Ok(Enrollment::from_persisted(
        get_id(row, "id", EnrollmentId::new)?,
        get_id(row, "student_id", UserId::new)?,
        get_id(row, "course_id", CourseId::new)?,
        get_parsed(row, "status")?,
        progress,
        row.try_get("enrolled_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        row.try_get("last_accessed_at").map_err(ser)?,
    ))
}

fn map_progress_row(row: &SqliteRow) -> Result<Progress, StorageError> {
    Ok(Progress::from_persisted(
        get_id(row, "student_id", UserId::new)?,
        get_id(row, "course_id", CourseId::new)?,
        get_json(row, "completed_lessons")?,
        get_u32(row, "quiz_points")?,
        get_u64(row, "total_study_secs")?,
        get_u32(row, "current_streak")?,
        get_u32(row, "longest_streak")?,
        row.try_get("last_study_date").map_err(ser)?,
        get_json(row, "study_calendar")?,
        get_json(row, "achievements")?,
        row.try_get("updated_at").map_err(ser)?,
        get_u64(row, "revision")?,
    ))
}

/// Store a progress row on an open connection or transaction, provided the
/// stored revision still matches the one `progress` was read at.
pub(super) async fn write_progress(
    conn: &mut SqliteConnection,
    progress: &Progress,
) -> Result<(), StorageError> {
    let res = if progress.revision() == 0 {
        sqlx::query(
            r"
                INSERT INTO progress (
                    student_id, course_id, completed_lessons, quiz_points, total_study_secs,
                    current_streak, longest_streak, last_study_date, study_calendar,
                    achievements, updated_at, revision
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12 + 1)
                ON CONFLICT(student_id, course_id) DO NOTHING
            ",
        )
    } else {
        sqlx::query(
            r"
                UPDATE progress SET
                    completed_lessons = ?3,
                    quiz_points = ?4,
                    total_study_secs = ?5,
                    current_streak = ?6,
                    longest_streak = ?7,
                    last_study_date = ?8,
                    study_calendar = ?9,
                    achievements = ?10,
                    updated_at = ?11,
                    revision = revision + 1
                WHERE student_id = ?1 AND course_id = ?2 AND revision = ?12
            ",
        )
    }
    .bind(id_i64("student_id", progress.student_id().value())?)
    .bind(id_i64("course_id", progress.course_id().value())?)
    .bind(to_json(progress.completed_lessons())?)
    .bind(i64::from(progress.quiz_points()))
    .bind(id_i64("total_study_secs", progress.total_study_secs())?)
    .bind(i64::from(progress.current_streak()))
    .bind(i64::from(progress.longest_streak()))
    .bind(progress.last_study_date())
    .bind(to_json(progress.study_calendar())?)
    .bind(to_json(progress.achievements())?)
    .bind(progress.updated_at())
    .bind(id_i64("revision", progress.revision())?)
    .execute(&mut *conn)
    .await
    .map_err(db)?;

    if res.rows_affected() == 0 {
        return Err(StorageError::Conflict);
    }
    Ok(())
}

/// Overwrite the mutable fields of an existing enrollment.
pub(super) async fn write_enrollment(
    conn: &mut SqliteConnection,
    enrollment: &Enrollment,
) -> Result<(), StorageError> {
    let snapshot = enrollment.progress();
    let res = sqlx::query(
        r"
            UPDATE enrollments SET
                status = ?2,
                lessons_completed = ?3,
                materials_completed = ?4,
                percent = ?5,
                completed_at = ?6,
                last_accessed_at = ?7
            WHERE id = ?1
        ",
    )
    .bind(id_i64("enrollment_id", enrollment.id().value())?)
    .bind(enrollment.status().as_str())
    .bind(i64::from(snapshot.lessons_completed))
    .bind(i64::from(snapshot.materials_completed))
    .bind(i64::from(snapshot.percent))
    .bind(enrollment.completed_at())
    .bind(enrollment.last_accessed_at())
    .execute(&mut *conn)
    .await
    .map_err(db)?;

    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn enroll(
        &self,
        enrollment: &Enrollment,
        progress: &Progress,
    ) -> Result<EnrollmentId, StorageError> {
        let snapshot = enrollment.progress();
        let mut tx = self.pool.begin().await.map_err(db)?;

        let res = sqlx::query(
            r"
                INSERT INTO enrollments (
                    student_id, course_id, status, lessons_completed, materials_completed,
                    percent, enrolled_at, completed_at, last_accessed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(id_i64("student_id", enrollment.student_id().value())?)
        .bind(id_i64("course_id", enrollment.course_id().value())?)
        .bind(enrollment.status().as_str())
        .bind(i64::from(snapshot.lessons_completed))
        .bind(i64::from(snapshot.materials_completed))
        .bind(i64::from(snapshot.percent))
        .bind(enrollment.enrolled_at())
        .bind(enrollment.completed_at())
        .bind(enrollment.last_accessed_at())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        write_progress(&mut tx, progress).await?;
        tx.commit().await.map_err(db)?;

        i64_to_u64("enrollment_id", res.last_insert_rowid()).map(EnrollmentId::new)
    }

    async fn get_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = ?1 AND course_id = ?2"
        ))
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(map_enrollment_row).transpose()
    }

    async fn list_student_enrollments(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = ?1 \
             ORDER BY last_accessed_at DESC, id DESC"
        ))
        .bind(id_i64("student_id", student_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(map_enrollment_row).collect()
    }

    async fn list_course_enrollments(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE course_id = ?1 ORDER BY id ASC"
        ))
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(map_enrollment_row).collect()
    }

    async fn recount_course(
        &self,
        course_id: CourseId,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let course = id_i64("course_id", course_id.value())?;
        let mut tx = self.pool.begin().await.map_err(db)?;

        // Writing first takes the database write lock for the whole recount.
        sqlx::query("UPDATE progress SET revision = revision + 1 WHERE course_id = ?1")
            .bind(course)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        let total_lessons = fetch_course(&mut tx, course_id).await?.total_lessons();
        let total_materials: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM materials WHERE course_id = ?1")
                .bind(course)
                .fetch_one(&mut *tx)
                .await
                .map_err(db)?;
        let total_materials = u32::try_from(total_materials).unwrap_or(u32::MAX);

        let rows = sqlx::query(&format!(
            r"
                SELECT {ENROLLMENT_COLUMNS},
                    (
                        SELECT COUNT(*)
                        FROM material_completions mc
                        JOIN materials m ON m.id = mc.material_id
                        WHERE mc.student_id = enrollments.student_id
                          AND m.course_id = enrollments.course_id
                    ) AS materials_done,
                    (
                        SELECT json_array_length(p.completed_lessons)
                        FROM progress p
                        WHERE p.student_id = enrollments.student_id
                          AND p.course_id = enrollments.course_id
                    ) AS lessons_done
                FROM enrollments
                WHERE course_id = ?1
            "
        ))
        .bind(course)
        .fetch_all(&mut *tx)
        .await
        .map_err(db)?;

        for row in &rows {
            let mut enrollment = map_enrollment_row(row)?;
            let lessons = match row.try_get::<Option<i64>, _>("lessons_done").map_err(ser)? {
                Some(n) => u32::try_from(n).unwrap_or(u32::MAX),
                None => enrollment.progress().lessons_completed,
            };
            enrollment.recount(
                lessons,
                get_u32(row, "materials_done")?,
                total_lessons,
                total_materials,
                now,
            );
            write_enrollment(&mut tx, &enrollment).await?;
        }

        tx.commit().await.map_err(db)?;
        Ok(rows.len())
    }
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress WHERE student_id = ?1 AND course_id = ?2"
        ))
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(map_progress_row).transpose()
    }

    async fn list_student_progress(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Progress>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress WHERE student_id = ?1 ORDER BY course_id ASC"
        ))
        .bind(id_i64("student_id", student_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(map_progress_row).collect()
    }

    async fn save_progress_snapshot(
        &self,
        progress: &Progress,
        enrollment: &Enrollment,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        write_progress(&mut tx, progress).await?;
        write_enrollment(&mut tx, enrollment).await?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }
}
