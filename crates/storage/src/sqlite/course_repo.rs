use learnsy_core::model::{Course, CourseId, UserId};
use sqlx::{Row, SqliteConnection};
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{bool_i64, db, get_bool, get_id, get_json, get_parsed, i64_to_u64, id_i64, ser, to_json};
use crate::repository::{CourseQuery, CourseRepository, StorageError};

const COURSE_COLUMNS: &str = "id, faculty_id, title, description, category, level, published, \
     modules, created_at, updated_at";

fn map_course_row(row: &SqliteRow) -> Result<Course, StorageError> {
    Ok(Course::from_persisted(
        get_id(row, "id", CourseId::new)?,
        get_id(row, "faculty_id", UserId::new)?,
        row.try_get("title").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        row.try_get("category").map_err(ser)?,
        get_parsed(row, "level")?,
        get_bool(row, "published")?,
        get_json(row, "modules")?,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("updated_at").map_err(ser)?,
    ))
}

/// Escape `LIKE` wildcards so user search text matches literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub(super) async fn fetch_course(
    conn: &mut SqliteConnection,
    id: CourseId,
) -> Result<Course, StorageError> {
    let row = sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?1"))
        .bind(id_i64("course_id", id.value())?)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?
        .ok_or(StorageError::NotFound)?;
    map_course_row(&row)
}

#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn insert_course(&self, course: &Course) -> Result<CourseId, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO courses (
                    faculty_id, title, description, category, level, published,
                    modules, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(id_i64("faculty_id", course.faculty_id().value())?)
        .bind(course.title())
        .bind(course.description())
        .bind(course.category())
        .bind(course.level().as_str())
        .bind(bool_i64(course.is_published()))
        .bind(to_json(course.modules())?)
        .bind(course.created_at())
        .bind(course.updated_at())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        i64_to_u64("course_id", res.last_insert_rowid()).map(CourseId::new)
    }

    async fn update_course(&self, course: &Course) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
                UPDATE courses SET
                    title = ?2,
                    description = ?3,
                    category = ?4,
                    level = ?5,
                    published = ?6,
                    modules = ?7,
                    updated_at = ?8
                WHERE id = ?1
            ",
        )
        .bind(id_i64("course_id", course.id().value())?)
        .bind(course.title())
        .bind(course.description())
        .bind(course.category())
        .bind(course.level().as_str())
        .bind(bool_i64(course.is_published()))
        .bind(to_json(course.modules())?)
        .bind(course.updated_at())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        fetch_course(&mut conn, id).await
    }

    async fn list_courses(&self, query: &CourseQuery) -> Result<Vec<Course>, StorageError> {
        let mut sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE 1 = 1");

        let mut bind_index = 1;
        if query.published_only {
            sql.push_str(" AND published = 1");
        }
        if query.faculty_id.is_some() {
            sql.push_str(&format!(" AND faculty_id = ?{bind_index}"));
            bind_index += 1;
        }
        if query.category.is_some() {
            sql.push_str(&format!(" AND category = ?{bind_index} COLLATE NOCASE"));
            bind_index += 1;
        }
        if query.search.is_some() {
            sql.push_str(&format!(
                " AND (title LIKE ?{bind_index} ESCAPE '\\' OR description LIKE ?{bind_index} ESCAPE '\\')"
            ));
            bind_index += 1;
        }
        sql.push_str(" ORDER BY id DESC");
        if query.limit.is_some() {
            sql.push_str(&format!(" LIMIT ?{bind_index}"));
        }

        let mut q = sqlx::query(&sql);
        if let Some(faculty) = query.faculty_id {
            q = q.bind(id_i64("faculty_id", faculty.value())?);
        }
        if let Some(category) = query.category.as_deref() {
            q = q.bind(category.trim().to_owned());
        }
        if let Some(search) = query.search.as_deref() {
            q = q.bind(like_pattern(search));
        }
        if let Some(limit) = query.limit {
            q = q.bind(i64::from(limit));
        }

        let rows = q.fetch_all(&self.pool).await.map_err(db)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_course_row(&row)?);
        }
        Ok(out)
    }

    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM courses WHERE id = ?1")
            .bind(id_i64("course_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" rust "), "%rust%");
        assert_eq!(like_pattern("100%_"), "%100\\%\\_%");
    }
}
