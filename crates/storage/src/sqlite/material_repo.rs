use learnsy_core::model::{CourseId, Enrollment, Material, MaterialId, Progress, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::enrollment_repo::{write_enrollment, write_progress};
use super::mapping::{db, get_id, get_json, get_parsed, get_u32, i64_to_u64, id_i64, ser, to_json};
use crate::repository::{MaterialCompletion, MaterialRepository, StorageError};

const MATERIAL_COLUMNS: &str =
    "id, course_id, faculty_id, title, description, kind, source, position, created_at";

fn map_material_row(row: &SqliteRow) -> Result<Material, StorageError> {
    Ok(Material::from_persisted(
        get_id(row, "id", MaterialId::new)?,
        get_id(row, "course_id", CourseId::new)?,
        get_id(row, "faculty_id", UserId::new)?,
        row.try_get("title").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        get_parsed(row, "kind")?,
        get_json(row, "source")?,
        get_u32(row, "position")?,
        row.try_get("created_at").map_err(ser)?,
    ))
}

#[async_trait::async_trait]
impl MaterialRepository for SqliteRepository {
    async fn insert_material(&self, material: &Material) -> Result<MaterialId, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO materials (
                    course_id, faculty_id, title, description, kind, source, position, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(id_i64("course_id", material.course_id().value())?)
        .bind(id_i64("faculty_id", material.faculty_id().value())?)
        .bind(material.title())
        .bind(material.description())
        .bind(material.kind().as_str())
        .bind(to_json(material.source())?)
        .bind(i64::from(material.position()))
        .bind(material.created_at())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        i64_to_u64("material_id", res.last_insert_rowid()).map(MaterialId::new)
    }

    async fn get_material(&self, id: MaterialId) -> Result<Material, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {MATERIAL_COLUMNS} FROM materials WHERE id = ?1"
        ))
        .bind(id_i64("material_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or(StorageError::NotFound)?;
        map_material_row(&row)
    }

    async fn list_course_materials(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Material>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {MATERIAL_COLUMNS} FROM materials WHERE course_id = ?1 \
             ORDER BY position ASC, id ASC"
        ))
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(map_material_row).collect()
    }

    async fn delete_material(&self, id: MaterialId) -> Result<(), StorageError> {
        let res = sqlx::query("DELETE FROM materials WHERE id = ?1")
            .bind(id_i64("material_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn completed_material_ids(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<MaterialId>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT mc.material_id
                FROM material_completions mc
                JOIN materials m ON m.id = mc.material_id
                WHERE mc.student_id = ?1 AND m.course_id = ?2
                ORDER BY mc.material_id ASC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter()
            .map(|row| get_id(row, "material_id", MaterialId::new))
            .collect()
    }

    async fn set_material_completion(
        &self,
        completion: &MaterialCompletion,
        progress: &Progress,
        enrollment: &Enrollment,
    ) -> Result<(), StorageError> {
        let student = id_i64("student_id", completion.student_id.value())?;
        let material = id_i64("material_id", completion.material_id.value())?;
        let mut tx = self.pool.begin().await.map_err(db)?;
        write_progress(&mut tx, progress).await?;

        if completion.completed {
            sqlx::query(
                r"
                    INSERT INTO material_completions (student_id, material_id, completed_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(student_id, material_id) DO NOTHING
                ",
            )
            .bind(student)
            .bind(material)
            .bind(completion.at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match db(e) {
                // The material row vanished underneath us.
                StorageError::Connection(msg) if msg.contains("FOREIGN KEY") => {
                    StorageError::NotFound
                }
                other => other,
            })?;
        } else {
            sqlx::query(
                "DELETE FROM material_completions WHERE student_id = ?1 AND material_id = ?2",
            )
            .bind(student)
            .bind(material)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        write_enrollment(&mut tx, enrollment).await?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }
}
