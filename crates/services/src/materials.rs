use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use learnsy_core::model::{
    Course, CourseId, Enrollment, Feature, Material, MaterialDraft, MaterialId, MaterialSource,
    Progress, Role, Subscription, UserId, kind_index,
};
use storage::repository::{
    EnrollmentRepository, MaterialCompletion, MaterialRepository, ProgressRepository, Storage,
    StorageError,
};

use crate::Clock;
use crate::access::{AccessGuard, Actor, CourseAccess, FoundExt};
use crate::error::{AccessError, MaterialServiceError, retry_on_conflict};

/// File received from an upload form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewMaterialSource {
    Upload(MaterialUpload),
    Url(String),
}

/// A material as listed for a particular viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialView {
    #[serde(flatten)]
    pub material: Material,
    pub locked: bool,
    pub completed: bool,
}

/// Bytes of a stored upload, ready to stream back.
#[derive(Debug, Clone)]
pub struct MaterialFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionToggle {
    pub material_id: MaterialId,
    pub completed: bool,
    pub percent: u8,
}

#[derive(Clone)]
pub struct MaterialService {
    clock: Clock,
    materials: Arc<dyn MaterialRepository>,
    progress: Arc<dyn ProgressRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    guard: AccessGuard,
    upload_dir: PathBuf,
}

impl MaterialService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            clock,
            materials: Arc::clone(&storage.materials),
            progress: Arc::clone(&storage.progress),
            enrollments: Arc::clone(&storage.enrollments),
            guard: AccessGuard::new(clock, storage),
            upload_dir: upload_dir.into(),
        }
    }

    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Attach a file or link to a course the caller owns, then recount the
    /// course's enrollments against the larger material total.
    ///
    /// Uploaded bytes are written under a generated name before the record is
    /// stored; the file is removed again if storing fails.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` for non-owners, `MaterialServiceError::Material`
    /// for validation failures and `MaterialServiceError::Io` if the file cannot be written.
    pub async fn add_material(
        &self,
        actor: Actor,
        course_id: CourseId,
        draft: MaterialDraft,
        source: NewMaterialSource,
    ) -> Result<Material, MaterialServiceError> {
        self.guard.owned_course(actor, course_id).await?;
        let existing = self.materials.list_course_materials(course_id).await?;
        let next_position = existing
            .iter()
            .map(Material::position)
            .max()
            .map_or(0, |p| p.saturating_add(1));

        let (source, bytes) = match source {
            NewMaterialSource::Url(raw) => (MaterialSource::url(&raw)?, None),
            NewMaterialSource::Upload(upload) => {
                let source = MaterialSource::File {
                    stored_name: stored_name_for(&upload.file_name),
                    original_name: upload.file_name.trim().to_owned(),
                    content_type: upload.content_type,
                    size_bytes: u64::try_from(upload.bytes.len()).unwrap_or(u64::MAX),
                };
                (source, Some(upload.bytes))
            }
        };
        let material = Material::new(
            MaterialId::new(0),
            course_id,
            actor.id,
            draft,
            source,
            next_position,
            self.clock.now(),
        )?;

        let stored = match (material.source().stored_file_name(), bytes) {
            (Some(name), Some(bytes)) => {
                tokio::fs::create_dir_all(&self.upload_dir).await?;
                let path = self.upload_dir.join(name);
                tokio::fs::write(&path, bytes).await?;
                Some(path)
            }
            _ => None,
        };

        let id = match self.materials.insert_material(&material).await {
            Ok(id) => id,
            Err(e) => {
                if let Some(path) = stored {
                    remove_quietly(&path).await;
                }
                return Err(e.into());
            }
        };
        info!(material = %id, course = %course_id, kind = %material.kind(), "added material");
        self.recount(course_id).await?;
        Ok(material.with_id(id))
    }

    /// Owners see every material unlocked; enrolled students see every
    /// material with `locked` set where their plan stops short.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` / `NotOwner` for outsiders.
    pub async fn list_for_course(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<Vec<MaterialView>, MaterialServiceError> {
        let (_, access) = self.guard.course_access(actor, course_id).await?;
        let materials = self.materials.list_course_materials(course_id).await?;

        let CourseAccess::Student(_) = access else {
            return Ok(materials
                .into_iter()
                .map(|material| MaterialView {
                    material,
                    locked: false,
                    completed: false,
                })
                .collect());
        };

        let subscription = self.guard.subscription(actor.id).await?;
        let completed = self
            .materials
            .completed_material_ids(actor.id, course_id)
            .await?;
        let now = self.clock.now();
        let locked: Vec<bool> = materials
            .iter()
            .map(|m| !viewable(&subscription, &materials, m, now))
            .collect();
        debug!(course = %course_id, count = materials.len(), "listed materials");
        Ok(materials
            .into_iter()
            .zip(locked)
            .map(|(material, locked)| MaterialView {
                completed: completed.contains(&material.id()),
                material,
                locked,
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns `AccessError::PlanRequired` when the viewer's plan does not
    /// cover this material.
    pub async fn get_for_viewer(
        &self,
        actor: Actor,
        material_id: MaterialId,
    ) -> Result<Material, MaterialServiceError> {
        let material = self
            .materials
            .get_material(material_id)
            .await
            .or_missing("material")?;
        let (_, access) = self.guard.course_access(actor, material.course_id()).await?;
        if let CourseAccess::Student(_) = access {
            self.ensure_viewable(actor.id, &material).await?;
        }
        Ok(material)
    }

    /// # Errors
    ///
    /// Returns `MaterialServiceError::NoFile` for link materials and
    /// `MaterialServiceError::Io` if the stored file is unreadable.
    pub async fn read_file(
        &self,
        actor: Actor,
        material_id: MaterialId,
    ) -> Result<MaterialFile, MaterialServiceError> {
        let material = self.get_for_viewer(actor, material_id).await?;
        let MaterialSource::File {
            stored_name,
            original_name,
            content_type,
            ..
        } = material.source()
        else {
            return Err(MaterialServiceError::NoFile);
        };
        let bytes = tokio::fs::read(self.upload_dir.join(stored_name)).await?;
        Ok(MaterialFile {
            file_name: original_name.clone(),
            content_type: content_type.clone(),
            bytes,
        })
    }

    /// Remove a material; its stored file is deleted on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` unless the caller owns the course.
    pub async fn delete_material(
        &self,
        actor: Actor,
        material_id: MaterialId,
    ) -> Result<(), MaterialServiceError> {
        let material = self
            .materials
            .get_material(material_id)
            .await
            .or_missing("material")?;
        self.guard.owned_course(actor, material.course_id()).await?;
        self.materials.delete_material(material_id).await?;
        if let Some(name) = material.source().stored_file_name() {
            remove_quietly(&self.upload_dir.join(name)).await;
        }
        info!(material = %material_id, "deleted material");
        self.recount(material.course_id()).await
    }

    async fn recount(&self, course_id: CourseId) -> Result<(), MaterialServiceError> {
        let enrollments = self
            .enrollments
            .recount_course(course_id, self.clock.now())
            .await?;
        debug!(course = %course_id, enrollments, "recounted course progress");
        Ok(())
    }

    /// Flip the caller's completion flag and recompute their course percentage.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` for students outside the course and
    /// `AccessError::PlanRequired` for locked materials.
    pub async fn toggle_completion(
        &self,
        actor: Actor,
        material_id: MaterialId,
    ) -> Result<CompletionToggle, MaterialServiceError> {
        actor.require(Role::Student)?;
        retry_on_conflict(move || self.try_toggle_completion(actor, material_id)).await
    }

    async fn try_toggle_completion(
        &self,
        actor: Actor,
        material_id: MaterialId,
    ) -> Result<CompletionToggle, MaterialServiceError> {
        let material = self
            .materials
            .get_material(material_id)
            .await
            .or_missing("material")?;
        let course = self.guard.course(material.course_id()).await?;
        let mut enrollment = self
            .guard
            .active_enrollment(actor.id, course.id())
            .await?;
        self.ensure_viewable(actor.id, &material).await?;

        // Read before the completions: any completion written after this
        // point bumps the revision and fails our write.
        let progress = self
            .progress
            .get_progress(actor.id, course.id())
            .await?
            .unwrap_or_else(|| Progress::new(actor.id, course.id(), enrollment.enrolled_at()));
        let done = self
            .materials
            .completed_material_ids(actor.id, course.id())
            .await?;
        let completed = !done.contains(&material_id);
        let materials_done = if completed { done.len() + 1 } else { done.len().saturating_sub(1) };

        let now = self.clock.now();
        let total_materials = self.materials.list_course_materials(course.id()).await?.len();
        refresh(
            &mut enrollment,
            &course,
            progress.lessons_completed(),
            materials_done,
            total_materials,
            now,
        );

        let completion = MaterialCompletion {
            student_id: actor.id,
            material_id,
            completed,
            at: now,
        };
        self.materials
            .set_material_completion(&completion, &progress, &enrollment)
            .await?;
        info!(
            student = %actor.id,
            material = %material_id,
            completed,
            percent = enrollment.percent(),
            "toggled material completion"
        );
        Ok(CompletionToggle {
            material_id,
            completed,
            percent: enrollment.percent(),
        })
    }

    async fn ensure_viewable(
        &self,
        user: UserId,
        material: &Material,
    ) -> Result<(), MaterialServiceError> {
        let Some(feature) = Feature::unlimited(material.kind()) else {
            return Ok(());
        };
        let subscription = self.guard.subscription(user).await?;
        let siblings = self
            .materials
            .list_course_materials(material.course_id())
            .await?;
        if viewable(&subscription, &siblings, material, self.clock.now()) {
            Ok(())
        } else {
            warn!(user = %user, material = %material.id(), "rejected: material locked by plan");
            Err(AccessError::PlanRequired(feature).into())
        }
    }
}

/// Completed and total material counts for a student's course.
pub(crate) async fn material_counts(
    materials: &dyn MaterialRepository,
    student: UserId,
    course: CourseId,
) -> Result<(usize, usize), StorageError> {
    let done = materials.completed_material_ids(student, course).await?.len();
    let total = materials.list_course_materials(course).await?.len();
    Ok((done, total))
}

/// Recompute an enrollment snapshot from raw counts.
pub(crate) fn refresh(
    enrollment: &mut Enrollment,
    course: &Course,
    lessons_done: u32,
    materials_done: usize,
    total_materials: usize,
    now: DateTime<Utc>,
) {
    enrollment.refresh_progress(
        lessons_done,
        u32::try_from(materials_done).unwrap_or(u32::MAX),
        course.total_lessons(),
        u32::try_from(total_materials).unwrap_or(u32::MAX),
        now,
    );
}

fn viewable(
    subscription: &Subscription,
    ordered: &[Material],
    material: &Material,
    now: DateTime<Utc>,
) -> bool {
    kind_index(ordered, material.id())
        .is_none_or(|index| subscription.can_view(material.kind(), index, now))
}

/// Unique on-disk name keeping a sanitized extension of the original.
fn stored_name_for(original: &str) -> String {
    let extension = Path::new(original.trim())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            e.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|e| !e.is_empty() && e.len() <= 10);
    match extension {
        Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
        None => Uuid::new_v4().to_string(),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove stored file");
    }
}
