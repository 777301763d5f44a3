use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use learnsy_core::model::{
    AchievementKind, CourseId, Enrollment, EnrollmentStatus, LessonRef, Progress, Role,
};
use storage::repository::{MaterialRepository, ProgressRepository, Storage, StorageError};

use crate::Clock;
use crate::access::{AccessGuard, Actor};
use crate::error::{ProgressServiceError, retry_on_conflict};
use crate::materials::{material_counts, refresh};

/// Progress of one course as shown to its student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub course_id: CourseId,
    pub course_title: String,
    pub status: EnrollmentStatus,
    pub percent: u8,
    pub total_lessons: u32,
    /// Streak as of today; a lapsed streak reads 0.
    pub current_streak: u32,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompletion {
    pub newly_completed: bool,
    pub percent: u8,
    pub new_achievements: Vec<AchievementKind>,
    pub progress: Progress,
}

#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    progress: Arc<dyn ProgressRepository>,
    materials: Arc<dyn MaterialRepository>,
    guard: AccessGuard,
}

impl ProgressService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            progress: Arc::clone(&storage.progress),
            materials: Arc::clone(&storage.materials),
            guard: AccessGuard::new(clock, storage),
        }
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` unless the student is enrolled.
    pub async fn course_progress(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<CourseProgress, ProgressServiceError> {
        actor.require(Role::Student)?;
        let enrollment = self.guard.active_enrollment(actor.id, course_id).await?;
        let progress = self.load(&enrollment).await?;
        self.view(enrollment, progress).await
    }

    /// Every course the student has progress in, dropped courses excluded.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if repository access fails.
    pub async fn all_progress(
        &self,
        actor: Actor,
    ) -> Result<Vec<CourseProgress>, ProgressServiceError> {
        actor.require(Role::Student)?;
        let records = self.progress.list_student_progress(actor.id).await?;
        let mut out = Vec::with_capacity(records.len());
        for progress in records {
            let Ok(enrollment) = self
                .guard
                .active_enrollment(actor.id, progress.course_id())
                .await
            else {
                continue;
            };
            out.push(self.view(enrollment, progress).await?);
        }
        Ok(out)
    }

    /// Mark a lesson done. Repeating a completion changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Course` for indices outside the course.
    pub async fn complete_lesson(
        &self,
        actor: Actor,
        course_id: CourseId,
        module: usize,
        lesson: usize,
    ) -> Result<LessonCompletion, ProgressServiceError> {
        actor.require(Role::Student)?;
        retry_on_conflict(move || self.try_complete_lesson(actor, course_id, module, lesson)).await
    }

    async fn try_complete_lesson(
        &self,
        actor: Actor,
        course_id: CourseId,
        module: usize,
        lesson: usize,
    ) -> Result<LessonCompletion, ProgressServiceError> {
        let course = self.guard.course(course_id).await?;
        let mut enrollment = self.guard.active_enrollment(actor.id, course_id).await?;
        course.lesson(module, lesson)?;

        let now = self.clock.now();
        let mut progress = self.load(&enrollment).await?;
        if !progress.complete_lesson(LessonRef { module, lesson }, now) {
            debug!(student = %actor.id, course = %course_id, module, lesson, "lesson already completed");
            return Ok(LessonCompletion {
                newly_completed: false,
                percent: enrollment.percent(),
                new_achievements: Vec::new(),
                progress,
            });
        }
        progress.update_streak(now.date_naive());

        let (materials_done, total_materials) =
            material_counts(self.materials.as_ref(), actor.id, course_id).await?;
        refresh(
            &mut enrollment,
            &course,
            progress.lessons_completed(),
            materials_done,
            total_materials,
            now,
        );
        let completed = enrollment.status() == EnrollmentStatus::Completed;
        let new_achievements = progress.evaluate_achievements(now, completed);

        self.progress
            .save_progress_snapshot(&progress, &enrollment)
            .await?;
        info!(
            student = %actor.id,
            course = %course_id,
            module,
            lesson,
            percent = enrollment.percent(),
            "completed lesson"
        );
        Ok(LessonCompletion {
            newly_completed: true,
            percent: enrollment.percent(),
            new_achievements,
            progress,
        })
    }

    /// Credit study time outside of a tracked session.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` unless the student is enrolled.
    pub async fn record_study_time(
        &self,
        actor: Actor,
        course_id: CourseId,
        seconds: u64,
    ) -> Result<Progress, ProgressServiceError> {
        actor.require(Role::Student)?;
        retry_on_conflict(move || self.try_record_study_time(actor, course_id, seconds)).await
    }

    async fn try_record_study_time(
        &self,
        actor: Actor,
        course_id: CourseId,
        seconds: u64,
    ) -> Result<Progress, ProgressServiceError> {
        let mut enrollment = self.guard.active_enrollment(actor.id, course_id).await?;
        let now = self.clock.now();
        let mut progress = self.load(&enrollment).await?;
        progress.record_study(now, seconds);
        progress.evaluate_achievements(now, enrollment.status() == EnrollmentStatus::Completed);
        enrollment.touch(now);
        self.progress
            .save_progress_snapshot(&progress, &enrollment)
            .await?;
        debug!(student = %actor.id, course = %course_id, seconds, "recorded study time");
        Ok(progress)
    }

    async fn load(&self, enrollment: &Enrollment) -> Result<Progress, StorageError> {
        Ok(self
            .progress
            .get_progress(enrollment.student_id(), enrollment.course_id())
            .await?
            .unwrap_or_else(|| {
                Progress::new(
                    enrollment.student_id(),
                    enrollment.course_id(),
                    enrollment.enrolled_at(),
                )
            }))
    }

    async fn view(
        &self,
        enrollment: Enrollment,
        progress: Progress,
    ) -> Result<CourseProgress, ProgressServiceError> {
        let course = self.guard.course(enrollment.course_id()).await?;
        Ok(CourseProgress {
            course_id: course.id(),
            course_title: course.title().to_owned(),
            status: enrollment.status(),
            percent: enrollment.percent(),
            total_lessons: course.total_lessons(),
            current_streak: progress.streak_on(self.clock.today()),
            progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::test_support::{actor, clock, enrolled_student, published_course};
    use chrono::Duration;
    use learnsy_core::model::CourseError;

    #[tokio::test]
    async fn lesson_completion_is_idempotent_and_capped() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[2]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let service = ProgressService::new(clock(), &storage);

        let first = service.complete_lesson(student, course.id(), 0, 0).await.unwrap();
        assert!(first.newly_completed);
        assert_eq!(first.percent, 50);
        assert_eq!(first.new_achievements, vec![AchievementKind::FirstLesson]);

        let again = service.complete_lesson(student, course.id(), 0, 0).await.unwrap();
        assert!(!again.newly_completed);
        assert_eq!(again.percent, 50);

        let last = service.complete_lesson(student, course.id(), 0, 1).await.unwrap();
        assert_eq!(last.percent, 100);
        assert!(last.new_achievements.contains(&AchievementKind::CourseCompleted));

        let view = service.course_progress(student, course.id()).await.unwrap();
        assert_eq!(view.status, EnrollmentStatus::Completed);
        assert_eq!(view.percent, 100);
        assert_eq!(view.progress.lessons_completed(), 2);
    }

    #[tokio::test]
    async fn out_of_range_lesson_is_rejected() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let service = ProgressService::new(clock(), &storage);

        let err = service.complete_lesson(student, course.id(), 0, 5).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressServiceError::Course(CourseError::LessonOutOfRange { module: 0, lesson: 5 })
        ));
    }

    #[tokio::test]
    async fn streak_follows_calendar_days() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;

        let day = |n: i64| ProgressService::new(clock().advanced(Duration::days(n)), &storage);
        day(0).record_study_time(student, course.id(), 60).await.unwrap();
        day(0).record_study_time(student, course.id(), 60).await.unwrap();
        let p = day(1).record_study_time(student, course.id(), 60).await.unwrap();
        assert_eq!(p.current_streak(), 2);
        let p = day(2).record_study_time(student, course.id(), 60).await.unwrap();
        assert_eq!(p.current_streak(), 3);
        assert!(p.has_achievement(AchievementKind::Streak3));

        let p = day(5).record_study_time(student, course.id(), 60).await.unwrap();
        assert_eq!(p.current_streak(), 1);
        assert_eq!(p.longest_streak(), 3);
        assert_eq!(p.total_study_secs(), 300);
        assert_eq!(p.study_calendar().len(), 4);
    }

    #[tokio::test]
    async fn outsiders_have_no_progress() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let outsider = actor(&storage, "o@example.com", Role::Student).await;
        let service = ProgressService::new(clock(), &storage);

        assert!(matches!(
            service.course_progress(outsider, course.id()).await,
            Err(ProgressServiceError::Access(AccessError::NotEnrolled))
        ));
        assert!(service.all_progress(outsider).await.unwrap().is_empty());
    }
}
