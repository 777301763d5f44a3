use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use learnsy_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, EnrollmentStatus, Progress, Role, UserId,
};
use storage::repository::{
    EnrollmentRepository, ProgressRepository, Storage, StorageError, UserRepository,
};

use crate::Clock;
use crate::access::{AccessGuard, Actor};
use crate::error::{EnrollmentError, retry_on_conflict};

/// An enrollment together with the course it points at.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledCourse {
    pub enrollment: Enrollment,
    pub course: Course,
}

/// Roster row shown to the owning faculty member.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStudent {
    pub student_id: UserId,
    pub name: String,
    pub email: String,
    pub status: EnrollmentStatus,
    pub percent: u8,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EnrollmentService {
    clock: Clock,
    enrollments: Arc<dyn EnrollmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    users: Arc<dyn UserRepository>,
    guard: AccessGuard,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            enrollments: Arc::clone(&storage.enrollments),
            progress: Arc::clone(&storage.progress),
            users: Arc::clone(&storage.users),
            guard: AccessGuard::new(clock, storage),
        }
    }

    /// Enroll a student in a published course.
    ///
    /// A dropped enrollment is brought back with its earlier progress instead
    /// of starting over.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::AlreadyEnrolled` for a second enrollment and
    /// `EnrollmentError::NotPublished` for draft courses.
    pub async fn enroll(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        actor.require(Role::Student)?;
        retry_on_conflict(move || self.try_enroll(actor, course_id)).await
    }

    async fn try_enroll(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        let course = self.guard.course(course_id).await?;
        if !course.is_published() {
            return Err(EnrollmentError::NotPublished);
        }

        let now = self.clock.now();
        if let Some(mut existing) = self.enrollments.get_enrollment(actor.id, course_id).await? {
            if existing.is_active() {
                return Err(EnrollmentError::AlreadyEnrolled);
            }
            let progress = self.progress_of(&existing).await?;
            existing.reactivate(now);
            self.progress
                .save_progress_snapshot(&progress, &existing)
                .await?;
            info!(student = %actor.id, course = %course_id, "re-enrolled");
            return Ok(existing);
        }

        let enrollment = Enrollment::new(EnrollmentId::new(0), actor.id, course_id, now);
        let progress = Progress::new(actor.id, course_id, now);
        let id = match self.enrollments.enroll(&enrollment, &progress).await {
            Ok(id) => id,
            Err(StorageError::Conflict) => return Err(EnrollmentError::AlreadyEnrolled),
            Err(e) => return Err(e.into()),
        };
        info!(student = %actor.id, course = %course_id, "enrolled");
        Ok(enrollment.with_id(id))
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` when there is nothing to drop.
    pub async fn drop_course(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        actor.require(Role::Student)?;
        retry_on_conflict(move || self.try_drop_course(actor, course_id)).await
    }

    async fn try_drop_course(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        let mut enrollment = self.guard.active_enrollment(actor.id, course_id).await?;
        let progress = self.progress_of(&enrollment).await?;
        enrollment.drop_course(self.clock.now());
        self.progress
            .save_progress_snapshot(&progress, &enrollment)
            .await?;
        info!(student = %actor.id, course = %course_id, "dropped course");
        Ok(enrollment)
    }

    /// The student's enrollments, most recently accessed first.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::Storage` if repository access fails.
    pub async fn list_for_student(
        &self,
        actor: Actor,
    ) -> Result<Vec<EnrolledCourse>, EnrollmentError> {
        actor.require(Role::Student)?;
        let enrollments = self.enrollments.list_student_enrollments(actor.id).await?;
        let mut out = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            match self.guard.course(enrollment.course_id()).await {
                Ok(course) => out.push(EnrolledCourse { enrollment, course }),
                Err(e) => debug!(course = %enrollment.course_id(), error = %e, "skipping enrollment"),
            }
        }
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` unless the caller owns the course.
    pub async fn list_course_students(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<Vec<CourseStudent>, EnrollmentError> {
        self.guard.owned_course(actor, course_id).await?;
        let enrollments = self.enrollments.list_course_enrollments(course_id).await?;
        let mut roster = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            let user = self.users.get_user(enrollment.student_id()).await?;
            roster.push(CourseStudent {
                student_id: user.id(),
                name: user.name().to_owned(),
                email: user.email().to_owned(),
                status: enrollment.status(),
                percent: enrollment.percent(),
                enrolled_at: enrollment.enrolled_at(),
                last_accessed_at: enrollment.last_accessed_at(),
            });
        }
        Ok(roster)
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` unless the student has an active
    /// (or completed) enrollment.
    pub async fn require_enrollment(
        &self,
        student: UserId,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        Ok(self.guard.active_enrollment(student, course_id).await?)
    }

    /// Stored progress, or an unsaved record for enrollments that predate one.
    async fn progress_of(&self, enrollment: &Enrollment) -> Result<Progress, EnrollmentError> {
        let student = enrollment.student_id();
        let course = enrollment.course_id();
        Ok(self
            .progress
            .get_progress(student, course)
            .await?
            .unwrap_or_else(|| Progress::new(student, course, enrollment.enrolled_at())))
    }
}
