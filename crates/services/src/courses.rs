use std::sync::Arc;

use tracing::{debug, info, warn};

use learnsy_core::model::{Course, CourseDraft, CourseId, Role};
use storage::repository::{CourseQuery, CourseRepository, EnrollmentRepository, Storage};

use crate::Clock;
use crate::access::{AccessGuard, Actor};
use crate::error::{AccessError, CourseServiceError};

/// Course authoring and catalogue reads.
#[derive(Clone)]
pub struct CourseService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    guard: AccessGuard,
}

impl CourseService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            courses: Arc::clone(&storage.courses),
            enrollments: Arc::clone(&storage.enrollments),
            guard: AccessGuard::new(clock, storage),
        }
    }

    /// Create an unpublished course owned by the calling faculty member.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::WrongRole` for students and
    /// `CourseServiceError::Course` for validation failures.
    pub async fn create_course(
        &self,
        actor: Actor,
        draft: CourseDraft,
    ) -> Result<Course, CourseServiceError> {
        actor.require(Role::Faculty)?;
        let course = Course::new(CourseId::new(0), actor.id, draft, self.clock.now())?;
        let id = self.courses.insert_course(&course).await?;
        info!(course = %id, faculty = %actor.id, "created course");
        Ok(course.with_id(id))
    }

    /// Replace a course's details and outline. Enrollments are recounted
    /// when the number of lessons changes.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` unless the caller owns the course.
    pub async fn update_course(
        &self,
        actor: Actor,
        id: CourseId,
        draft: CourseDraft,
    ) -> Result<Course, CourseServiceError> {
        let mut course = self.guard.owned_course(actor, id).await?;
        let lessons_before = course.total_lessons();
        let now = self.clock.now();
        course.update(draft, now)?;
        self.courses.update_course(&course).await?;
        info!(course = %id, "updated course");
        if course.total_lessons() != lessons_before {
            let enrollments = self.enrollments.recount_course(id, now).await?;
            debug!(course = %id, enrollments, lessons = course.total_lessons(), "recounted course progress");
        }
        Ok(course)
    }

    /// Delete a course together with everything that hangs off it.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` unless the caller owns the course.
    pub async fn delete_course(&self, actor: Actor, id: CourseId) -> Result<(), CourseServiceError> {
        self.guard.owned_course(actor, id).await?;
        self.courses.delete_course(id).await?;
        info!(course = %id, "deleted course");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` unless the caller owns the course.
    pub async fn set_published(
        &self,
        actor: Actor,
        id: CourseId,
        published: bool,
    ) -> Result<Course, CourseServiceError> {
        let mut course = self.guard.owned_course(actor, id).await?;
        course.set_published(published, self.clock.now());
        self.courses.update_course(&course).await?;
        info!(course = %id, published, "changed course visibility");
        Ok(course)
    }

    /// Published courses are public; drafts are only visible to their owner
    /// and read as missing for everyone else.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotFound` for unknown or hidden courses.
    pub async fn get_course(
        &self,
        viewer: Option<Actor>,
        id: CourseId,
    ) -> Result<Course, CourseServiceError> {
        let course = self.guard.course(id).await?;
        let is_owner = viewer.is_some_and(|a| course.is_owned_by(a.id));
        if course.is_published() || is_owner {
            debug!(course = %id, "loaded course");
            return Ok(course);
        }
        warn!(course = %id, "rejected: draft course requested by non-owner");
        Err(AccessError::NotFound("course").into())
    }

    /// Catalogue listing; only published courses are ever returned.
    ///
    /// # Errors
    ///
    /// Returns `CourseServiceError::Storage` if repository access fails.
    pub async fn list_published(
        &self,
        query: CourseQuery,
    ) -> Result<Vec<Course>, CourseServiceError> {
        let query = CourseQuery {
            published_only: true,
            ..query
        };
        Ok(self.courses.list_courses(&query).await?)
    }

    /// # Errors
    ///
    /// Returns `AccessError::WrongRole` for students.
    pub async fn list_faculty_courses(
        &self,
        actor: Actor,
    ) -> Result<Vec<Course>, CourseServiceError> {
        actor.require(Role::Faculty)?;
        Ok(self
            .courses
            .list_courses(&CourseQuery::by_faculty(actor.id))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressService;
    use crate::test_support::{actor, clock, draft, enrolled_student, published_course};
    use learnsy_core::model::{CourseError, EnrollmentStatus};

    #[tokio::test]
    async fn only_faculty_create_courses() {
        let storage = Storage::in_memory();
        let service = CourseService::new(clock(), &storage);
        let student = actor(&storage, "s@example.com", Role::Student).await;

        let err = service
            .create_course(student, draft("Rust", &[1]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CourseServiceError::Access(AccessError::WrongRole(Role::Faculty))
        ));
    }

    #[tokio::test]
    async fn owner_edits_and_others_are_rejected() {
        let storage = Storage::in_memory();
        let service = CourseService::new(clock(), &storage);
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let other = actor(&storage, "g@example.com", Role::Faculty).await;

        let course = service.create_course(owner, draft("Rust", &[2])).await.unwrap();
        assert!(!course.is_published());

        let err = service
            .update_course(other, course.id(), draft("Mine now", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, CourseServiceError::Access(AccessError::NotOwner)));

        let updated = service
            .update_course(owner, course.id(), draft("Rust 2", &[1, 1]))
            .await
            .unwrap();
        assert_eq!(updated.title(), "Rust 2");
        assert_eq!(updated.total_lessons(), 2);

        let err = service
            .update_course(owner, course.id(), draft("  ", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, CourseServiceError::Course(CourseError::EmptyTitle)));
    }

    #[tokio::test]
    async fn drafts_are_hidden_until_published() {
        let storage = Storage::in_memory();
        let service = CourseService::new(clock(), &storage);
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let student = actor(&storage, "s@example.com", Role::Student).await;
        let course = service.create_course(owner, draft("Rust", &[1])).await.unwrap();

        assert!(service.get_course(Some(owner), course.id()).await.is_ok());
        assert!(matches!(
            service.get_course(Some(student), course.id()).await,
            Err(CourseServiceError::Access(AccessError::NotFound("course")))
        ));
        assert!(service.list_published(CourseQuery::default()).await.unwrap().is_empty());

        service.set_published(owner, course.id(), true).await.unwrap();
        assert!(service.get_course(None, course.id()).await.is_ok());
        let listed = service.list_published(CourseQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);

        let mine = service.list_faculty_courses(owner).await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn delete_requires_owner() {
        let storage = Storage::in_memory();
        let service = CourseService::new(clock(), &storage);
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let other = actor(&storage, "g@example.com", Role::Faculty).await;
        let course = service.create_course(owner, draft("Rust", &[1])).await.unwrap();

        assert!(service.delete_course(other, course.id()).await.is_err());
        service.delete_course(owner, course.id()).await.unwrap();
        assert!(matches!(
            service.get_course(Some(owner), course.id()).await,
            Err(CourseServiceError::Access(AccessError::NotFound("course")))
        ));
    }

    #[tokio::test]
    async fn adding_lessons_reopens_completed_enrollments() {
        let storage = Storage::in_memory();
        let service = CourseService::new(clock(), &storage);
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let progress = ProgressService::new(clock(), &storage);

        progress.complete_lesson(student, course.id(), 0, 0).await.unwrap();
        let view = progress.course_progress(student, course.id()).await.unwrap();
        assert_eq!(view.status, EnrollmentStatus::Completed);

        service
            .update_course(owner, course.id(), draft("Rust", &[1, 1]))
            .await
            .unwrap();
        let view = progress.course_progress(student, course.id()).await.unwrap();
        assert_eq!(view.percent, 50);
        assert_eq!(view.status, EnrollmentStatus::Active);

        service
            .update_course(owner, course.id(), draft("Rust", &[1]))
            .await
            .unwrap();
        let view = progress.course_progress(student, course.id()).await.unwrap();
        assert_eq!(view.percent, 100);
        assert_eq!(view.status, EnrollmentStatus::Completed);
    }
}
