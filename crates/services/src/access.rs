//! Caller identity and the ownership / enrollment / plan checks shared by services.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use learnsy_core::model::{Course, CourseId, Enrollment, Feature, Role, Subscription, UserId};
use storage::repository::{
    CourseRepository, EnrollmentRepository, Storage, StorageError, SubscriptionRepository,
};

use crate::Clock;
use crate::error::{AccessError, LookupError};

/// Authenticated caller, as established from an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    /// # Errors
    ///
    /// Returns `AccessError::WrongRole` when the caller lacks `role`.
    pub fn require(&self, role: Role) -> Result<(), AccessError> {
        if self.role == role {
            Ok(())
        } else {
            warn!(user = %self.id, required = %role, "rejected: wrong role");
            Err(AccessError::WrongRole(role))
        }
    }
}

/// Converts `StorageError::NotFound` into a named `AccessError::NotFound`.
pub(crate) trait FoundExt<T> {
    fn or_missing(self, what: &'static str) -> Result<T, LookupError>;
}

impl<T> FoundExt<T> for Result<T, StorageError> {
    fn or_missing(self, what: &'static str) -> Result<T, LookupError> {
        match self {
            Ok(value) => Ok(value),
            Err(StorageError::NotFound) => Err(AccessError::NotFound(what).into()),
            Err(other) => Err(other.into()),
        }
    }
}

/// How the caller relates to a course they are allowed to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseAccess {
    Owner,
    Student(Enrollment),
}

impl CourseAccess {
    #[must_use]
    pub fn is_owner(&self) -> bool {
        matches!(self, CourseAccess::Owner)
    }
}

#[derive(Clone)]
pub(crate) struct AccessGuard {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl AccessGuard {
    pub(crate) fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            courses: Arc::clone(&storage.courses),
            enrollments: Arc::clone(&storage.enrollments),
            subscriptions: Arc::clone(&storage.subscriptions),
        }
    }

    pub(crate) async fn course(&self, id: CourseId) -> Result<Course, LookupError> {
        self.courses.get_course(id).await.or_missing("course")
    }

    /// Load a course the faculty caller owns.
    pub(crate) async fn owned_course(
        &self,
        actor: Actor,
        id: CourseId,
    ) -> Result<Course, LookupError> {
        actor.require(Role::Faculty)?;
        let course = self.course(id).await?;
        if !course.is_owned_by(actor.id) {
            warn!(user = %actor.id, course = %id, "rejected: not course owner");
            return Err(AccessError::NotOwner.into());
        }
        Ok(course)
    }

    /// The student's enrollment, provided it has not been dropped.
    pub(crate) async fn active_enrollment(
        &self,
        student: UserId,
        course_id: CourseId,
    ) -> Result<Enrollment, LookupError> {
        match self.enrollments.get_enrollment(student, course_id).await? {
            Some(enrollment) if enrollment.is_active() => Ok(enrollment),
            _ => {
                warn!(user = %student, course = %course_id, "rejected: not enrolled");
                Err(AccessError::NotEnrolled.into())
            }
        }
    }

    /// Owners and actively enrolled students may see a course's content.
    pub(crate) async fn course_access(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<(Course, CourseAccess), LookupError> {
        let course = self.course(course_id).await?;
        if course.is_owned_by(actor.id) {
            return Ok((course, CourseAccess::Owner));
        }
        match actor.role {
            Role::Student => {
                let enrollment = self.active_enrollment(actor.id, course_id).await?;
                Ok((course, CourseAccess::Student(enrollment)))
            }
            Role::Faculty => {
                warn!(user = %actor.id, course = %course_id, "rejected: not course owner");
                Err(AccessError::NotOwner.into())
            }
        }
    }

    /// The user's subscription, creating a free one on first access.
    pub(crate) async fn subscription(&self, user: UserId) -> Result<Subscription, StorageError> {
        if let Some(existing) = self.subscriptions.get_subscription(user).await? {
            return Ok(existing);
        }
        let free = Subscription::free(user, self.clock.now());
        self.subscriptions.save_subscription(&free).await?;
        Ok(free)
    }

    pub(crate) async fn require_feature(
        &self,
        user: UserId,
        feature: Feature,
    ) -> Result<Subscription, LookupError> {
        let subscription = self.subscription(user).await?;
        if subscription.has_access(feature, self.clock.now()) {
            Ok(subscription)
        } else {
            warn!(user = %user, feature = %feature, "rejected: plan required");
            Err(AccessError::PlanRequired(feature).into())
        }
    }
}
