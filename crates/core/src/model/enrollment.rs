use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::ids::{CourseId, EnrollmentId, UserId};
use crate::stats::capped_percent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Dropped => "dropped",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "dropped" => Ok(EnrollmentStatus::Dropped),
            other => Err(format!("invalid enrollment status: {other}")),
        }
    }
}

/// Progress snapshot embedded in an enrollment for cheap listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub lessons_completed: u32,
    pub materials_completed: u32,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    id: EnrollmentId,
    student_id: UserId,
    course_id: CourseId,
    status: EnrollmentStatus,
    progress: ProgressSnapshot,
    enrolled_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_accessed_at: DateTime<Utc>,
}

impl Enrollment {
    #[must_use]
    pub fn new(id: EnrollmentId, student_id: UserId, course_id: CourseId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            student_id,
            course_id,
            status: EnrollmentStatus::Active,
            progress: ProgressSnapshot::default(),
            enrolled_at: now,
            completed_at: None,
            last_accessed_at: now,
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        id: EnrollmentId,
        student_id: UserId,
        course_id: CourseId,
        status: EnrollmentStatus,
        progress: ProgressSnapshot,
        enrolled_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        last_accessed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            course_id,
            status,
            progress,
            enrolled_at,
            completed_at,
            last_accessed_at,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: EnrollmentId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> EnrollmentId {
        self.id
    }

    #[must_use]
    pub fn student_id(&self) -> UserId {
        self.student_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn status(&self) -> EnrollmentStatus {
        self.status
    }

    #[must_use]
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress
    }

    #[must_use]
    pub fn percent(&self) -> u8 {
        self.progress.percent
    }

    #[must_use]
    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.last_accessed_at
    }

    /// Dropped enrollments no longer grant access to course content.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status != EnrollmentStatus::Dropped
    }

    /// Recompute the snapshot from completed/total counts.
    ///
    /// Reaching 100% marks the enrollment completed; falling back below 100%
    /// (e.g. a material un-completed) returns it to active.
    pub fn refresh_progress(
        &mut self,
        lessons_completed: u32,
        materials_completed: u32,
        total_lessons: u32,
        total_materials: u32,
        now: DateTime<Utc>,
    ) {
        self.recount(lessons_completed, materials_completed, total_lessons, total_materials, now);
        self.last_accessed_at = now;
    }

    /// Like [`Enrollment::refresh_progress`] but without counting as an
    /// access by the student; used when the course content changes.
    pub fn recount(
        &mut self,
        lessons_completed: u32,
        materials_completed: u32,
        total_lessons: u32,
        total_materials: u32,
        now: DateTime<Utc>,
    ) {
        let done = u64::from(lessons_completed) + u64::from(materials_completed);
        let total = u64::from(total_lessons) + u64::from(total_materials);
        let percent = capped_percent(done, total);
        self.progress = ProgressSnapshot {
            lessons_completed,
            materials_completed,
            percent,
        };

        if self.status == EnrollmentStatus::Dropped {
            return;
        }
        if percent >= 100 {
            if self.status != EnrollmentStatus::Completed {
                self.status = EnrollmentStatus::Completed;
                self.completed_at = Some(now);
            }
        } else {
            self.status = EnrollmentStatus::Active;
            self.completed_at = None;
        }
    }

    pub fn drop_course(&mut self, now: DateTime<Utc>) {
        self.status = EnrollmentStatus::Dropped;
        self.last_accessed_at = now;
    }

    /// Bring a dropped enrollment back, keeping earlier progress.
    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        if self.progress.percent >= 100 {
            self.status = EnrollmentStatus::Completed;
            self.completed_at.get_or_insert(now);
        } else {
            self.status = EnrollmentStatus::Active;
            self.completed_at = None;
        }
        self.last_accessed_at = now;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn enrollment() -> Enrollment {
        Enrollment::new(EnrollmentId::new(1), UserId::new(2), CourseId::new(3), fixed_now())
    }

    #[test]
    fn refresh_computes_combined_percent() {
        let mut e = enrollment();
        e.refresh_progress(1, 1, 3, 1, fixed_now());
        assert_eq!(e.percent(), 50);
        assert_eq!(e.status(), EnrollmentStatus::Active);
    }

    #[test]
    fn completion_and_revert() {
        let mut e = enrollment();
        e.refresh_progress(3, 1, 3, 1, fixed_now());
        assert_eq!(e.percent(), 100);
        assert_eq!(e.status(), EnrollmentStatus::Completed);
        assert!(e.completed_at().is_some());

        e.refresh_progress(3, 0, 3, 1, fixed_now());
        assert_eq!(e.percent(), 75);
        assert_eq!(e.status(), EnrollmentStatus::Active);
        assert!(e.completed_at().is_none());
    }

    #[test]
    fn percent_capped_when_counts_exceed_totals() {
        let mut e = enrollment();
        // a lesson removed from the course after being completed
        e.refresh_progress(4, 0, 3, 0, fixed_now());
        assert_eq!(e.percent(), 100);
    }

    #[test]
    fn recount_reopens_completed_course_without_touching_access() {
        let mut e = enrollment();
        e.refresh_progress(1, 0, 1, 0, fixed_now());
        assert_eq!(e.status(), EnrollmentStatus::Completed);

        let later = fixed_now() + chrono::Duration::days(1);
        e.recount(1, 0, 1, 3, later);
        assert_eq!(e.percent(), 25);
        assert_eq!(e.status(), EnrollmentStatus::Active);
        assert!(e.completed_at().is_none());
        assert_eq!(e.last_accessed_at(), fixed_now());
    }

    #[test]
    fn dropped_stays_dropped_until_reactivated() {
        let mut e = enrollment();
        e.drop_course(fixed_now());
        e.refresh_progress(1, 0, 1, 0, fixed_now());
        assert_eq!(e.status(), EnrollmentStatus::Dropped);
        assert!(!e.is_active());
        e.reactivate(fixed_now());
        assert_eq!(e.status(), EnrollmentStatus::Completed);
    }
}
