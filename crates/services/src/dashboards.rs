use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use learnsy_core::model::{
    CourseId, EnrollmentStatus, Feature, Progress, Role, StudyDay, StudySession, UserId,
};
use learnsy_core::stats::{average_percent, capped_percent};
use storage::repository::{
    CourseQuery, CourseRepository, EnrollmentRepository, MaterialRepository, ProgressRepository,
    QuizRepository, Storage, StudySessionRepository, UserRepository,
};

use crate::Clock;
use crate::access::{AccessGuard, Actor};
use crate::error::DashboardError;
use crate::study_sessions::SessionStats;

/// Number of sessions shown on the student dashboard.
const DASHBOARD_SESSIONS: u32 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCourse {
    pub course_id: CourseId,
    pub title: String,
    pub status: EnrollmentStatus,
    pub percent: u8,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDashboard {
    pub courses: Vec<DashboardCourse>,
    pub total_courses: u32,
    pub completed_courses: u32,
    pub total_study_seconds: u64,
    pub current_streak: u32,
    pub achievements: u32,
    pub average_progress: u8,
    pub recent_sessions: Vec<StudySession>,
    pub session_stats: SessionStats,
}

/// Per-course study time breakdown plus the merged study calendar.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInsights {
    pub study_calendar: Vec<StudyDay>,
    pub courses: Vec<CourseStudyTime>,
    pub longest_streak: u32,
    pub quiz_points: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStudyTime {
    pub course_id: CourseId,
    pub study_seconds: u64,
    pub lessons_completed: u32,
    pub quiz_points: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyCourseStats {
    pub course_id: CourseId,
    pub title: String,
    pub published: bool,
    pub student_count: u32,
    pub completed_count: u32,
    pub average_progress: u8,
    pub material_count: u32,
    pub quiz_count: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyDashboard {
    pub courses: Vec<FacultyCourseStats>,
    pub total_courses: u32,
    pub total_students: u32,
    pub total_materials: u32,
    pub average_progress: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnalytics {
    pub student_id: UserId,
    pub name: String,
    pub status: EnrollmentStatus,
    pub percent: u8,
    pub lessons_completed: u32,
    pub quiz_points: u32,
    pub study_seconds: u64,
    pub current_streak: u32,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAnalytics {
    pub course_id: CourseId,
    pub title: String,
    pub students: Vec<StudentAnalytics>,
    pub average_progress: u8,
    pub completion_rate: u8,
    pub total_study_seconds: u64,
}

#[derive(Clone)]
pub struct DashboardService {
    clock: Clock,
    users: Arc<dyn UserRepository>,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    materials: Arc<dyn MaterialRepository>,
    quizzes: Arc<dyn QuizRepository>,
    sessions: Arc<dyn StudySessionRepository>,
    guard: AccessGuard,
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl DashboardService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            users: Arc::clone(&storage.users),
            courses: Arc::clone(&storage.courses),
            enrollments: Arc::clone(&storage.enrollments),
            progress: Arc::clone(&storage.progress),
            materials: Arc::clone(&storage.materials),
            quizzes: Arc::clone(&storage.quizzes),
            sessions: Arc::clone(&storage.sessions),
            guard: AccessGuard::new(clock, storage),
        }
    }

    /// # Errors
    ///
    /// Returns `AccessError::WrongRole` for faculty callers.
    pub async fn student(&self, actor: Actor) -> Result<StudentDashboard, DashboardError> {
        actor.require(Role::Student)?;
        let today = self.clock.today();
        let enrollments: Vec<_> = self
            .enrollments
            .list_student_enrollments(actor.id)
            .await?
            .into_iter()
            .filter(|e| e.is_active())
            .collect();

        let mut courses = Vec::with_capacity(enrollments.len());
        for enrollment in &enrollments {
            let Ok(course) = self.courses.get_course(enrollment.course_id()).await else {
                continue;
            };
            courses.push(DashboardCourse {
                course_id: course.id(),
                title: course.title().to_owned(),
                status: enrollment.status(),
                percent: enrollment.percent(),
                last_accessed_at: enrollment.last_accessed_at(),
            });
        }

        let progress = self.progress.list_student_progress(actor.id).await?;
        let all_sessions = self.sessions.list_student_sessions(actor.id, None).await?;
        let percents: Vec<u8> = courses.iter().map(|c| c.percent).collect();
        debug!(student = %actor.id, courses = courses.len(), "built student dashboard");

        Ok(StudentDashboard {
            total_courses: count(courses.len()),
            completed_courses: count(
                courses
                    .iter()
                    .filter(|c| c.status == EnrollmentStatus::Completed)
                    .count(),
            ),
            total_study_seconds: progress.iter().map(Progress::total_study_secs).sum(),
            current_streak: progress
                .iter()
                .map(|p| p.streak_on(today))
                .max()
                .unwrap_or(0),
            achievements: count(progress.iter().map(|p| p.achievements().len()).sum()),
            average_progress: average_percent(&percents),
            recent_sessions: all_sessions
                .iter()
                .take(DASHBOARD_SESSIONS as usize)
                .cloned()
                .collect(),
            session_stats: SessionStats::from_sessions(&all_sessions),
            courses,
        })
    }

    /// Detailed study history across courses, part of the analytics add-on.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::PlanRequired` without the advanced analytics feature.
    pub async fn student_insights(&self, actor: Actor) -> Result<StudentInsights, DashboardError> {
        actor.require(Role::Student)?;
        self.guard
            .require_feature(actor.id, Feature::AdvancedAnalytics)
            .await?;
        let progress = self.progress.list_student_progress(actor.id).await?;

        let mut calendar: BTreeMap<NaiveDate, StudyDay> = BTreeMap::new();
        for day in progress.iter().flat_map(Progress::study_calendar) {
            let entry = calendar.entry(day.date).or_insert(StudyDay {
                date: day.date,
                seconds: 0,
                sessions: 0,
            });
            entry.seconds = entry.seconds.saturating_add(day.seconds);
            entry.sessions = entry.sessions.saturating_add(day.sessions);
        }

        Ok(StudentInsights {
            study_calendar: calendar.into_values().collect(),
            courses: progress
                .iter()
                .map(|p| CourseStudyTime {
                    course_id: p.course_id(),
                    study_seconds: p.total_study_secs(),
                    lessons_completed: p.lessons_completed(),
                    quiz_points: p.quiz_points(),
                })
                .collect(),
            longest_streak: progress.iter().map(Progress::longest_streak).max().unwrap_or(0),
            quiz_points: progress.iter().map(Progress::quiz_points).sum(),
        })
    }

    /// # Errors
    ///
    /// Returns `AccessError::WrongRole` for students.
    pub async fn faculty(&self, actor: Actor) -> Result<FacultyDashboard, DashboardError> {
        actor.require(Role::Faculty)?;
        let owned = self
            .courses
            .list_courses(&CourseQuery::by_faculty(actor.id))
            .await?;

        let mut courses = Vec::with_capacity(owned.len());
        for course in owned {
            let enrollments: Vec<_> = self
                .enrollments
                .list_course_enrollments(course.id())
                .await?
                .into_iter()
                .filter(|e| e.is_active())
                .collect();
            let percents: Vec<u8> = enrollments.iter().map(|e| e.percent()).collect();
            courses.push(FacultyCourseStats {
                course_id: course.id(),
                title: course.title().to_owned(),
                published: course.is_published(),
                student_count: count(enrollments.len()),
                completed_count: count(
                    enrollments
                        .iter()
                        .filter(|e| e.status() == EnrollmentStatus::Completed)
                        .count(),
                ),
                average_progress: average_percent(&percents),
                material_count: count(self.materials.list_course_materials(course.id()).await?.len()),
                quiz_count: count(self.quizzes.list_course_quizzes(course.id()).await?.len()),
            });
        }

        let populated: Vec<u8> = courses
            .iter()
            .filter(|c| c.student_count > 0)
            .map(|c| c.average_progress)
            .collect();
        debug!(faculty = %actor.id, courses = courses.len(), "built faculty dashboard");
        Ok(FacultyDashboard {
            total_courses: count(courses.len()),
            total_students: courses.iter().map(|c| c.student_count).sum(),
            total_materials: courses.iter().map(|c| c.material_count).sum(),
            average_progress: average_percent(&populated),
            courses,
        })
    }

    /// Per-student breakdown of one course for its owner.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` unless the caller owns the course.
    pub async fn course_analytics(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<CourseAnalytics, DashboardError> {
        let course = self.guard.owned_course(actor, course_id).await?;
        let today = self.clock.today();
        let enrollments: Vec<_> = self
            .enrollments
            .list_course_enrollments(course_id)
            .await?
            .into_iter()
            .filter(|e| e.is_active())
            .collect();

        let mut students = Vec::with_capacity(enrollments.len());
        for enrollment in &enrollments {
            let user = self.users.get_user(enrollment.student_id()).await?;
            let progress = self
                .progress
                .get_progress(enrollment.student_id(), course_id)
                .await?;
            students.push(StudentAnalytics {
                student_id: user.id(),
                name: user.name().to_owned(),
                status: enrollment.status(),
                percent: enrollment.percent(),
                lessons_completed: progress.as_ref().map_or(0, Progress::lessons_completed),
                quiz_points: progress.as_ref().map_or(0, Progress::quiz_points),
                study_seconds: progress.as_ref().map_or(0, Progress::total_study_secs),
                current_streak: progress.as_ref().map_or(0, |p| p.streak_on(today)),
                last_accessed_at: enrollment.last_accessed_at(),
            });
        }

        let percents: Vec<u8> = students.iter().map(|s| s.percent).collect();
        let completed = students
            .iter()
            .filter(|s| s.status == EnrollmentStatus::Completed)
            .count();
        Ok(CourseAnalytics {
            course_id,
            title: course.title().to_owned(),
            average_progress: average_percent(&percents),
            completion_rate: capped_percent(completed as u64, students.len() as u64),
            total_study_seconds: students.iter().map(|s| s.study_seconds).sum(),
            students,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::progress::ProgressService;
    use crate::test_support::{actor, clock, enrolled_student, published_course, set_plan};
    use learnsy_core::model::Plan;

    #[tokio::test]
    async fn student_dashboard_summarises_enrollments() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let rust = published_course(&storage, owner, &[2]).await;
        let go = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &rust).await;
        crate::enrollments::EnrollmentService::new(clock(), &storage)
            .enroll(student, go.id())
            .await
            .unwrap();

        let progress = ProgressService::new(clock(), &storage);
        progress.complete_lesson(student, go.id(), 0, 0).await.unwrap();
        progress.complete_lesson(student, rust.id(), 0, 0).await.unwrap();
        progress.record_study_time(student, rust.id(), 600).await.unwrap();

        let dash = DashboardService::new(clock(), &storage)
            .student(student)
            .await
            .unwrap();
        assert_eq!(dash.total_courses, 2);
        assert_eq!(dash.completed_courses, 1);
        assert_eq!(dash.average_progress, 75);
        assert_eq!(dash.total_study_seconds, 600);
        assert_eq!(dash.current_streak, 1);
        assert!(dash.achievements >= 3);
    }

    #[tokio::test]
    async fn faculty_dashboard_and_analytics() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let other = actor(&storage, "g@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[2]).await;
        let a = enrolled_student(&storage, "a@example.com", &course).await;
        enrolled_student(&storage, "b@example.com", &course).await;
        ProgressService::new(clock(), &storage)
            .complete_lesson(a, course.id(), 0, 0)
            .await
            .unwrap();

        let service = DashboardService::new(clock(), &storage);
        let dash = service.faculty(owner).await.unwrap();
        assert_eq!(dash.total_courses, 1);
        assert_eq!(dash.total_students, 2);
        assert_eq!(dash.courses[0].average_progress, 25);

        let analytics = service.course_analytics(owner, course.id()).await.unwrap();
        assert_eq!(analytics.students.len(), 2);
        assert_eq!(analytics.completion_rate, 0);
        assert!(matches!(
            service.course_analytics(other, course.id()).await,
            Err(DashboardError::Access(AccessError::NotOwner))
        ));
    }

    #[tokio::test]
    async fn insights_need_advanced_analytics() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let service = DashboardService::new(clock(), &storage);

        assert!(matches!(
            service.student_insights(student).await,
            Err(DashboardError::Access(AccessError::PlanRequired(
                Feature::AdvancedAnalytics
            )))
        ));
        set_plan(&storage, student.id, Plan::Premium).await;
        ProgressService::new(clock(), &storage)
            .record_study_time(student, course.id(), 120)
            .await
            .unwrap();
        let insights = service.student_insights(student).await.unwrap();
        assert_eq!(insights.study_calendar.len(), 1);
        assert_eq!(insights.study_calendar[0].seconds, 120);
    }
}
