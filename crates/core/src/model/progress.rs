use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{CourseId, UserId};
use crate::time::days_between;

/// Oldest calendar entries beyond this many days are discarded.
pub const CALENDAR_RETENTION: usize = 366;

const TEN_HOURS_SECS: u64 = 10 * 60 * 60;

//
// ─── SUPPORTING TYPES ──────────────────────────────────────────────────────────
//

/// Position of a lesson inside a course (`module`, `lesson` are 0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LessonRef {
    pub module: usize,
    pub lesson: usize,
}

/// Study time aggregated for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDay {
    pub date: NaiveDate,
    pub seconds: u64,
    pub sessions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AchievementKind {
    #[serde(rename = "first_lesson")]
    FirstLesson,
    #[serde(rename = "five_lessons")]
    FiveLessons,
    #[serde(rename = "streak_3")]
    Streak3,
    #[serde(rename = "streak_7")]
    Streak7,
    #[serde(rename = "streak_30")]
    Streak30,
    #[serde(rename = "ten_hours")]
    TenHours,
    #[serde(rename = "quiz_ace")]
    QuizAce,
    #[serde(rename = "course_completed")]
    CourseCompleted,
}

impl AchievementKind {
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            AchievementKind::FirstLesson => "First lesson completed",
            AchievementKind::FiveLessons => "Five lessons completed",
            AchievementKind::Streak3 => "3-day study streak",
            AchievementKind::Streak7 => "7-day study streak",
            AchievementKind::Streak30 => "30-day study streak",
            AchievementKind::TenHours => "10 hours of study",
            AchievementKind::QuizAce => "Perfect quiz score",
            AchievementKind::CourseCompleted => "Course completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub kind: AchievementKind,
    pub title: String,
    pub earned_at: DateTime<Utc>,
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// Per-student, per-course counters and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    student_id: UserId,
    course_id: CourseId,
    completed_lessons: Vec<LessonRef>,
    quiz_points: u32,
    total_study_secs: u64,
    current_streak: u32,
    longest_streak: u32,
    last_study_date: Option<NaiveDate>,
    study_calendar: Vec<StudyDay>,
    achievements: Vec<Achievement>,
    updated_at: DateTime<Utc>,
    /// Bumped by the store on every write; 0 for a record never stored.
    #[serde(skip)]
    revision: u64,
}

impl Progress {
    #[must_use]
    pub fn new(student_id: UserId, course_id: CourseId, now: DateTime<Utc>) -> Self {
        Self {
            student_id,
            course_id,
            completed_lessons: Vec::new(),
            quiz_points: 0,
            total_study_secs: 0,
            current_streak: 0,
            longest_streak: 0,
            last_study_date: None,
            study_calendar: Vec::new(),
            achievements: Vec::new(),
            updated_at: now,
            revision: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        student_id: UserId,
        course_id: CourseId,
        mut completed_lessons: Vec<LessonRef>,
        quiz_points: u32,
        total_study_secs: u64,
        current_streak: u32,
        longest_streak: u32,
        last_study_date: Option<NaiveDate>,
        study_calendar: Vec<StudyDay>,
        achievements: Vec<Achievement>,
        updated_at: DateTime<Utc>,
        revision: u64,
    ) -> Self {
        completed_lessons.sort_unstable();
        completed_lessons.dedup();
        Self {
            student_id,
            course_id,
            completed_lessons,
            quiz_points,
            total_study_secs,
            current_streak,
            longest_streak: longest_streak.max(current_streak),
            last_study_date,
            study_calendar,
            achievements,
            updated_at,
            revision,
        }
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
    pub fn completed_lessons(&self) -> &[LessonRef] {
        &self.completed_lessons
    }

    #[must_use]
    pub fn lessons_completed(&self) -> u32 {
        u32::try_from(self.completed_lessons.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn quiz_points(&self) -> u32 {
        self.quiz_points
    }

    #[must_use]
    pub fn total_study_secs(&self) -> u64 {
        self.total_study_secs
    }

    #[must_use]
    pub fn current_streak(&self) -> u32 {
        self.current_streak
    }

    #[must_use]
    pub fn longest_streak(&self) -> u32 {
        self.longest_streak
    }

    #[must_use]
    pub fn last_study_date(&self) -> Option<NaiveDate> {
        self.last_study_date
    }

    #[must_use]
    pub fn study_calendar(&self) -> &[StudyDay] {
        &self.study_calendar
    }

    #[must_use]
    pub fn achievements(&self) -> &[Achievement] {
        &self.achievements
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Revision this copy was read at; writes of a stale copy are rejected.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn has_achievement(&self, kind: AchievementKind) -> bool {
        self.achievements.iter().any(|a| a.kind == kind)
    }

    /// Streak as it stands on `today`: a streak whose last study day is
    /// older than yesterday has lapsed.
    #[must_use]
    pub fn streak_on(&self, today: NaiveDate) -> u32 {
        match self.last_study_date {
            Some(last) if days_between(last, today) <= 1 => self.current_streak,
            _ => 0,
        }
    }

    /// Advance the daily streak for a study event on `today`.
    ///
    /// Same day leaves it unchanged, the following day extends it, any gap
    /// (or the first ever study day) restarts it at 1.
    pub fn update_streak(&mut self, today: NaiveDate) {
        match self.last_study_date {
            Some(last) if last == today => {}
            Some(last) if days_between(last, today) == 1 => {
                self.current_streak = self.current_streak.saturating_add(1);
                self.last_study_date = Some(today);
            }
            Some(last) if days_between(last, today) < 0 => {}
            _ => {
                self.current_streak = 1;
                self.last_study_date = Some(today);
            }
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);
    }

    /// Add a study interval ending at `now`.
    pub fn record_study(&mut self, now: DateTime<Utc>, seconds: u64) {
        let today = now.date_naive();
        self.total_study_secs = self.total_study_secs.saturating_add(seconds);
        self.update_streak(today);

        match self.study_calendar.iter_mut().find(|d| d.date == today) {
            Some(day) => {
                day.seconds = day.seconds.saturating_add(seconds);
                day.sessions = day.sessions.saturating_add(1);
            }
            None => {
                self.study_calendar.push(StudyDay {
                    date: today,
                    seconds,
                    sessions: 1,
                });
                self.study_calendar.sort_by_key(|d| d.date);
                if self.study_calendar.len() > CALENDAR_RETENTION {
                    let excess = self.study_calendar.len() - CALENDAR_RETENTION;
                    self.study_calendar.drain(..excess);
                }
            }
        }
        self.updated_at = now;
    }

    /// Mark a lesson completed; returns `false` if it already was.
    pub fn complete_lesson(&mut self, lesson: LessonRef, now: DateTime<Utc>) -> bool {
        match self.completed_lessons.binary_search(&lesson) {
            Ok(_) => false,
            Err(pos) => {
                self.completed_lessons.insert(pos, lesson);
                self.updated_at = now;
                true
            }
        }
    }

    pub fn add_quiz_points(&mut self, points: u32, now: DateTime<Utc>) {
        self.quiz_points = self.quiz_points.saturating_add(points);
        self.updated_at = now;
    }

    /// Grant an achievement once; returns `true` when newly awarded.
    pub fn award(&mut self, kind: AchievementKind, now: DateTime<Utc>) -> bool {
        if self.has_achievement(kind) {
            return false;
        }
        self.achievements.push(Achievement {
            kind,
            title: kind.title().to_owned(),
            earned_at: now,
        });
        self.updated_at = now;
        true
    }

    /// Award every milestone currently satisfied and return the new ones.
    pub fn evaluate_achievements(
        &mut self,
        now: DateTime<Utc>,
        course_completed: bool,
    ) -> Vec<AchievementKind> {
        let lessons = self.completed_lessons.len();
        let candidates = [
            (AchievementKind::FirstLesson, lessons >= 1),
            (AchievementKind::FiveLessons, lessons >= 5),
            (AchievementKind::Streak3, self.longest_streak >= 3),
            (AchievementKind::Streak7, self.longest_streak >= 7),
            (AchievementKind::Streak30, self.longest_streak >= 30),
            (AchievementKind::TenHours, self.total_study_secs >= TEN_HOURS_SECS),
            (AchievementKind::CourseCompleted, course_completed),
        ];

        candidates
            .into_iter()
            .filter(|(_, earned)| *earned)
            .filter_map(|(kind, _)| self.award(kind, now).then_some(kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn progress() -> Progress {
        Progress::new(UserId::new(1), CourseId::new(1), fixed_now())
    }

    #[test]
    fn streak_extends_on_consecutive_days() {
        let mut p = progress();
        let day = fixed_now().date_naive();
        p.update_streak(day);
        assert_eq!(p.current_streak(), 1);
        p.update_streak(day);
        assert_eq!(p.current_streak(), 1);
        p.update_streak(day + Duration::days(1));
        p.update_streak(day + Duration::days(2));
        assert_eq!(p.current_streak(), 3);
        assert_eq!(p.longest_streak(), 3);
    }

    #[test]
    fn streak_resets_after_gap_but_keeps_longest() {
        let mut p = progress();
        let day = fixed_now().date_naive();
        p.update_streak(day);
        p.update_streak(day + Duration::days(1));
        p.update_streak(day + Duration::days(4));
        assert_eq!(p.current_streak(), 1);
        assert_eq!(p.longest_streak(), 2);
        assert_eq!(p.streak_on(day + Duration::days(5)), 1);
        assert_eq!(p.streak_on(day + Duration::days(6)), 0);
    }

    #[test]
    fn record_study_merges_calendar_days() {
        let mut p = progress();
        let now = fixed_now();
        p.record_study(now, 600);
        p.record_study(now + Duration::minutes(30), 300);
        p.record_study(now + Duration::days(1), 60);
        assert_eq!(p.total_study_secs(), 960);
        assert_eq!(p.study_calendar().len(), 2);
        assert_eq!(p.study_calendar()[0].seconds, 900);
        assert_eq!(p.study_calendar()[0].sessions, 2);
        assert_eq!(p.current_streak(), 2);
    }

    #[test]
    fn complete_lesson_is_idempotent() {
        let mut p = progress();
        let lesson = LessonRef { module: 0, lesson: 1 };
        assert!(p.complete_lesson(lesson, fixed_now()));
        assert!(!p.complete_lesson(lesson, fixed_now()));
        assert_eq!(p.lessons_completed(), 1);
    }

    #[test]
    fn achievements_are_awarded_once() {
        let mut p = progress();
        p.complete_lesson(LessonRef { module: 0, lesson: 0 }, fixed_now());
        let first = p.evaluate_achievements(fixed_now(), false);
        assert_eq!(first, vec![AchievementKind::FirstLesson]);
        assert!(p.evaluate_achievements(fixed_now(), false).is_empty());

        p.record_study(fixed_now(), TEN_HOURS_SECS);
        let next = p.evaluate_achievements(fixed_now(), true);
        assert_eq!(next, vec![AchievementKind::TenHours, AchievementKind::CourseCompleted]);
        assert_eq!(p.achievements().len(), 3);
    }

    #[test]
    fn achievement_kind_serializes_snake_case() {
        let json = serde_json::to_string(&AchievementKind::Streak7).unwrap();
        assert_eq!(json, "\"streak_7\"");
    }
}
