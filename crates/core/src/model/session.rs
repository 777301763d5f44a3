use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CourseId, MaterialId, StudySessionId, UserId};
use crate::stats::capped_percent;
use crate::time::elapsed_secs;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("study session has already ended")]
    AlreadyEnded,

    #[error("unknown study activity: {0}")]
    UnknownActivity(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    #[default]
    Reading,
    Video,
    Quiz,
    Practice,
    Other,
}

impl Activity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Reading => "reading",
            Activity::Video => "video",
            Activity::Quiz => "quiz",
            Activity::Practice => "practice",
            Activity::Other => "other",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = SessionStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reading" => Ok(Activity::Reading),
            "video" => Ok(Activity::Video),
            "quiz" => Ok(Activity::Quiz),
            "practice" => Ok(Activity::Practice),
            "other" => Ok(Activity::Other),
            other => Err(SessionStateError::UnknownActivity(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }
}

/// A timed interval of student activity within a course.
///
/// Time between two activity reports is attributed to either active or idle
/// time depending on what the client reports for that interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    id: StudySessionId,
    student_id: UserId,
    course_id: CourseId,
    material_id: Option<MaterialId>,
    activity: Activity,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    active_seconds: u64,
    idle_seconds: u64,
}

impl StudySession {
    #[must_use]
    pub fn start(
        id: StudySessionId,
        student_id: UserId,
        course_id: CourseId,
        material_id: Option<MaterialId>,
        activity: Activity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            course_id,
            material_id,
            activity,
            status: SessionStatus::Active,
            started_at: now,
            last_activity_at: now,
            ended_at: None,
            active_seconds: 0,
            idle_seconds: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        id: StudySessionId,
        student_id: UserId,
        course_id: CourseId,
        material_id: Option<MaterialId>,
        activity: Activity,
        started_at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        active_seconds: u64,
        idle_seconds: u64,
    ) -> Self {
        let status = if ended_at.is_some() {
            SessionStatus::Ended
        } else {
            SessionStatus::Active
        };
        Self {
            id,
            student_id,
            course_id,
            material_id,
            activity,
            status,
            started_at,
            last_activity_at,
            ended_at,
            active_seconds,
            idle_seconds,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: StudySessionId) -> Self {
        self.id = id;
        self
    }

    /// Attribute the time since the last report to idle or active time.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::AlreadyEnded` for ended sessions.
    pub fn record_activity(&mut self, now: DateTime<Utc>, idle: bool) -> Result<u64, SessionStateError> {
        if self.status == SessionStatus::Ended {
            return Err(SessionStateError::AlreadyEnded);
        }
        let elapsed = elapsed_secs(self.last_activity_at, now);
        if idle {
            self.idle_seconds = self.idle_seconds.saturating_add(elapsed);
        } else {
            self.active_seconds = self.active_seconds.saturating_add(elapsed);
        }
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
        Ok(elapsed)
    }

    /// Close the session; the final interval counts as active time.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::AlreadyEnded` if called twice.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<(), SessionStateError> {
        self.record_activity(now, false)?;
        self.status = SessionStatus::Ended;
        self.ended_at = Some(self.last_activity_at);
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> StudySessionId {
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
    pub fn material_id(&self) -> Option<MaterialId> {
        self.material_id
    }

    #[must_use]
    pub fn activity(&self) -> Activity {
        self.activity
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn active_seconds(&self) -> u64 {
        self.active_seconds
    }

    #[must_use]
    pub fn idle_seconds(&self) -> u64 {
        self.idle_seconds
    }

    /// Wall-clock length of the session so far.
    #[must_use]
    pub fn duration_seconds(&self) -> u64 {
        elapsed_secs(self.started_at, self.ended_at.unwrap_or(self.last_activity_at))
    }

    #[must_use]
    pub fn focus_percent(&self) -> u8 {
        capped_percent(
            self.active_seconds,
            self.active_seconds.saturating_add(self.idle_seconds),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn session() -> StudySession {
        StudySession::start(
            StudySessionId::new(1),
            UserId::new(1),
            CourseId::new(1),
            None,
            Activity::Video,
            fixed_now(),
        )
    }

    #[test]
    fn active_and_idle_time_split() {
        let mut s = session();
        let t0 = fixed_now();
        s.record_activity(t0 + Duration::seconds(300), false).unwrap();
        s.record_activity(t0 + Duration::seconds(400), true).unwrap();
        s.end(t0 + Duration::seconds(500)).unwrap();

        assert_eq!(s.active_seconds(), 400);
        assert_eq!(s.idle_seconds(), 100);
        assert_eq!(s.duration_seconds(), 500);
        assert_eq!(s.focus_percent(), 80);
        assert_eq!(s.status(), SessionStatus::Ended);
    }

    #[test]
    fn ended_session_rejects_updates() {
        let mut s = session();
        s.end(fixed_now()).unwrap();
        assert_eq!(
            s.record_activity(fixed_now(), false),
            Err(SessionStateError::AlreadyEnded)
        );
        assert_eq!(s.end(fixed_now()), Err(SessionStateError::AlreadyEnded));
    }

    #[test]
    fn clock_skew_does_not_go_negative() {
        let mut s = session();
        let added = s
            .record_activity(fixed_now() - Duration::seconds(10), false)
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(s.last_activity_at(), fixed_now());
    }

    #[test]
    fn empty_session_has_zero_focus() {
        assert_eq!(session().focus_percent(), 0);
    }
}
