use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use learnsy_core::model::{
    AchievementKind, Activity, CourseId, EnrollmentStatus, MaterialId, Progress, Role,
    SessionStateError, StudySession, StudySessionId,
};
use learnsy_core::stats::average_percent;
use storage::repository::{
    EnrollmentRepository, MaterialRepository, ProgressRepository, Storage, StorageError,
    StudySessionRepository,
};

use crate::Clock;
use crate::access::{AccessGuard, Actor, FoundExt};
use crate::error::{AccessError, StudySessionError, retry_on_conflict};

/// Default number of sessions returned by `recent`.
pub const DEFAULT_RECENT_SESSIONS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: u32,
    pub total_active_seconds: u64,
    pub total_idle_seconds: u64,
    pub average_focus_percent: u8,
}

impl SessionStats {
    #[must_use]
    pub fn from_sessions(sessions: &[StudySession]) -> Self {
        let focus: Vec<u8> = sessions
            .iter()
            .filter(|s| s.duration_seconds() > 0)
            .map(StudySession::focus_percent)
            .collect();
        Self {
            total_sessions: u32::try_from(sessions.len()).unwrap_or(u32::MAX),
            total_active_seconds: sessions.iter().map(StudySession::active_seconds).sum(),
            total_idle_seconds: sessions.iter().map(StudySession::idle_seconds).sum(),
            average_focus_percent: average_percent(&focus),
        }
    }
}

/// An ended session and any milestones its study time unlocked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedSession {
    pub session: StudySession,
    pub new_achievements: Vec<AchievementKind>,
}

#[derive(Clone)]
pub struct StudySessionService {
    clock: Clock,
    sessions: Arc<dyn StudySessionRepository>,
    progress: Arc<dyn ProgressRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    materials: Arc<dyn MaterialRepository>,
    guard: AccessGuard,
}

impl StudySessionService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            sessions: Arc::clone(&storage.sessions),
            progress: Arc::clone(&storage.progress),
            enrollments: Arc::clone(&storage.enrollments),
            materials: Arc::clone(&storage.materials),
            guard: AccessGuard::new(clock, storage),
        }
    }

    /// Start timing a study session. A session the student left running is
    /// ended first so at most one is active at a time.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` unless the student is enrolled, or
    /// `AccessError::NotFound` for a material outside the course.
    pub async fn start(
        &self,
        actor: Actor,
        course_id: CourseId,
        activity: Activity,
        material_id: Option<MaterialId>,
    ) -> Result<StudySession, StudySessionError> {
        actor.require(Role::Student)?;
        self.guard.active_enrollment(actor.id, course_id).await?;
        if let Some(material_id) = material_id {
            let material = self
                .materials
                .get_material(material_id)
                .await
                .or_missing("material")?;
            if material.course_id() != course_id {
                return Err(AccessError::NotFound("material").into());
            }
        }

        if let Some(running) = self.sessions.active_session(actor.id).await? {
            debug!(session = %running.id(), "ending previous session");
            self.close(running.id()).await?;
        }

        let session = StudySession::start(
            StudySessionId::new(0),
            actor.id,
            course_id,
            material_id,
            activity,
            self.clock.now(),
        );
        let id = self.sessions.insert_session(&session).await?;
        info!(session = %id, student = %actor.id, course = %course_id, %activity, "started study session");
        Ok(session.with_id(id))
    }

    /// Heartbeat from the client; `idle` says how the elapsed interval was spent.
    ///
    /// # Errors
    ///
    /// Returns `StudySessionError::Session` once the session has ended.
    pub async fn record_activity(
        &self,
        actor: Actor,
        session_id: StudySessionId,
        idle: bool,
    ) -> Result<StudySession, StudySessionError> {
        let mut session = self.owned_session(actor, session_id).await?;
        let elapsed = session.record_activity(self.clock.now(), idle)?;
        match self.sessions.update_session(&session).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => return Err(SessionStateError::AlreadyEnded.into()),
            Err(err) => return Err(err.into()),
        }
        debug!(session = %session_id, elapsed, idle, "recorded activity");
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns `StudySessionError::Session` if the session already ended.
    pub async fn end(
        &self,
        actor: Actor,
        session_id: StudySessionId,
    ) -> Result<EndedSession, StudySessionError> {
        self.owned_session(actor, session_id).await?;
        self.close(session_id).await
    }

    /// # Errors
    ///
    /// Returns `StudySessionError::Storage` if repository access fails.
    pub async fn active_session(
        &self,
        actor: Actor,
    ) -> Result<Option<StudySession>, StudySessionError> {
        actor.require(Role::Student)?;
        Ok(self.sessions.active_session(actor.id).await?)
    }

    /// # Errors
    ///
    /// Returns `StudySessionError::Storage` if repository access fails.
    pub async fn recent(
        &self,
        actor: Actor,
        limit: u32,
    ) -> Result<Vec<StudySession>, StudySessionError> {
        actor.require(Role::Student)?;
        Ok(self
            .sessions
            .list_student_sessions(actor.id, Some(limit))
            .await?)
    }

    /// # Errors
    ///
    /// Returns `StudySessionError::Storage` if repository access fails.
    pub async fn stats(&self, actor: Actor) -> Result<SessionStats, StudySessionError> {
        actor.require(Role::Student)?;
        let sessions = self.sessions.list_student_sessions(actor.id, None).await?;
        Ok(SessionStats::from_sessions(&sessions))
    }

    async fn owned_session(
        &self,
        actor: Actor,
        session_id: StudySessionId,
    ) -> Result<StudySession, StudySessionError> {
        actor.require(Role::Student)?;
        let session = self
            .sessions
            .get_session(session_id)
            .await
            .or_missing("study session")?;
        if session.student_id() != actor.id {
            warn!(user = %actor.id, session = %session_id, "rejected: foreign study session");
            return Err(AccessError::NotOwner.into());
        }
        Ok(session)
    }

    /// End the session and credit its active time to the course progress.
    async fn close(&self, session_id: StudySessionId) -> Result<EndedSession, StudySessionError> {
        retry_on_conflict(move || self.try_close(session_id)).await
    }

    /// Reads the session afresh so a close that lost a race reports `AlreadyEnded`.
    async fn try_close(
        &self,
        session_id: StudySessionId,
    ) -> Result<EndedSession, StudySessionError> {
        let mut session = self
            .sessions
            .get_session(session_id)
            .await
            .or_missing("study session")?;
        let now = self.clock.now();
        session.end(now)?;

        let student = session.student_id();
        let course = session.course_id();
        let mut progress = self
            .progress
            .get_progress(student, course)
            .await?
            .unwrap_or_else(|| Progress::new(student, course, session.started_at()));
        progress.record_study(now, session.active_seconds());
        let completed = self
            .enrollments
            .get_enrollment(student, course)
            .await?
            .is_some_and(|e| e.status() == EnrollmentStatus::Completed);
        let new_achievements = progress.evaluate_achievements(now, completed);

        self.sessions.finish_session(&session, &progress).await?;
        info!(
            session = %session.id(),
            active = session.active_seconds(),
            idle = session.idle_seconds(),
            focus = session.focus_percent(),
            "ended study session"
        );
        Ok(EndedSession {
            session,
            new_achievements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{actor, clock, enrolled_student, published_course};
    use chrono::Duration;
    use learnsy_core::model::{SessionStateError, SessionStatus};

    #[tokio::test]
    async fn session_lifecycle_credits_active_time() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let at = |secs: i64| StudySessionService::new(clock().advanced(Duration::seconds(secs)), &storage);

        let session = at(0)
            .start(student, course.id(), Activity::Reading, None)
            .await
            .unwrap();
        at(60).record_activity(student, session.id(), false).await.unwrap();
        at(90).record_activity(student, session.id(), true).await.unwrap();
        let ended = at(120).end(student, session.id()).await.unwrap();

        assert_eq!(ended.session.status(), SessionStatus::Ended);
        assert_eq!(ended.session.active_seconds(), 90);
        assert_eq!(ended.session.idle_seconds(), 30);
        assert_eq!(ended.session.focus_percent(), 75);

        let progress = storage
            .progress
            .get_progress(student.id, course.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.total_study_secs(), 90);
        assert_eq!(progress.current_streak(), 1);

        let err = at(130).end(student, session.id()).await.unwrap_err();
        assert!(matches!(
            err,
            StudySessionError::Session(SessionStateError::AlreadyEnded)
        ));
    }

    #[tokio::test]
    async fn starting_again_ends_the_running_session() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let at = |secs: i64| StudySessionService::new(clock().advanced(Duration::seconds(secs)), &storage);

        let first = at(0).start(student, course.id(), Activity::Video, None).await.unwrap();
        let second = at(300).start(student, course.id(), Activity::Quiz, None).await.unwrap();

        let service = at(300);
        let active = service.active_session(student).await.unwrap().unwrap();
        assert_eq!(active.id(), second.id());
        let recent = service.recent(student, DEFAULT_RECENT_SESSIONS).await.unwrap();
        assert_eq!(recent.len(), 2);
        let old = recent.iter().find(|s| s.id() == first.id()).unwrap();
        assert_eq!(old.status(), SessionStatus::Ended);
        assert_eq!(old.active_seconds(), 300);

        let stats = service.stats(student).await.unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_active_seconds, 300);
        assert_eq!(stats.average_focus_percent, 100);
    }

    #[tokio::test]
    async fn sessions_are_private_and_require_enrollment() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let other = enrolled_student(&storage, "t@example.com", &course).await;
        let outsider = actor(&storage, "o@example.com", Role::Student).await;
        let service = StudySessionService::new(clock(), &storage);

        assert!(matches!(
            service.start(outsider, course.id(), Activity::Other, None).await,
            Err(StudySessionError::Access(AccessError::NotEnrolled))
        ));

        let session = service
            .start(student, course.id(), Activity::Practice, None)
            .await
            .unwrap();
        assert!(matches!(
            service.end(other, session.id()).await,
            Err(StudySessionError::Access(AccessError::NotOwner))
        ));
        assert!(matches!(
            service
                .start(student, course.id(), Activity::Reading, Some(MaterialId::new(77)))
                .await,
            Err(StudySessionError::Access(AccessError::NotFound("material")))
        ));
    }
}
