use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use learnsy_core::model::{
    AchievementKind, CourseId, Progress, Quiz, QuizAttempt, QuizAttemptId, QuizId, QuizQuestion,
    RedactedQuiz, Role,
};
use storage::repository::{ProgressRepository, QuizRepository, Storage};

use crate::Clock;
use crate::access::{AccessGuard, Actor, CourseAccess, FoundExt};
use crate::error::{QuizServiceError, retry_on_conflict};

/// Owners see the answer key; students get the redacted form.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QuizView {
    Full(Quiz),
    Redacted(RedactedQuiz),
}

impl QuizView {
    fn for_access(quiz: Quiz, access: &CourseAccess) -> Self {
        match access {
            CourseAccess::Owner => QuizView::Full(quiz),
            CourseAccess::Student(_) => QuizView::Redacted(quiz.redacted()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub attempt: QuizAttempt,
    pub new_achievements: Vec<AchievementKind>,
}

#[derive(Clone)]
pub struct QuizService {
    clock: Clock,
    quizzes: Arc<dyn QuizRepository>,
    progress: Arc<dyn ProgressRepository>,
    guard: AccessGuard,
}

impl QuizService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage) -> Self {
        Self {
            clock,
            quizzes: Arc::clone(&storage.quizzes),
            progress: Arc::clone(&storage.progress),
            guard: AccessGuard::new(clock, storage),
        }
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotOwner` for non-owners and
    /// `QuizServiceError::Quiz` for malformed questions.
    pub async fn create_quiz(
        &self,
        actor: Actor,
        course_id: CourseId,
        title: String,
        questions: Vec<QuizQuestion>,
    ) -> Result<Quiz, QuizServiceError> {
        self.guard.owned_course(actor, course_id).await?;
        let quiz = Quiz::new(QuizId::new(0), course_id, title, questions, self.clock.now())?;
        let id = self.quizzes.insert_quiz(&quiz).await?;
        info!(quiz = %id, course = %course_id, "created quiz");
        Ok(quiz.with_id(id))
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotEnrolled` / `NotOwner` for outsiders.
    pub async fn list_for_course(
        &self,
        actor: Actor,
        course_id: CourseId,
    ) -> Result<Vec<QuizView>, QuizServiceError> {
        let (_, access) = self.guard.course_access(actor, course_id).await?;
        let quizzes = self.quizzes.list_course_quizzes(course_id).await?;
        Ok(quizzes
            .into_iter()
            .map(|q| QuizView::for_access(q, &access))
            .collect())
    }

    /// # Errors
    ///
    /// Returns `AccessError::NotFound` for unknown quizzes.
    pub async fn get_quiz(&self, actor: Actor, quiz_id: QuizId) -> Result<QuizView, QuizServiceError> {
        let quiz = self.quizzes.get_quiz(quiz_id).await.or_missing("quiz")?;
        let (_, access) = self.guard.course_access(actor, quiz.course_id()).await?;
        Ok(QuizView::for_access(quiz, &access))
    }

    /// Grade and store an attempt, crediting its points to the student's progress.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz` when more answers than questions are given.
    pub async fn submit_attempt(
        &self,
        actor: Actor,
        quiz_id: QuizId,
        answers: Vec<Option<usize>>,
    ) -> Result<AttemptResult, QuizServiceError> {
        actor.require(Role::Student)?;
        let quiz = self.quizzes.get_quiz(quiz_id).await.or_missing("quiz")?;
        let quiz = &quiz;
        let answers = &answers;
        retry_on_conflict(move || self.try_submit_attempt(actor, quiz, answers.clone())).await
    }

    async fn try_submit_attempt(
        &self,
        actor: Actor,
        quiz: &Quiz,
        answers: Vec<Option<usize>>,
    ) -> Result<AttemptResult, QuizServiceError> {
        let quiz_id = quiz.id();
        let enrollment = self
            .guard
            .active_enrollment(actor.id, quiz.course_id())
            .await?;
        let score = quiz.grade(&answers)?;

        let now = self.clock.now();
        let mut progress = self
            .progress
            .get_progress(actor.id, quiz.course_id())
            .await?
            .unwrap_or_else(|| Progress::new(actor.id, quiz.course_id(), enrollment.enrolled_at()));
        progress.add_quiz_points(score.score, now);
        let mut new_achievements = Vec::new();
        if score.percent >= 100 && progress.award(AchievementKind::QuizAce, now) {
            new_achievements.push(AchievementKind::QuizAce);
        }

        let mut attempt = QuizAttempt {
            id: QuizAttemptId::new(0),
            quiz_id,
            student_id: actor.id,
            answers,
            score: score.score,
            max_score: score.max_score,
            percent: score.percent,
            submitted_at: now,
        };
        attempt.id = self.quizzes.record_attempt(&attempt, &progress).await?;
        info!(
            student = %actor.id,
            quiz = %quiz_id,
            score = score.score,
            max = score.max_score,
            "submitted quiz attempt"
        );
        Ok(AttemptResult {
            attempt,
            new_achievements,
        })
    }

    /// The caller's attempts on a quiz, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::NotFound` for unknown quizzes.
    pub async fn list_attempts(
        &self,
        actor: Actor,
        quiz_id: QuizId,
    ) -> Result<Vec<QuizAttempt>, QuizServiceError> {
        actor.require(Role::Student)?;
        self.quizzes.get_quiz(quiz_id).await.or_missing("quiz")?;
        Ok(self.quizzes.list_attempts(actor.id, quiz_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::test_support::{actor, clock, enrolled_student, published_course};
    use learnsy_core::model::QuizError;

    fn questions() -> Vec<QuizQuestion> {
        vec![
            QuizQuestion {
                prompt: "2 + 2".into(),
                options: vec!["3".into(), "4".into()],
                correct_index: 1,
                points: 1,
            },
            QuizQuestion {
                prompt: "Borrow checker?".into(),
                options: vec!["yes".into(), "no".into()],
                correct_index: 0,
                points: 3,
            },
        ]
    }

    #[tokio::test]
    async fn students_get_redacted_quiz() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let service = QuizService::new(clock(), &storage);
        let quiz = service
            .create_quiz(owner, course.id(), "Basics".into(), questions())
            .await
            .unwrap();

        assert!(matches!(
            service.get_quiz(owner, quiz.id()).await.unwrap(),
            QuizView::Full(_)
        ));
        let QuizView::Redacted(view) = service.get_quiz(student, quiz.id()).await.unwrap() else {
            panic!("student should get the redacted view");
        };
        assert_eq!(view.max_score, 4);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("correctIndex"));
    }

    #[tokio::test]
    async fn perfect_attempt_awards_quiz_ace_once() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let service = QuizService::new(clock(), &storage);
        let quiz = service
            .create_quiz(owner, course.id(), "Basics".into(), questions())
            .await
            .unwrap();

        let partial = service
            .submit_attempt(student, quiz.id(), vec![Some(1), Some(1)])
            .await
            .unwrap();
        assert_eq!(partial.attempt.score, 1);
        assert!(partial.new_achievements.is_empty());

        let perfect = service
            .submit_attempt(student, quiz.id(), vec![Some(1), Some(0)])
            .await
            .unwrap();
        assert_eq!(perfect.attempt.percent, 100);
        assert_eq!(perfect.new_achievements, vec![AchievementKind::QuizAce]);

        let repeat = service
            .submit_attempt(student, quiz.id(), vec![Some(1), Some(0)])
            .await
            .unwrap();
        assert!(repeat.new_achievements.is_empty());

        let progress = storage
            .progress
            .get_progress(student.id, course.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.quiz_points(), 9);

        let attempts = service.list_attempts(student, quiz.id()).await.unwrap();
        assert_eq!(attempts.len(), 3);
    }

    #[tokio::test]
    async fn attempt_validation_and_access() {
        let storage = Storage::in_memory();
        let owner = actor(&storage, "f@example.com", Role::Faculty).await;
        let course = published_course(&storage, owner, &[1]).await;
        let student = enrolled_student(&storage, "s@example.com", &course).await;
        let outsider = actor(&storage, "o@example.com", Role::Student).await;
        let service = QuizService::new(clock(), &storage);
        let quiz = service
            .create_quiz(owner, course.id(), "Basics".into(), questions())
            .await
            .unwrap();

        let err = service
            .submit_attempt(student, quiz.id(), vec![None, None, None])
            .await
            .unwrap_err();
        assert!(matches!(err, QuizServiceError::Quiz(QuizError::TooManyAnswers { .. })));

        let err = service
            .submit_attempt(outsider, quiz.id(), vec![Some(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, QuizServiceError::Access(AccessError::NotEnrolled)));

        let err = service
            .create_quiz(owner, course.id(), "Empty".into(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QuizServiceError::Quiz(QuizError::NoQuestions)));
    }
}
