use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, QuizAttemptId, QuizId, UserId};
use crate::stats::capped_percent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz title cannot be empty")]
    EmptyTitle,

    #[error("quiz needs at least one question")]
    NoQuestions,

    #[error("question {index} has an empty prompt")]
    EmptyPrompt { index: usize },

    #[error("question {index} needs at least two options")]
    TooFewOptions { index: usize },

    #[error("question {index} has no option at correct index {correct}")]
    CorrectIndexOutOfRange { index: usize, correct: usize },

    #[error("question {index} must be worth at least one point")]
    ZeroPoints { index: usize },

    #[error("question {index} is worth {points} points, at most {max} allowed", max = MAX_QUESTION_POINTS)]
    TooManyPoints { index: usize, points: u32 },

    #[error("{given} answers submitted for {expected} questions")]
    TooManyAnswers { given: usize, expected: usize },
}

/// Upper bound on the weight of a single question.
pub const MAX_QUESTION_POINTS: u32 = 1000;

fn default_points() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default = "default_points")]
    pub points: u32,
}

/// Student-facing question without the answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedQuiz {
    pub id: QuizId,
    pub course_id: CourseId,
    pub title: String,
    pub questions: Vec<RedactedQuestion>,
    pub max_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizScore {
    pub score: u32,
    pub max_score: u32,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    id: QuizId,
    course_id: CourseId,
    title: String,
    questions: Vec<QuizQuestion>,
    created_at: DateTime<Utc>,
}

impl Quiz {
    /// # Errors
    ///
    /// Returns `QuizError` if the title is blank or any question is malformed.
    pub fn new(
        id: QuizId,
        course_id: CourseId,
        title: impl Into<String>,
        questions: Vec<QuizQuestion>,
        now: DateTime<Utc>,
    ) -> Result<Self, QuizError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(QuizError::EmptyTitle);
        }
        if questions.is_empty() {
            return Err(QuizError::NoQuestions);
        }
        for (index, q) in questions.iter().enumerate() {
            if q.prompt.trim().is_empty() {
                return Err(QuizError::EmptyPrompt { index });
            }
            if q.options.len() < 2 {
                return Err(QuizError::TooFewOptions { index });
            }
            if q.correct_index >= q.options.len() {
                return Err(QuizError::CorrectIndexOutOfRange {
                    index,
                    correct: q.correct_index,
                });
            }
            if q.points == 0 {
                return Err(QuizError::ZeroPoints { index });
            }
            if q.points > MAX_QUESTION_POINTS {
                return Err(QuizError::TooManyPoints {
                    index,
                    points: q.points,
                });
            }
        }
        Ok(Self {
            id,
            course_id,
            title,
            questions,
            created_at: now,
        })
    }

    #[must_use]
    pub fn from_persisted(
        id: QuizId,
        course_id: CourseId,
        title: String,
        questions: Vec<QuizQuestion>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            course_id,
            title,
            questions,
            created_at,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: QuizId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> QuizId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn max_score(&self) -> u32 {
        self.questions
            .iter()
            .map(|q| q.points)
            .fold(0, u32::saturating_add)
    }

    /// Score a set of chosen option indices, one per question in order.
    ///
    /// Missing answers (`None` or a short list) and out-of-range choices
    /// earn nothing.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::TooManyAnswers` if more answers than questions are given.
    pub fn grade(&self, answers: &[Option<usize>]) -> Result<QuizScore, QuizError> {
        if answers.len() > self.questions.len() {
            return Err(QuizError::TooManyAnswers {
                given: answers.len(),
                expected: self.questions.len(),
            });
        }
        let score = self
            .questions
            .iter()
            .zip(answers.iter())
            .filter(|(q, a)| **a == Some(q.correct_index))
            .map(|(q, _)| q.points)
            .fold(0, u32::saturating_add);
        let max_score = self.max_score();
        Ok(QuizScore {
            score,
            max_score,
            percent: capped_percent(u64::from(score), u64::from(max_score)),
        })
    }

    #[must_use]
    pub fn redacted(&self) -> RedactedQuiz {
        RedactedQuiz {
            id: self.id,
            course_id: self.course_id,
            title: self.title.clone(),
            questions: self
                .questions
                .iter()
                .map(|q| RedactedQuestion {
                    prompt: q.prompt.clone(),
                    options: q.options.clone(),
                    points: q.points,
                })
                .collect(),
            max_score: self.max_score(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: QuizAttemptId,
    pub quiz_id: QuizId,
    pub student_id: UserId,
    pub answers: Vec<Option<usize>>,
    pub score: u32,
    pub max_score: u32,
    pub percent: u8,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn question(correct: usize, points: u32) -> QuizQuestion {
        QuizQuestion {
            prompt: "?".into(),
            options: vec!["a".into(), "b".into(), "c".into()],
            correct_index: correct,
            points,
        }
    }

    fn quiz() -> Quiz {
        Quiz::new(
            QuizId::new(1),
            CourseId::new(1),
            "Check",
            vec![question(0, 1), question(2, 3)],
            fixed_now(),
        )
        .unwrap()
    }

    #[test]
    fn grades_weighted_points() {
        let q = quiz();
        let score = q.grade(&[Some(0), Some(1)]).unwrap();
        assert_eq!(score, QuizScore { score: 1, max_score: 4, percent: 25 });

        let perfect = q.grade(&[Some(0), Some(2)]).unwrap();
        assert_eq!(perfect.percent, 100);
    }

    #[test]
    fn missing_answers_score_zero() {
        let q = quiz();
        assert_eq!(q.grade(&[]).unwrap().score, 0);
        assert_eq!(q.grade(&[None, Some(2)]).unwrap().score, 3);
        assert_eq!(q.grade(&[Some(99)]).unwrap().score, 0);
        assert!(q.grade(&[None, None, None]).is_err());
    }

    #[test]
    fn validation() {
        assert_eq!(
            Quiz::new(QuizId::new(1), CourseId::new(1), "x", vec![], fixed_now()),
            Err(QuizError::NoQuestions)
        );
        assert_eq!(
            Quiz::new(QuizId::new(1), CourseId::new(1), "x", vec![question(3, 1)], fixed_now()),
            Err(QuizError::CorrectIndexOutOfRange { index: 0, correct: 3 })
        );
        assert_eq!(
            Quiz::new(QuizId::new(1), CourseId::new(1), "x", vec![question(0, 0)], fixed_now()),
            Err(QuizError::ZeroPoints { index: 0 })
        );
        assert_eq!(
            Quiz::new(
                QuizId::new(1),
                CourseId::new(1),
                "x",
                vec![question(0, MAX_QUESTION_POINTS), question(1, u32::MAX)],
                fixed_now()
            ),
            Err(QuizError::TooManyPoints {
                index: 1,
                points: u32::MAX
            })
        );
    }

    #[test]
    fn oversized_stored_quizzes_grade_without_overflow() {
        let q = Quiz::from_persisted(
            QuizId::new(1),
            CourseId::new(1),
            "legacy".into(),
            vec![question(0, u32::MAX), question(0, u32::MAX)],
            fixed_now(),
        );
        assert_eq!(q.max_score(), u32::MAX);
        let score = q.grade(&[Some(0), Some(0)]).unwrap();
        assert_eq!(score.score, u32::MAX);
        assert_eq!(score.percent, 100);
    }

    #[test]
    fn redacted_view_hides_answers() {
        let json = serde_json::to_value(quiz().redacted()).unwrap();
        assert!(json["questions"][0].get("correctIndex").is_none());
        assert_eq!(json["maxScore"], 4);
    }
}
