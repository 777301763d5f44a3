use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CourseId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("module {index} title cannot be empty")]
    EmptyModuleTitle { index: usize },

    #[error("lesson {lesson} in module {module} has an empty title")]
    EmptyLessonTitle { module: usize, lesson: usize },

    #[error("lesson {lesson} does not exist in module {module}")]
    LessonOutOfRange { module: usize, lesson: usize },

    #[error("unknown course level: {0}")]
    UnknownLevel(String),
}

//
// ─── LEVEL ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl CourseLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CourseLevel::Beginner => "beginner",
            CourseLevel::Intermediate => "intermediate",
            CourseLevel::Advanced => "advanced",
        }
    }
}

impl fmt::Display for CourseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseLevel {
    type Err = CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginner" => Ok(CourseLevel::Beginner),
            "intermediate" => Ok(CourseLevel::Intermediate),
            "advanced" => Ok(CourseLevel::Advanced),
            other => Err(CourseError::UnknownLevel(other.to_owned())),
        }
    }
}

//
// ─── MODULES & LESSONS ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseModule {
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

/// Author-supplied course fields, validated by `Course::new` / `Course::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub level: CourseLevel,
    #[serde(default)]
    pub modules: Vec<CourseModule>,
}

impl CourseDraft {
    fn validate(self) -> Result<Self, CourseError> {
        let title = self.title.trim().to_owned();
        if title.is_empty() {
            return Err(CourseError::EmptyTitle);
        }
        let mut modules = Vec::with_capacity(self.modules.len());
        for (index, module) in self.modules.into_iter().enumerate() {
            let module_title = module.title.trim().to_owned();
            if module_title.is_empty() {
                return Err(CourseError::EmptyModuleTitle { index });
            }
            let mut lessons = Vec::with_capacity(module.lessons.len());
            for (lesson_index, lesson) in module.lessons.into_iter().enumerate() {
                let lesson_title = lesson.title.trim().to_owned();
                if lesson_title.is_empty() {
                    return Err(CourseError::EmptyLessonTitle {
                        module: index,
                        lesson: lesson_index,
                    });
                }
                lessons.push(Lesson {
                    title: lesson_title,
                    ..lesson
                });
            }
            modules.push(CourseModule {
                title: module_title,
                lessons,
            });
        }
        let category = self
            .category
            .map(|c| c.trim().to_owned())
            .filter(|c| !c.is_empty());

        Ok(Self {
            title,
            description: self.description.trim().to_owned(),
            category,
            level: self.level,
            modules,
        })
    }
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    id: CourseId,
    faculty_id: UserId,
    title: String,
    description: String,
    category: Option<String>,
    level: CourseLevel,
    published: bool,
    modules: Vec<CourseModule>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Course {
    /// Creates an unpublished course owned by `faculty_id`.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` if the title, a module title or a lesson title is blank.
    pub fn new(
        id: CourseId,
        faculty_id: UserId,
        draft: CourseDraft,
        now: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        let draft = draft.validate()?;
        Ok(Self {
            id,
            faculty_id,
            title: draft.title,
            description: draft.description,
            category: draft.category,
            level: draft.level,
            published: false,
            modules: draft.modules,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrate a course from storage without re-running validation.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        id: CourseId,
        faculty_id: UserId,
        title: String,
        description: String,
        category: Option<String>,
        level: CourseLevel,
        published: bool,
        modules: Vec<CourseModule>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            faculty_id,
            title,
            description,
            category,
            level,
            published,
            modules,
            created_at,
            updated_at,
        }
    }

    /// Replace the authored content, keeping ownership and publish state.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` when the draft fails validation.
    pub fn update(&mut self, draft: CourseDraft, now: DateTime<Utc>) -> Result<(), CourseError> {
        let draft = draft.validate()?;
        self.title = draft.title;
        self.description = draft.description;
        self.category = draft.category;
        self.level = draft.level;
        self.modules = draft.modules;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_published(&mut self, published: bool, now: DateTime<Utc>) {
        self.published = published;
        self.updated_at = now;
    }

    #[must_use]
    pub fn with_id(mut self, id: CourseId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn faculty_id(&self) -> UserId {
        self.faculty_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    #[must_use]
    pub fn level(&self) -> CourseLevel {
        self.level
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published
    }

    #[must_use]
    pub fn modules(&self) -> &[CourseModule] {
        &self.modules
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.faculty_id == user
    }

    /// Number of lessons across all modules.
    #[must_use]
    pub fn total_lessons(&self) -> u32 {
        let total: usize = self.modules.iter().map(|m| m.lessons.len()).sum();
        u32::try_from(total).unwrap_or(u32::MAX)
    }

    /// Looks up a lesson by module and lesson index.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::LessonOutOfRange` if either index is out of range.
    pub fn lesson(&self, module: usize, lesson: usize) -> Result<&Lesson, CourseError> {
        self.modules
            .get(module)
            .and_then(|m| m.lessons.get(lesson))
            .ok_or(CourseError::LessonOutOfRange { module, lesson })
    }

    /// Case-insensitive match on title, description and category.
    #[must_use]
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
            || self
                .category
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(&needle))
    }
}
