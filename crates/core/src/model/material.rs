use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::model::ids::{CourseId, MaterialId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MaterialError {
    #[error("material title cannot be empty")]
    EmptyTitle,

    #[error("unknown material kind: {0}")]
    UnknownKind(String),

    #[error("invalid material url: {0}")]
    InvalidUrl(String),

    #[error("link materials require a url")]
    LinkWithoutUrl,

    #[error("uploaded file name cannot be empty")]
    EmptyFileName,

    #[error("material needs either a file or a url")]
    MissingSource,
}

//
// ─── KIND ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialKind {
    Video,
    Document,
    Quiz,
    Link,
    Other,
}

impl MaterialKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MaterialKind::Video => "video",
            MaterialKind::Document => "document",
            MaterialKind::Quiz => "quiz",
            MaterialKind::Link => "link",
            MaterialKind::Other => "other",
        }
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialKind {
    type Err = MaterialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(MaterialKind::Video),
            "document" | "doc" | "pdf" => Ok(MaterialKind::Document),
            "quiz" => Ok(MaterialKind::Quiz),
            "link" => Ok(MaterialKind::Link),
            "other" => Ok(MaterialKind::Other),
            other => Err(MaterialError::UnknownKind(other.to_owned())),
        }
    }
}

//
// ─── SOURCE ────────────────────────────────────────────────────────────────────
//

/// Where the material's content lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MaterialSource {
    /// Uploaded file stored under the upload directory as `stored_name`.
    #[serde(rename_all = "camelCase")]
    File {
        stored_name: String,
        original_name: String,
        content_type: String,
        size_bytes: u64,
    },
    Url { url: String },
}

impl MaterialSource {
    /// # Errors
    ///
    /// Returns `MaterialError::InvalidUrl` unless the value is an http(s) URL.
    pub fn url(raw: &str) -> Result<Self, MaterialError> {
        let parsed = Url::parse(raw.trim()).map_err(|e| MaterialError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MaterialError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }
        Ok(Self::Url {
            url: parsed.to_string(),
        })
    }

    #[must_use]
    pub fn stored_file_name(&self) -> Option<&str> {
        match self {
            MaterialSource::File { stored_name, .. } => Some(stored_name),
            MaterialSource::Url { .. } => None,
        }
    }
}

//
// ─── MATERIAL ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialDraft {
    pub title: String,
    pub description: String,
    pub kind: Option<MaterialKind>,
    pub position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    id: MaterialId,
    course_id: CourseId,
    faculty_id: UserId,
    title: String,
    description: String,
    kind: MaterialKind,
    source: MaterialSource,
    position: u32,
    created_at: DateTime<Utc>,
}

impl Material {
    /// Validate a draft into a material. `next_position` is used when the
    /// draft does not specify an explicit position.
    ///
    /// # Errors
    ///
    /// Returns `MaterialError` on a blank title, a link without URL, or a
    /// file source without a name.
    pub fn new(
        id: MaterialId,
        course_id: CourseId,
        faculty_id: UserId,
        draft: MaterialDraft,
        source: MaterialSource,
        next_position: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, MaterialError> {
        let title = draft.title.trim().to_owned();
        if title.is_empty() {
            return Err(MaterialError::EmptyTitle);
        }
        let kind = draft.kind.unwrap_or(match &source {
            MaterialSource::Url { .. } => MaterialKind::Link,
            MaterialSource::File { .. } => MaterialKind::Document,
        });
        match &source {
            MaterialSource::File { original_name, .. } => {
                if kind == MaterialKind::Link {
                    return Err(MaterialError::LinkWithoutUrl);
                }
                if original_name.trim().is_empty() {
                    return Err(MaterialError::EmptyFileName);
                }
            }
            MaterialSource::Url { .. } => {}
        }

        Ok(Self {
            id,
            course_id,
            faculty_id,
            title,
            description: draft.description.trim().to_owned(),
            kind,
            source,
            position: draft.position.unwrap_or(next_position),
            created_at: now,
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        id: MaterialId,
        course_id: CourseId,
        faculty_id: UserId,
        title: String,
        description: String,
        kind: MaterialKind,
        source: MaterialSource,
        position: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            course_id,
            faculty_id,
            title,
            description,
            kind,
            source,
            position,
            created_at,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: MaterialId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> MaterialId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
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
    pub fn kind(&self) -> MaterialKind {
        self.kind
    }

    #[must_use]
    pub fn source(&self) -> &MaterialSource {
        &self.source
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.faculty_id == user
    }
}

/// 0-based index of `material` among the materials of the same kind, in
/// course order. Paywall limits are expressed against this index.
#[must_use]
pub fn kind_index(ordered: &[Material], material: MaterialId) -> Option<usize> {
    let target = ordered.iter().find(|m| m.id() == material)?;
    ordered
        .iter()
        .filter(|m| m.kind() == target.kind())
        .position(|m| m.id() == material)
}
