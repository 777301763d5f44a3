//! Simulated AI summaries. No model is called: the text is derived from the
//! material's own title and description after an artificial delay.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use learnsy_core::model::{Feature, Material, MaterialId};
use storage::repository::{MaterialRepository, Storage};

use crate::Clock;
use crate::access::{AccessGuard, Actor, FoundExt};
use crate::error::AiSummaryError;

pub const SUMMARY_MODEL: &str = "learnsy-mock-1";

/// Default simulated processing time.
pub const DEFAULT_AI_DELAY: Duration = Duration::from_millis(1500);

const MAX_KEY_POINTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialSummary {
    pub material_id: MaterialId,
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub word_count: u32,
    pub generated_at: DateTime<Utc>,
    pub model: &'static str,
}

#[derive(Clone)]
pub struct AiSummaryService {
    clock: Clock,
    materials: Arc<dyn MaterialRepository>,
    guard: AccessGuard,
    delay: Duration,
}

impl AiSummaryService {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage, delay: Duration) -> Self {
        Self {
            clock,
            materials: Arc::clone(&storage.materials),
            guard: AccessGuard::new(clock, storage),
            delay,
        }
    }

    /// # Errors
    ///
    /// Returns `AccessError::PlanRequired` without the AI summary feature and
    /// `AccessError::NotEnrolled` / `NotOwner` for outsiders.
    pub async fn summarize(
        &self,
        actor: Actor,
        material_id: MaterialId,
    ) -> Result<MaterialSummary, AiSummaryError> {
        let material = self
            .materials
            .get_material(material_id)
            .await
            .or_missing("material")?;
        self.guard.course_access(actor, material.course_id()).await?;
        self.guard
            .require_feature(actor.id, Feature::AiSummary)
            .await?;

        if !self.delay.is_zero() {
            debug!(material = %material_id, delay = ?self.delay, "simulating summary");
            tokio::time::sleep(self.delay).await;
        }
        let summary = summarize_material(&material, self.clock.now());
        info!(user = %actor.id, material = %material_id, "generated summary");
        Ok(summary)
    }
}

fn sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Same material in, same summary out (apart from the timestamp).
#[must_use]
pub fn summarize_material(material: &Material, now: DateTime<Utc>) -> MaterialSummary {
    let title = material.title();
    let description = material.description();
    let found = sentences(description);

    let key_points = if found.is_empty() {
        vec![
            format!("Core ideas behind {title}"),
            format!("How {title} is applied in practice"),
            format!("Questions to review after studying {title}"),
        ]
    } else {
        found.iter().take(MAX_KEY_POINTS).cloned().collect()
    };

    let summary = match found.first() {
        Some(lead) => format!(
            "This {} material, \"{title}\", focuses on the following: {lead}. It is organised into {} key point(s) for quick review.",
            material.kind(),
            key_points.len()
        ),
        None => format!(
            "This {} material, \"{title}\", introduces its topic and highlights the essentials for quick review.",
            material.kind()
        ),
    };

    let words = title.split_whitespace().count() + description.split_whitespace().count();
    MaterialSummary {
        material_id: material.id(),
        title: title.to_owned(),
        summary,
        key_points,
        word_count: u32::try_from(words).unwrap_or(u32::MAX),
        generated_at: now,
        model: SUMMARY_MODEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::materials::{MaterialService, NewMaterialSource};
    use crate::test_support::{actor, clock, enrolled_student, published_course, set_plan};
    use learnsy_core::model::{MaterialDraft, Plan, Role};

    async fn setup(storage: &Storage) -> (Actor, Actor, Material) {
        let dir = std::env::temp_dir();
        let owner = actor(storage, "f@example.com", Role::Faculty).await;
        let course = published_course(storage, owner, &[1]).await;
        let student = enrolled_student(storage, "s@example.com", &course).await;
        let material = MaterialService::new(clock(), storage, dir)
            .add_material(
                owner,
                course.id(),
                MaterialDraft {
                    title: "Ownership".into(),
                    description: "Every value has one owner. Borrowing lends access. Lifetimes bound borrows. Drop runs at scope end.".into(),
                    ..MaterialDraft::default()
                },
                NewMaterialSource::Url("https://doc.rust-lang.org/book/ch04-00.html".into()),
            )
            .await
            .unwrap();
        (owner, student, material)
    }

    #[tokio::test]
    async fn summary_requires_premium() {
        let storage = Storage::in_memory();
        let (_, student, material) = setup(&storage).await;
        let service = AiSummaryService::new(clock(), &storage, Duration::ZERO);

        for plan in [Plan::Free, Plan::Basic] {
            set_plan(&storage, student.id, plan).await;
            assert!(matches!(
                service.summarize(student, material.id()).await,
                Err(AiSummaryError::Access(AccessError::PlanRequired(Feature::AiSummary)))
            ));
        }

        set_plan(&storage, student.id, Plan::Premium).await;
        let summary = service.summarize(student, material.id()).await.unwrap();
        assert_eq!(summary.model, SUMMARY_MODEL);
        assert_eq!(summary.key_points.len(), 3);
        assert_eq!(summary.key_points[0], "Every value has one owner");
        assert_eq!(summary.word_count, 17);
    }

    #[tokio::test]
    async fn summary_is_deterministic() {
        let storage = Storage::in_memory();
        let (owner, _, material) = setup(&storage).await;
        set_plan(&storage, owner.id, Plan::Premium).await;
        let service = AiSummaryService::new(clock(), &storage, Duration::from_millis(5));

        let a = service.summarize(owner, material.id()).await.unwrap();
        let b = service.summarize(owner, material.id()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn outsiders_are_rejected_before_the_plan_check() {
        let storage = Storage::in_memory();
        let (_, _, material) = setup(&storage).await;
        let outsider = actor(&storage, "o@example.com", Role::Student).await;
        set_plan(&storage, outsider.id, Plan::Premium).await;
        let service = AiSummaryService::new(clock(), &storage, Duration::ZERO);

        assert!(matches!(
            service.summarize(outsider, material.id()).await,
            Err(AiSummaryError::Access(AccessError::NotEnrolled))
        ));
    }
}
