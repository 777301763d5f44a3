use async_trait::async_trait;
use chrono::{DateTime, Utc};
use learnsy_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Material, MaterialId, PaymentId, PaymentRequest,
    PaymentStatus, Progress, Quiz, QuizAttempt, QuizAttemptId, QuizId, StudySession,
    StudySessionId, Subscription, User, UserId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Filter for course listings. `limit` of `None` means no limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseQuery {
    pub faculty_id: Option<UserId>,
    pub published_only: bool,
    pub search: Option<String>,
    pub category: Option<String>,
    pub limit: Option<u32>,
}

impl CourseQuery {
    #[must_use]
    pub fn published() -> Self {
        Self {
            published_only: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn by_faculty(faculty_id: UserId) -> Self {
        Self {
            faculty_id: Some(faculty_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, course: &Course) -> bool {
        if self.published_only && !course.is_published() {
            return false;
        }
        if self.faculty_id.is_some_and(|f| course.faculty_id() != f) {
            return false;
        }
        if let Some(category) = self.category.as_deref() {
            if !course
                .category()
                .is_some_and(|c| c.eq_ignore_ascii_case(category))
            {
                return false;
            }
        }
        self.search
            .as_deref()
            .is_none_or(|needle| course.matches_search(needle))
    }
}

/// A student's completion flag for one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialCompletion {
    pub student_id: UserId,
    pub material_id: MaterialId,
    pub completed: bool,
    pub at: DateTime<Utc>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//
// Insert methods ignore the id carried by the entity and return the id
// assigned by the store.
//
// Every write that carries a `Progress` is checked against the revision that
// copy was read at and fails with `StorageError::Conflict` when the stored
// record has moved on; callers re-read and retry.

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the email is already registered.
    async fn insert_user(&self, user: &User) -> Result<UserId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_user(&self, id: UserId) -> Result<User, StorageError>;

    /// Look a user up by normalized email.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user does not exist.
    async fn update_user(&self, user: &User) -> Result<(), StorageError>;
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn insert_course(&self, course: &Course) -> Result<CourseId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn update_course(&self, course: &Course) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError>;

    /// Courses matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_courses(&self, query: &CourseQuery) -> Result<Vec<Course>, StorageError>;

    /// Delete a course together with its enrollments, progress, materials,
    /// quizzes and study sessions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Create an enrollment and its progress record in one step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the student is already enrolled.
    async fn enroll(
        &self,
        enrollment: &Enrollment,
        progress: &Progress,
    ) -> Result<EnrollmentId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// Enrollments of a student, most recently accessed first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_student_enrollments(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Enrollment>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_course_enrollments(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Enrollment>, StorageError>;

    /// Recompute the progress snapshot of every enrollment in a course from
    /// the stored lessons, materials and completions, and invalidate the
    /// progress copies read before. Returns the number of enrollments.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn recount_course(
        &self,
        course_id: CourseId,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_progress(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_student_progress(&self, student_id: UserId)
    -> Result<Vec<Progress>, StorageError>;

    /// Persist progress and the enrollment derived from it together.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist and
    /// `StorageError::Conflict` if `progress` is stale.
    async fn save_progress_snapshot(
        &self,
        progress: &Progress,
        enrollment: &Enrollment,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait MaterialRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the material cannot be stored.
    async fn insert_material(&self, material: &Material) -> Result<MaterialId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_material(&self, id: MaterialId) -> Result<Material, StorageError>;

    /// Materials of a course ordered by position, then id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_course_materials(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Material>, StorageError>;

    /// Delete a material and its completion records.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the material does not exist.
    async fn delete_material(&self, id: MaterialId) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn completed_material_ids(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<MaterialId>, StorageError>;

    /// Set or clear a completion flag and store the recomputed enrollment
    /// in one step. `progress` is the copy the enrollment was computed from;
    /// it is stored unchanged under a new revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist and
    /// `StorageError::Conflict` if `progress` is stale.
    async fn set_material_completion(
        &self,
        completion: &MaterialCompletion,
        progress: &Progress,
        enrollment: &Enrollment,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait QuizRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the quiz cannot be stored.
    async fn insert_quiz(&self, quiz: &Quiz) -> Result<QuizId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_course_quizzes(&self, course_id: CourseId) -> Result<Vec<Quiz>, StorageError>;

    /// Store a graded attempt and the progress it updated in one step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if `progress` is stale.
    async fn record_attempt(
        &self,
        attempt: &QuizAttempt,
        progress: &Progress,
    ) -> Result<QuizAttemptId, StorageError>;

    /// Attempts of a student on a quiz, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_attempts(
        &self,
        student_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Vec<QuizAttempt>, StorageError>;
}

#[async_trait]
pub trait StudySessionRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the session cannot be stored.
    async fn insert_session(&self, session: &StudySession)
    -> Result<StudySessionId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_session(&self, id: StudySessionId) -> Result<StudySession, StorageError>;

    /// The student's most recently started session that has not ended.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn active_session(&self, student_id: UserId)
    -> Result<Option<StudySession>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session does not exist and
    /// `StorageError::Conflict` if it already ended.
    async fn update_session(&self, session: &StudySession) -> Result<(), StorageError>;

    /// Store an ended session and the progress credited with its time in one step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the session does not exist and
    /// `StorageError::Conflict` if it already ended or `progress` is stale.
    async fn finish_session(
        &self,
        session: &StudySession,
        progress: &Progress,
    ) -> Result<(), StorageError>;

    /// Sessions of a student, most recently started first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_student_sessions(
        &self,
        student_id: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<StudySession>, StorageError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_subscription(&self, user_id: UserId)
    -> Result<Option<Subscription>, StorageError>;

    /// Insert or replace the user's subscription.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the subscription cannot be stored.
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StorageError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the reference is already in use.
    async fn insert_payment(&self, payment: &PaymentRequest) -> Result<PaymentId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no request has this reference.
    async fn get_payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<PaymentRequest, StorageError>;

    /// Store the status a pending payment moved to.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the payment does not exist and
    /// `StorageError::Conflict` unless it is still pending in the store.
    async fn update_payment(&self, payment: &PaymentRequest) -> Result<(), StorageError>;

    /// Store a confirmed payment and the subscription it activated in one step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the payment does not exist and
    /// `StorageError::Conflict` unless it is still pending in the store.
    async fn confirm_payment(
        &self,
        payment: &PaymentRequest,
        subscription: &Subscription,
    ) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY ADAPTER ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    courses: BTreeMap<CourseId, Course>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    progress: HashMap<(UserId, CourseId), Progress>,
    materials: BTreeMap<MaterialId, Material>,
    completions: BTreeSet<(UserId, MaterialId)>,
    quizzes: BTreeMap<QuizId, Quiz>,
    attempts: BTreeMap<QuizAttemptId, QuizAttempt>,
    sessions: BTreeMap<StudySessionId, StudySession>,
    subscriptions: HashMap<UserId, Subscription>,
    payments: BTreeMap<PaymentId, PaymentRequest>,
    sequences: HashMap<&'static str, u64>,
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> u64 {
        let seq = self.sequences.entry(table).or_insert(0);
        *seq += 1;
        *seq
    }

    fn replace_enrollment(&mut self, enrollment: &Enrollment) -> Result<(), StorageError> {
        let slot = self
            .enrollments
            .get_mut(&enrollment.id())
            .ok_or(StorageError::NotFound)?;
        *slot = enrollment.clone();
        Ok(())
    }

    fn put_progress(&mut self, progress: &Progress) -> Result<(), StorageError> {
        let key = (progress.student_id(), progress.course_id());
        let current = self.progress.get(&key).map_or(0, Progress::revision);
        if current != progress.revision() {
            return Err(StorageError::Conflict);
        }
        self.progress
            .insert(key, progress.clone().with_revision(current + 1));
        Ok(())
    }
}

/// In-memory repository for tests and prototyping.
///
/// All tables sit behind one mutex, so multi-record writes are atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn insert_user(&self, user: &User) -> Result<UserId, StorageError> {
        let mut t = self.lock()?;
        if t.users.values().any(|u| u.email() == user.email()) {
            return Err(StorageError::Conflict);
        }
        let id = UserId::new(t.next_id("users"));
        t.users.insert(id, user.clone().with_id(id));
        Ok(id)
    }

    async fn get_user(&self, id: UserId) -> Result<User, StorageError> {
        let t = self.lock()?;
        t.users.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let t = self.lock()?;
        Ok(t.users.values().find(|u| u.email() == email).cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        if t
            .users
            .values()
            .any(|u| u.id() != user.id() && u.email() == user.email())
        {
            return Err(StorageError::Conflict);
        }
        let slot = t.users.get_mut(&user.id()).ok_or(StorageError::NotFound)?;
        *slot = user.clone();
        Ok(())
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn insert_course(&self, course: &Course) -> Result<CourseId, StorageError> {
        let mut t = self.lock()?;
        let id = CourseId::new(t.next_id("courses"));
        t.courses.insert(id, course.clone().with_id(id));
        Ok(id)
    }

    async fn update_course(&self, course: &Course) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let slot = t.courses.get_mut(&course.id()).ok_or(StorageError::NotFound)?;
        *slot = course.clone();
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let t = self.lock()?;
        t.courses.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_courses(&self, query: &CourseQuery) -> Result<Vec<Course>, StorageError> {
        let t = self.lock()?;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(t.courses
            .values()
            .rev()
            .filter(|c| query.matches(c))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_course(&self, id: CourseId) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        t.courses.remove(&id).ok_or(StorageError::NotFound)?;
        t.enrollments.retain(|_, e| e.course_id() != id);
        t.progress.retain(|(_, course), _| *course != id);
        let removed: BTreeSet<MaterialId> = t
            .materials
            .values()
            .filter(|m| m.course_id() == id)
            .map(Material::id)
            .collect();
        t.materials.retain(|mid, _| !removed.contains(mid));
        t.completions.retain(|(_, mid)| !removed.contains(mid));
        let quizzes: BTreeSet<QuizId> = t
            .quizzes
            .values()
            .filter(|q| q.course_id() == id)
            .map(Quiz::id)
            .collect();
        t.quizzes.retain(|qid, _| !quizzes.contains(qid));
        t.attempts.retain(|_, a| !quizzes.contains(&a.quiz_id));
        t.sessions.retain(|_, s| s.course_id() != id);
        Ok(())
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn enroll(
        &self,
        enrollment: &Enrollment,
        progress: &Progress,
    ) -> Result<EnrollmentId, StorageError> {
        let mut t = self.lock()?;
        let student = enrollment.student_id();
        let course = enrollment.course_id();
        if t
            .enrollments
            .values()
            .any(|e| e.student_id() == student && e.course_id() == course)
        {
            return Err(StorageError::Conflict);
        }
        t.put_progress(progress)?;
        let id = EnrollmentId::new(t.next_id("enrollments"));
        t.enrollments.insert(id, enrollment.clone().with_id(id));
        Ok(id)
    }

    async fn get_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let t = self.lock()?;
        Ok(t.enrollments
            .values()
            .find(|e| e.student_id() == student_id && e.course_id() == course_id)
            .cloned())
    }

    async fn list_student_enrollments(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let t = self.lock()?;
        let mut out: Vec<Enrollment> = t
            .enrollments
            .values()
            .filter(|e| e.student_id() == student_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.last_accessed_at()
                .cmp(&a.last_accessed_at())
                .then(b.id().cmp(&a.id()))
        });
        Ok(out)
    }

    async fn list_course_enrollments(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let t = self.lock()?;
        Ok(t.enrollments
            .values()
            .filter(|e| e.course_id() == course_id)
            .cloned()
            .collect())
    }

    async fn recount_course(
        &self,
        course_id: CourseId,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut guard = self.lock()?;
        let t = &mut *guard;
        let total_lessons = t
            .courses
            .get(&course_id)
            .ok_or(StorageError::NotFound)?
            .total_lessons();
        let materials: BTreeSet<MaterialId> = t
            .materials
            .values()
            .filter(|m| m.course_id() == course_id)
            .map(Material::id)
            .collect();
        let total_materials = u32::try_from(materials.len()).unwrap_or(u32::MAX);

        let mut count = 0;
        for enrollment in t
            .enrollments
            .values_mut()
            .filter(|e| e.course_id() == course_id)
        {
            let key = (enrollment.student_id(), course_id);
            let done = t
                .completions
                .iter()
                .filter(|(student, mid)| *student == key.0 && materials.contains(mid))
                .count();
            let lessons = t
                .progress
                .get(&key)
                .map_or(enrollment.progress().lessons_completed, Progress::lessons_completed);
            enrollment.recount(
                lessons,
                u32::try_from(done).unwrap_or(u32::MAX),
                total_lessons,
                total_materials,
                now,
            );
            if let Some(progress) = t.progress.get_mut(&key) {
                *progress = progress.clone().with_revision(progress.revision() + 1);
            }
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>, StorageError> {
        let t = self.lock()?;
        Ok(t.progress.get(&(student_id, course_id)).cloned())
    }

    async fn list_student_progress(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Progress>, StorageError> {
        let t = self.lock()?;
        let mut out: Vec<Progress> = t
            .progress
            .values()
            .filter(|p| p.student_id() == student_id)
            .cloned()
            .collect();
        out.sort_by_key(Progress::course_id);
        Ok(out)
    }

    async fn save_progress_snapshot(
        &self,
        progress: &Progress,
        enrollment: &Enrollment,
    ) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        if !t.enrollments.contains_key(&enrollment.id()) {
            return Err(StorageError::NotFound);
        }
        t.put_progress(progress)?;
        t.replace_enrollment(enrollment)
    }
}

#[async_trait]
impl MaterialRepository for InMemoryRepository {
    async fn insert_material(&self, material: &Material) -> Result<MaterialId, StorageError> {
        let mut t = self.lock()?;
        if !t.courses.contains_key(&material.course_id()) {
            return Err(StorageError::NotFound);
        }
        let id = MaterialId::new(t.next_id("materials"));
        t.materials.insert(id, material.clone().with_id(id));
        Ok(id)
    }

    async fn get_material(&self, id: MaterialId) -> Result<Material, StorageError> {
        let t = self.lock()?;
        t.materials.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_course_materials(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Material>, StorageError> {
        let t = self.lock()?;
        let mut out: Vec<Material> = t
            .materials
            .values()
            .filter(|m| m.course_id() == course_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.position(), m.id()));
        Ok(out)
    }

    async fn delete_material(&self, id: MaterialId) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        t.materials.remove(&id).ok_or(StorageError::NotFound)?;
        t.completions.retain(|(_, mid)| *mid != id);
        Ok(())
    }

    async fn completed_material_ids(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<MaterialId>, StorageError> {
        let t = self.lock()?;
        Ok(t.completions
            .iter()
            .filter(|(student, mid)| {
                *student == student_id
                    && t.materials
                        .get(mid)
                        .is_some_and(|m| m.course_id() == course_id)
            })
            .map(|(_, mid)| *mid)
            .collect())
    }

    async fn set_material_completion(
        &self,
        completion: &MaterialCompletion,
        progress: &Progress,
        enrollment: &Enrollment,
    ) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        if !t.materials.contains_key(&completion.material_id)
            || !t.enrollments.contains_key(&enrollment.id())
        {
            return Err(StorageError::NotFound);
        }
        t.put_progress(progress)?;
        t.replace_enrollment(enrollment)?;
        let key = (completion.student_id, completion.material_id);
        if completion.completed {
            t.completions.insert(key);
        } else {
            t.completions.remove(&key);
        }
        Ok(())
    }
}

#[async_trait]
impl QuizRepository for InMemoryRepository {
    async fn insert_quiz(&self, quiz: &Quiz) -> Result<QuizId, StorageError> {
        let mut t = self.lock()?;
        if !t.courses.contains_key(&quiz.course_id()) {
            return Err(StorageError::NotFound);
        }
        let id = QuizId::new(t.next_id("quizzes"));
        t.quizzes.insert(id, quiz.clone().with_id(id));
        Ok(id)
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError> {
        let t = self.lock()?;
        t.quizzes.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_course_quizzes(&self, course_id: CourseId) -> Result<Vec<Quiz>, StorageError> {
        let t = self.lock()?;
        Ok(t.quizzes
            .values()
            .filter(|q| q.course_id() == course_id)
            .cloned()
            .collect())
    }

    async fn record_attempt(
        &self,
        attempt: &QuizAttempt,
        progress: &Progress,
    ) -> Result<QuizAttemptId, StorageError> {
        let mut t = self.lock()?;
        if !t.quizzes.contains_key(&attempt.quiz_id) {
            return Err(StorageError::NotFound);
        }
        t.put_progress(progress)?;
        let id = QuizAttemptId::new(t.next_id("quiz_attempts"));
        let mut stored = attempt.clone();
        stored.id = id;
        t.attempts.insert(id, stored);
        Ok(id)
    }

    async fn list_attempts(
        &self,
        student_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        let t = self.lock()?;
        Ok(t.attempts
            .values()
            .rev()
            .filter(|a| a.student_id == student_id && a.quiz_id == quiz_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StudySessionRepository for InMemoryRepository {
    async fn insert_session(
        &self,
        session: &StudySession,
    ) -> Result<StudySessionId, StorageError> {
        let mut t = self.lock()?;
        let id = StudySessionId::new(t.next_id("study_sessions"));
        t.sessions.insert(id, session.clone().with_id(id));
        Ok(id)
    }

    async fn get_session(&self, id: StudySessionId) -> Result<StudySession, StorageError> {
        let t = self.lock()?;
        t.sessions.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn active_session(
        &self,
        student_id: UserId,
    ) -> Result<Option<StudySession>, StorageError> {
        let t = self.lock()?;
        Ok(t.sessions
            .values()
            .rev()
            .find(|s| s.student_id() == student_id && s.is_active())
            .cloned())
    }

    async fn update_session(&self, session: &StudySession) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let slot = t.sessions.get_mut(&session.id()).ok_or(StorageError::NotFound)?;
        if !slot.is_active() {
            return Err(StorageError::Conflict);
        }
        *slot = session.clone();
        Ok(())
    }

    async fn finish_session(
        &self,
        session: &StudySession,
        progress: &Progress,
    ) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let stored = t.sessions.get(&session.id()).ok_or(StorageError::NotFound)?;
        if !stored.is_active() {
            return Err(StorageError::Conflict);
        }
        t.put_progress(progress)?;
        t.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn list_student_sessions(
        &self,
        student_id: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<StudySession>, StorageError> {
        let t = self.lock()?;
        let limit = limit.map_or(usize::MAX, |l| l as usize);
        let mut out: Vec<StudySession> = t
            .sessions
            .values()
            .filter(|s| s.student_id() == student_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.started_at()
                .cmp(&a.started_at())
                .then(b.id().cmp(&a.id()))
        });
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryRepository {
    async fn get_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, StorageError> {
        let t = self.lock()?;
        Ok(t.subscriptions.get(&user_id).cloned())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        t.subscriptions
            .insert(subscription.user_id(), subscription.clone());
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryRepository {
    async fn insert_payment(&self, payment: &PaymentRequest) -> Result<PaymentId, StorageError> {
        let mut t = self.lock()?;
        if t
            .payments
            .values()
            .any(|p| p.reference() == payment.reference())
        {
            return Err(StorageError::Conflict);
        }
        let id = PaymentId::new(t.next_id("payments"));
        t.payments.insert(id, payment.clone().with_id(id));
        Ok(id)
    }

    async fn get_payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<PaymentRequest, StorageError> {
        let t = self.lock()?;
        t.payments
            .values()
            .find(|p| p.reference() == reference)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn update_payment(&self, payment: &PaymentRequest) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let slot = t.payments.get_mut(&payment.id()).ok_or(StorageError::NotFound)?;
        if slot.status() != PaymentStatus::Pending {
            return Err(StorageError::Conflict);
        }
        *slot = payment.clone();
        Ok(())
    }

    async fn confirm_payment(
        &self,
        payment: &PaymentRequest,
        subscription: &Subscription,
    ) -> Result<(), StorageError> {
        let mut t = self.lock()?;
        let slot = t.payments.get_mut(&payment.id()).ok_or(StorageError::NotFound)?;
        if slot.status() != PaymentStatus::Pending {
            return Err(StorageError::Conflict);
        }
        *slot = payment.clone();
        t.subscriptions
            .insert(subscription.user_id(), subscription.clone());
        Ok(())
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Aggregates every repository behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserRepository>,
    pub courses: Arc<dyn CourseRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub materials: Arc<dyn MaterialRepository>,
    pub quizzes: Arc<dyn QuizRepository>,
    pub sessions: Arc<dyn StudySessionRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Storage {
    /// Wire every repository to the same backend.
    #[must_use]
    pub fn from_backend<R>(repo: R) -> Self
    where
        R: UserRepository
            + CourseRepository
            + EnrollmentRepository
            + ProgressRepository
            + MaterialRepository
            + QuizRepository
            + StudySessionRepository
            + SubscriptionRepository
            + PaymentRepository
            + Clone
            + 'static,
    {
        Self {
            users: Arc::new(repo.clone()),
            courses: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            materials: Arc::new(repo.clone()),
            quizzes: Arc::new(repo.clone()),
            sessions: Arc::new(repo.clone()),
            subscriptions: Arc::new(repo.clone()),
            payments: Arc::new(repo),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(InMemoryRepository::new())
    }
}
