mod course;
mod enrollment;
mod ids;
mod material;
mod payment;
mod progress;
mod quiz;
mod session;
mod subscription;
mod user;

pub use ids::{
    CourseId, EnrollmentId, MaterialId, ParseIdError, PaymentId, QuizAttemptId, QuizId,
    StudySessionId, UserId,
};

pub use course::{Course, CourseDraft, CourseError, CourseLevel, CourseModule, Lesson};
pub use enrollment::{Enrollment, EnrollmentStatus, ProgressSnapshot};
pub use material::{Material, MaterialDraft, MaterialError, MaterialKind, MaterialSource, kind_index};
pub use payment::{DEFAULT_PAYMENT_TTL_MINUTES, PaymentError, PaymentRequest, PaymentStatus, qr_payload};
pub use progress::{
    Achievement, AchievementKind, CALENDAR_RETENTION, LessonRef, Progress, StudyDay,
};
pub use quiz::{
    MAX_QUESTION_POINTS, Quiz, QuizAttempt, QuizError, QuizQuestion, QuizScore,
    RedactedQuestion, RedactedQuiz,
};
pub use session::{Activity, SessionStateError, SessionStatus, StudySession};
pub use subscription::{
    CURRENCY, Feature, Plan, PlanInfo, Subscription, SubscriptionError, SubscriptionStatus,
};
pub use user::{
    PASSWORD_MAX_LEN, PASSWORD_MIN_LEN, Profile, Role, User, UserError, normalize_email,
    validate_password,
};
