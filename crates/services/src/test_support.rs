//! Fixtures shared by the service unit tests.

use learnsy_core::model::{
    Course, CourseDraft, CourseModule, Lesson, Plan, Profile, Role, Subscription, User, UserId,
};
use learnsy_core::time::fixed_clock;
use storage::repository::Storage;

use crate::Clock;
use crate::access::Actor;
use crate::courses::CourseService;
use crate::enrollments::EnrollmentService;

pub(crate) fn clock() -> Clock {
    fixed_clock()
}

pub(crate) async fn actor(storage: &Storage, email: &str, role: Role) -> Actor {
    let user = User::new(
        UserId::new(0),
        "Test User",
        email,
        "not-a-hash",
        role,
        Profile::default(),
        clock().now(),
    )
    .unwrap();
    let id = storage.users.insert_user(&user).await.unwrap();
    Actor::new(id, role)
}

/// One module per entry, each with that many lessons.
pub(crate) fn draft(title: &str, lessons_per_module: &[usize]) -> CourseDraft {
    CourseDraft {
        title: title.into(),
        description: format!("All about {title}"),
        category: Some("testing".into()),
        modules: lessons_per_module
            .iter()
            .enumerate()
            .map(|(m, count)| CourseModule {
                title: format!("Module {m}"),
                lessons: (0..*count)
                    .map(|l| Lesson {
                        title: format!("Lesson {m}.{l}"),
                        content: String::new(),
                        duration_minutes: 10,
                    })
                    .collect(),
            })
            .collect(),
        ..CourseDraft::default()
    }
}

pub(crate) async fn published_course(
    storage: &Storage,
    owner: Actor,
    lessons_per_module: &[usize],
) -> Course {
    let courses = CourseService::new(clock(), storage);
    let course = courses
        .create_course(owner, draft("Rust", lessons_per_module))
        .await
        .unwrap();
    courses.set_published(owner, course.id(), true).await.unwrap()
}

pub(crate) async fn enrolled_student(storage: &Storage, email: &str, course: &Course) -> Actor {
    let student = actor(storage, email, Role::Student).await;
    EnrollmentService::new(clock(), storage)
        .enroll(student, course.id())
        .await
        .unwrap();
    student
}

pub(crate) async fn set_plan(storage: &Storage, user: UserId, plan: Plan) {
    let mut sub = Subscription::free(user, clock().now());
    if plan != Plan::Free {
        sub.activate(plan, clock().now()).unwrap();
    }
    storage.subscriptions.save_subscription(&sub).await.unwrap();
}
