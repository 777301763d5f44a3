use chrono::Duration;
use learnsy_core::model::{
    CourseDraft, CourseModule, EnrollmentStatus, Lesson, MaterialDraft, PaymentError,
    PaymentStatus, Plan, QuizQuestion, Role,
};
use learnsy_core::time::fixed_now;
use services::{
    AppServices, Clock, NewMaterialSource, PaymentServiceError, QuizView, ServicesConfig,
};

fn config(dir: &std::path::Path) -> ServicesConfig {
    let mut config = ServicesConfig::new("flow-test-secret");
    config.upload_dir = dir.to_path_buf();
    config.ai_delay = std::time::Duration::ZERO;
    config
}

fn rust_course() -> CourseDraft {
    CourseDraft {
        title: "Rust Basics".into(),
        description: "Ownership and borrowing".into(),
        modules: vec![CourseModule {
            title: "Getting started".into(),
            lessons: vec![Lesson {
                title: "Hello".into(),
                content: "fn main() {}".into(),
                duration_minutes: 15,
            }],
        }],
        ..CourseDraft::default()
    }
}

#[tokio::test]
async fn register_publish_enroll_and_finish_a_course() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Clock::fixed(fixed_now());
    let app = AppServices::new_sqlite(
        "sqlite:file:memdb_learning_flow?mode=memory&cache=shared",
        clock,
        &config(dir.path()),
    )
    .await
    .expect("sqlite services");

    let faculty = app
        .auth()
        .register("Ada".into(), "ada@example.com", "password1", Role::Faculty)
        .await
        .expect("register faculty");
    let student = app
        .auth()
        .register("Bo".into(), "bo@example.com", "password2", Role::Student)
        .await
        .expect("register student");
    let instructor = app.tokens().verify(&faculty.token).expect("faculty token");
    let learner = app.tokens().verify(&student.token).expect("student token");
    assert_eq!(learner.role, Role::Student);

    let course = app
        .courses()
        .create_course(instructor, rust_course())
        .await
        .expect("create course");
    app.courses()
        .set_published(instructor, course.id(), true)
        .await
        .expect("publish");
    let material = app
        .materials()
        .add_material(
            instructor,
            course.id(),
            MaterialDraft {
                title: "The Book".into(),
                ..MaterialDraft::default()
            },
            NewMaterialSource::Url("https://doc.rust-lang.org/book/".into()),
        )
        .await
        .expect("add material");
    let quiz = app
        .quizzes()
        .create_quiz(
            instructor,
            course.id(),
            "Check-in".into(),
            vec![QuizQuestion {
                prompt: "Who owns a value?".into(),
                options: vec!["One owner".into(), "Everyone".into()],
                correct_index: 0,
                points: 5,
            }],
        )
        .await
        .expect("create quiz");

    app.enrollments()
        .enroll(learner, course.id())
        .await
        .expect("enroll");

    let done = app
        .progress()
        .complete_lesson(learner, course.id(), 0, 0)
        .await
        .expect("complete lesson");
    assert!(done.newly_completed);
    assert_eq!(done.percent, 50);

    let toggle = app
        .materials()
        .toggle_completion(learner, material.id())
        .await
        .expect("toggle material");
    assert!(toggle.completed);
    assert_eq!(toggle.percent, 100);

    let QuizView::Redacted(redacted) = app
        .quizzes()
        .get_quiz(learner, quiz.id())
        .await
        .expect("get quiz")
    else {
        panic!("students must not see answers");
    };
    assert_eq!(redacted.max_score, 5);
    let result = app
        .quizzes()
        .submit_attempt(learner, quiz.id(), vec![Some(0)])
        .await
        .expect("submit attempt");
    assert_eq!(result.attempt.percent, 100);

    let dashboard = app.dashboards().student(learner).await.expect("dashboard");
    assert_eq!(dashboard.total_courses, 1);
    assert_eq!(dashboard.completed_courses, 1);
    assert_eq!(dashboard.courses[0].status, EnrollmentStatus::Completed);

    let students = app
        .enrollments()
        .list_course_students(instructor, course.id())
        .await
        .expect("course students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0].percent, 100);
}

#[tokio::test]
async fn qr_payment_upgrades_the_plan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = AppServices::in_memory(Clock::fixed(fixed_now()), &config(dir.path()));
    let session = app
        .auth()
        .register("Cy".into(), "cy@example.com", "password3", Role::Student)
        .await
        .expect("register");
    let user = session.user.id();

    let before = app.subscriptions().current(user).await.expect("current");
    assert_eq!(before.effective_plan, Plan::Free);

    let request = app
        .payments()
        .create_qr_payment(user, Plan::Basic)
        .await
        .expect("create payment");
    assert_eq!(request.status(), PaymentStatus::Pending);
    let confirmed = app
        .payments()
        .confirm(user, request.reference())
        .await
        .expect("confirm");
    assert_eq!(confirmed.subscription.effective_plan, Plan::Basic);

    let after = app.subscriptions().current(user).await.expect("current");
    assert_eq!(after.plan, Plan::Basic);
    assert!(!after.features.is_empty());
}

async fn sqlite_app(name: &str, dir: &std::path::Path) -> AppServices {
    AppServices::new_sqlite(
        &format!("sqlite:file:{name}?mode=memory&cache=shared"),
        Clock::fixed(fixed_now()),
        &config(dir),
    )
    .await
    .expect("sqlite services")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_confirmations_grant_the_plan_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = sqlite_app("memdb_payment_race", dir.path()).await;
    let user = app
        .auth()
        .register("Cy".into(), "cy@example.com", "password3", Role::Student)
        .await
        .expect("register")
        .user
        .id();
    let request = app
        .payments()
        .create_qr_payment(user, Plan::Basic)
        .await
        .expect("create payment");

    let confirms: Vec<_> = (0..2)
        .map(|_| {
            let payments = app.payments();
            let reference = request.reference().to_owned();
            tokio::spawn(async move { payments.confirm(user, &reference).await })
        })
        .collect();
    let mut confirmed = 0;
    for handle in confirms {
        match handle.await.expect("join") {
            Ok(_) => confirmed += 1,
            Err(err) => assert!(
                matches!(
                    err,
                    PaymentServiceError::Payment(PaymentError::NotPending("confirmed"))
                ),
                "{err:?}"
            ),
        }
    }
    assert_eq!(confirmed, 1);

    let current = app.subscriptions().current(user).await.expect("current");
    assert_eq!(current.plan, Plan::Basic);
    assert_eq!(current.expires_at, Some(fixed_now() + Duration::days(30)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_lesson_completions_are_all_kept() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = sqlite_app("memdb_lesson_race", dir.path()).await;
    let faculty = app
        .auth()
        .register("Ada".into(), "ada@example.com", "password1", Role::Faculty)
        .await
        .expect("register faculty");
    let student = app
        .auth()
        .register("Bo".into(), "bo@example.com", "password2", Role::Student)
        .await
        .expect("register student");
    let instructor = app.tokens().verify(&faculty.token).expect("faculty token");
    let learner = app.tokens().verify(&student.token).expect("student token");

    let mut draft = rust_course();
    draft.modules[0].lessons.push(Lesson {
        title: "Borrowing".into(),
        content: String::new(),
        duration_minutes: 20,
    });
    let course = app
        .courses()
        .create_course(instructor, draft)
        .await
        .expect("create course");
    app.courses()
        .set_published(instructor, course.id(), true)
        .await
        .expect("publish");
    app.enrollments()
        .enroll(learner, course.id())
        .await
        .expect("enroll");

    let completions: Vec<_> = (0..2)
        .map(|lesson| {
            let progress = app.progress();
            let course_id = course.id();
            tokio::spawn(async move {
                progress.complete_lesson(learner, course_id, 0, lesson).await
            })
        })
        .collect();
    for handle in completions {
        handle.await.expect("join").expect("complete lesson");
    }

    let view = app
        .progress()
        .course_progress(learner, course.id())
        .await
        .expect("course progress");
    assert_eq!(view.progress.completed_lessons().len(), 2);
    assert_eq!(view.percent, 100);
    assert_eq!(view.status, EnrollmentStatus::Completed);
}
