use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use learnsy_core::model::{Course, CourseDraft, CourseId, Enrollment, MaterialDraft, Quiz, QuizQuestion};
use services::{
    CourseAnalytics, CourseStudent, MaterialUpload, MaterialView, NewMaterialSource, QuizView,
};
use storage::repository::CourseQuery;

use crate::error::{ApiError, ApiResult};
use crate::extract::{AuthUser, Json, Path, Query};
use crate::response::{ApiResponse, Message};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    q: Option<String>,
    category: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    published: bool,
}

#[derive(Debug, Deserialize)]
struct QuizRequest {
    title: String,
    questions: Vec<QuizQuestion>,
}

async fn list_courses(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ApiResponse<Vec<Course>>> {
    let query = CourseQuery {
        search: query.q,
        category: query.category,
        limit: query.limit,
        ..CourseQuery::published()
    };
    let courses = state.services.courses().list_published(query).await?;
    Ok(ApiResponse::ok(courses))
}

async fn create_course(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(draft): Json<CourseDraft>,
) -> ApiResult<ApiResponse<Course>> {
    let course = state.services.courses().create_course(actor, draft).await?;
    Ok(ApiResponse::created(course))
}

async fn my_courses(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<ApiResponse<Vec<Course>>> {
    let courses = state.services.courses().list_faculty_courses(actor).await?;
    Ok(ApiResponse::ok(courses))
}

async fn get_course(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<CourseId>,
) -> ApiResult<ApiResponse<Course>> {
    let course = state
        .services
        .courses()
        .get_course(user.map(|AuthUser(actor)| actor), id)
        .await?;
    Ok(ApiResponse::ok(course))
}

async fn update_course(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
    Json(draft): Json<CourseDraft>,
) -> ApiResult<ApiResponse<Course>> {
    let course = state.services.courses().update_course(actor, id, draft).await?;
    Ok(ApiResponse::ok(course))
}

async fn delete_course(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
) -> ApiResult<ApiResponse<Message>> {
    state.services.courses().delete_course(actor, id).await?;
    Ok(ApiResponse::message("Course deleted"))
}

async fn publish_course(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
    Json(body): Json<PublishRequest>,
) -> ApiResult<ApiResponse<Course>> {
    let course = state
        .services
        .courses()
        .set_published(actor, id, body.published)
        .await?;
    Ok(ApiResponse::ok(course))
}

async fn enroll(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
) -> ApiResult<ApiResponse<Enrollment>> {
    let enrollment = state.services.enrollments().enroll(actor, id).await?;
    Ok(ApiResponse::created(enrollment))
}

async fn course_students(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
) -> ApiResult<ApiResponse<Vec<CourseStudent>>> {
    let students = state
        .services
        .enrollments()
        .list_course_students(actor, id)
        .await?;
    Ok(ApiResponse::ok(students))
}

async fn course_analytics(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
) -> ApiResult<ApiResponse<CourseAnalytics>> {
    let analytics = state.services.dashboards().course_analytics(actor, id).await?;
    Ok(ApiResponse::ok(analytics))
}

async fn list_materials(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
) -> ApiResult<ApiResponse<Vec<MaterialView>>> {
    let materials = state.services.materials().list_for_course(actor, id).await?;
    Ok(ApiResponse::ok(materials))
}

/// Multipart fields: `title`, `description`, `kind`, `position`, and either
/// `file` or `url`.
async fn add_material(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
    mut multipart: Multipart,
) -> ApiResult<ApiResponse<MaterialView>> {
    let mut draft = MaterialDraft::default();
    let mut upload = None;
    let mut url = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let bytes = field.bytes().await?;
                upload = Some(MaterialUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "title" => draft.title = field.text().await?,
            "description" => draft.description = field.text().await?,
            "kind" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    draft.kind = Some(text.parse().map_err(ApiError::bad_request)?);
                }
            }
            "position" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    let position = text
                        .trim()
                        .parse()
                        .map_err(|_| ApiError::bad_request("Position must be a whole number"))?;
                    draft.position = Some(position);
                }
            }
            "url" => url = Some(field.text().await?),
            _ => {}
        }
    }

    let source = match (upload, url) {
        (Some(upload), _) => NewMaterialSource::Upload(upload),
        (None, Some(url)) if !url.trim().is_empty() => NewMaterialSource::Url(url),
        _ => return Err(ApiError::bad_request("Either a file or a url is required")),
    };
    let material = state
        .services
        .materials()
        .add_material(actor, id, draft, source)
        .await?;
    Ok(ApiResponse::created(MaterialView {
        material,
        locked: false,
        completed: false,
    }))
}

async fn list_quizzes(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
) -> ApiResult<ApiResponse<Vec<QuizView>>> {
    let quizzes = state.services.quizzes().list_for_course(actor, id).await?;
    Ok(ApiResponse::ok(quizzes))
}

async fn create_quiz(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CourseId>,
    Json(body): Json<QuizRequest>,
) -> ApiResult<ApiResponse<Quiz>> {
    let quiz = state
        .services
        .quizzes()
        .create_quiz(actor, id, body.title, body.questions)
        .await?;
    Ok(ApiResponse::created(quiz))
}

pub fn course_routes() -> Router<AppState> {
    Router::new()
        .route("/api/courses", get(list_courses).post(create_course))
        .route("/api/courses/mine", get(my_courses))
        .route(
            "/api/courses/:id",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/api/courses/:id/publish", post(publish_course))
        .route("/api/courses/:id/enroll", post(enroll))
        .route("/api/courses/:id/students", get(course_students))
        .route("/api/courses/:id/analytics", get(course_analytics))
        .route(
            "/api/courses/:id/materials",
            get(list_materials).post(add_material),
        )
        .route("/api/courses/:id/quizzes", get(list_quizzes).post(create_quiz))
}
