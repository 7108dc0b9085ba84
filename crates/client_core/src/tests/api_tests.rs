use super::*;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use shared::error::{ApiError, ErrorCode};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::Mutex};

const TUTOR_ID: i64 = 42;
const FORBIDDEN_USER_ID: i64 = 403;
const MISSING_COURSE_ID: i64 = 999;

#[derive(Clone, Default)]
struct ServerState {
    seen_user_ids: Arc<Mutex<Vec<i64>>>,
    created: Arc<Mutex<Vec<CourseFields>>>,
    updated: Arc<Mutex<Vec<(i64, CourseFields)>>>,
    deleted: Arc<Mutex<Vec<i64>>>,
    decisions: Arc<Mutex<Vec<(i64, RegistrationDecision)>>>,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: i64,
}

type Reply<T> = (StatusCode, Json<RestResult<T>>);

fn failure<T>(code: ErrorCode, message: &str) -> Reply<T> {
    let status = StatusCode::from_u16(code.http_status()).expect("status");
    (status, Json(RestResult::failure(ApiError::new(code, message))))
}

async fn handle_login(Json(req): Json<LoginRequest>) -> Reply<LoginResponse> {
    (
        StatusCode::OK,
        Json(RestResult::success(
            LoginResponse {
                user_id: UserId(TUTOR_ID),
                role: req.role,
            },
            "Login successful.",
        )),
    )
}

async fn handle_list(
    State(state): State<ServerState>,
    Query(q): Query<UserQuery>,
) -> Reply<Vec<CourseRegistration>> {
    state.seen_user_ids.lock().await.push(q.user_id);
    if q.user_id == FORBIDDEN_USER_ID {
        return failure(ErrorCode::Forbidden, "Only tutors can view courses.");
    }
    let courses = (1..=3)
        .map(|id| CourseRegistration {
            course_id: CourseId(id),
            registration_id: None,
            course_name: format!("Course {id}"),
            description: String::new(),
            subject: "math".into(),
        })
        .collect();
    (
        StatusCode::OK,
        Json(RestResult::success(courses, "Courses retrieved successfully.")),
    )
}

async fn handle_create(
    State(state): State<ServerState>,
    Query(q): Query<UserQuery>,
    Json(fields): Json<CourseFields>,
) -> Reply<CourseRegistration> {
    state.seen_user_ids.lock().await.push(q.user_id);
    state.created.lock().await.push(fields.clone());
    (
        StatusCode::OK,
        Json(RestResult::success(
            CourseRegistration {
                course_id: CourseId(10),
                registration_id: None,
                course_name: fields.name,
                description: fields.description,
                subject: fields.subject,
            },
            "Course created successfully.",
        )),
    )
}

async fn handle_update(
    State(state): State<ServerState>,
    Path(course_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(fields): Json<CourseFields>,
) -> Reply<()> {
    state.seen_user_ids.lock().await.push(q.user_id);
    state.updated.lock().await.push((course_id, fields));
    (StatusCode::OK, Json(RestResult::empty("Course updated.")))
}

async fn handle_delete(
    State(state): State<ServerState>,
    Path(course_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Reply<()> {
    state.seen_user_ids.lock().await.push(q.user_id);
    if course_id == MISSING_COURSE_ID {
        return failure(ErrorCode::NotFound, "course not found");
    }
    state.deleted.lock().await.push(course_id);
    (StatusCode::OK, Json(RestResult::empty("Course deleted.")))
}

async fn handle_list_registrations(
    State(state): State<ServerState>,
    Query(q): Query<UserQuery>,
) -> Reply<Vec<RegistrationSummary>> {
    state.seen_user_ids.lock().await.push(q.user_id);
    let registrations = vec![RegistrationSummary {
        registration_id: RegistrationId(5),
        course_id: CourseId(1),
        course_name: "Course 1".into(),
        student_id: UserId(77),
        student_name: "sam".into(),
        status: RegistrationStatus::Pending,
    }];
    (
        StatusCode::OK,
        Json(RestResult::success(
            registrations,
            "Registrations retrieved successfully.",
        )),
    )
}

async fn handle_decide(
    State(state): State<ServerState>,
    Path(registration_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<RegistrationApprovalRequest>,
) -> Reply<RegistrationStatus> {
    state.seen_user_ids.lock().await.push(q.user_id);
    state
        .decisions
        .lock()
        .await
        .push((registration_id, req.decision));
    (
        StatusCode::OK,
        Json(RestResult::success(
            req.decision.status(),
            "Registration request updated successfully.",
        )),
    )
}

async fn spawn_router(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn spawn_course_server() -> (String, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/login", post(handle_login))
        .route("/courses/tutor", get(handle_list))
        .route("/courses", post(handle_create))
        .route("/courses/:course_id", put(handle_update).delete(handle_delete))
        .route("/course/registrations", get(handle_list_registrations))
        .route("/course/registrations/:registration_id", put(handle_decide))
        .with_state(state.clone());
    (spawn_router(app).await, state)
}

#[tokio::test]
async fn login_binds_user_id_used_by_list() {
    let (base_url, state) = spawn_course_server().await;
    let api = HttpCourseApi::login(&base_url, "alice", Role::Tutor)
        .await
        .expect("login");
    assert_eq!(api.user_id(), UserId(TUTOR_ID));

    let courses = api.list_tutor_courses().await.expect("list");
    assert_eq!(courses.len(), 3);
    assert_eq!(courses[0].course_name, "Course 1");
    assert_eq!(*state.seen_user_ids.lock().await, vec![TUTOR_ID]);
}

#[tokio::test]
async fn base_url_path_prefix_is_kept() {
    let state = ServerState::default();
    let app = Router::new().nest(
        "/api",
        Router::new()
            .route("/courses/tutor", get(handle_list))
            .with_state(state),
    );
    let base_url = spawn_router(app).await;

    let api = HttpCourseApi::new(&format!("{base_url}/api"), UserId(TUTOR_ID)).expect("api");
    let courses = api.list_tutor_courses().await.expect("list");
    assert_eq!(courses.len(), 3);
}

#[tokio::test]
async fn mutations_send_fields_and_ids() {
    let (base_url, state) = spawn_course_server().await;
    let api = HttpCourseApi::new(&base_url, UserId(TUTOR_ID)).expect("api");

    let fields = CourseFields::new("Algebra", "intro", "math");
    api.create_course(&fields).await.expect("create");
    api.update_course(&fields, CourseId(7)).await.expect("update");
    api.delete_course(CourseId(8)).await.expect("delete");

    assert_eq!(*state.created.lock().await, vec![fields.clone()]);
    assert_eq!(*state.updated.lock().await, vec![(7, fields)]);
    assert_eq!(*state.deleted.lock().await, vec![8]);
    assert_eq!(*state.seen_user_ids.lock().await, vec![TUTOR_ID; 3]);
}

#[tokio::test]
async fn delete_sends_acting_user_id() {
    let (base_url, state) = spawn_course_server().await;
    let api = HttpCourseApi::new(&base_url, UserId(TUTOR_ID)).expect("api");

    api.delete_course(CourseId(3)).await.expect("delete");

    assert_eq!(*state.seen_user_ids.lock().await, vec![TUTOR_ID]);
    assert_eq!(*state.deleted.lock().await, vec![3]);
}

#[tokio::test]
async fn registrations_are_listed_and_decided_as_the_tutor() {
    let (base_url, state) = spawn_course_server().await;
    let api = HttpCourseApi::new(&base_url, UserId(TUTOR_ID)).expect("api");

    let registrations = api.list_registrations().await.expect("list");
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].student_name, "sam");

    let status = api
        .decide_registration(RegistrationId(5), RegistrationDecision::Rejected)
        .await
        .expect("decide");
    assert_eq!(status, RegistrationStatus::Rejected);
    assert_eq!(
        *state.decisions.lock().await,
        vec![(5, RegistrationDecision::Rejected)]
    );
    assert_eq!(*state.seen_user_ids.lock().await, vec![TUTOR_ID, TUTOR_ID]);
}

#[tokio::test]
async fn error_envelope_becomes_api_error_with_server_message() {
    let (base_url, _state) = spawn_course_server().await;
    let api = HttpCourseApi::new(&base_url, UserId(FORBIDDEN_USER_ID)).expect("api");

    let err = api.list_tutor_courses().await.expect_err("should fail");
    assert_eq!(err.to_string(), "Only tutors can view courses.");
    assert!(matches!(
        err,
        ClientError::Api {
            status: 403,
            code: Some(ErrorCode::Forbidden),
            ..
        }
    ));

    let err = api
        .delete_course(CourseId(MISSING_COURSE_ID))
        .await
        .expect_err("should fail");
    assert!(matches!(
        err,
        ClientError::Api {
            code: Some(ErrorCode::NotFound),
            ..
        }
    ));
}

#[tokio::test]
async fn non_json_error_body_maps_to_status_message() {
    let app = Router::new().route(
        "/courses/tutor",
        get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let base_url = spawn_router(app).await;
    let api = HttpCourseApi::new(&base_url, UserId(TUTOR_ID)).expect("api");

    let err = api.list_tutor_courses().await.expect_err("should fail");
    assert!(matches!(err, ClientError::Api { status: 502, code: None, .. }));
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn malformed_success_body_is_decode_error() {
    let app = Router::new().route("/courses/tutor", get(|| async { "not json" }));
    let base_url = spawn_router(app).await;
    let api = HttpCourseApi::new(&base_url, UserId(TUTOR_ID)).expect("api");

    let err = api.list_tutor_courses().await.expect_err("should fail");
    assert!(matches!(err, ClientError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let api = HttpCourseApi::new(&format!("http://{addr}"), UserId(TUTOR_ID)).expect("api");
    let err = api.list_tutor_courses().await.expect_err("should fail");
    assert!(matches!(err, ClientError::Transport(_)));
}

#[test]
fn invalid_base_url_is_rejected() {
    let err = HttpCourseApi::new("not a url", UserId(TUTOR_ID))
        .err()
        .expect("should fail");
    assert!(matches!(err, ClientError::InvalidBaseUrl { .. }));
}
