use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    course_route, courses_route, registration_route, registrations_route,
    student_registrations_route, tutor_courses_route, ApiContext,
};
use shared::{
    domain::{
        CourseFields, CourseId, CourseRegistration, RegistrationId, RegistrationStatus,
        RegistrationSummary, StudentRegistration, UserId,
    },
    error::ApiError,
    protocol::{
        LoginRequest, LoginResponse, RegistrationApprovalRequest, RegistrationRequest, RestResult,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type ApiFailure = (StatusCode, Json<RestResult<()>>);
type ApiResult<T> = Result<Json<RestResult<T>>, ApiFailure>;

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to install ctrl-c handler");
    }
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route(tutor_courses_route(), get(http_list_tutor_courses))
        .route(courses_route(), post(http_create_course))
        .route(
            course_route(),
            put(http_update_course).delete(http_delete_course),
        )
        .route(
            registrations_route(),
            get(http_list_registrations).post(http_request_registration),
        )
        .route(
            student_registrations_route(),
            get(http_list_student_registrations),
        )
        .route(registration_route(), put(http_decide_registration))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|error| {
            error!(%error, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok("ok")
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let response = server_api::login(&state.api, &req)
        .await
        .map_err(failure)?;
    Ok(Json(RestResult::success(response, "Login successful.")))
}

async fn http_list_tutor_courses(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Vec<CourseRegistration>> {
    let courses = server_api::list_tutor_courses(&state.api, UserId(q.user_id))
        .await
        .map_err(failure)?;
    Ok(Json(RestResult::success(
        courses,
        "Courses retrieved successfully.",
    )))
}

async fn http_create_course(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(fields): Json<CourseFields>,
) -> ApiResult<CourseRegistration> {
    let course = server_api::create_course(&state.api, UserId(q.user_id), fields)
        .await
        .map_err(failure)?;
    Ok(Json(RestResult::success(course, "Course created successfully.")))
}

async fn http_update_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(fields): Json<CourseFields>,
) -> ApiResult<CourseRegistration> {
    let course =
        server_api::update_course(&state.api, UserId(q.user_id), CourseId(course_id), fields)
            .await
            .map_err(failure)?;
    Ok(Json(RestResult::success(course, "Course updated successfully.")))
}

async fn http_delete_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> ApiResult<()> {
    server_api::delete_course(&state.api, UserId(q.user_id), CourseId(course_id))
        .await
        .map_err(failure)?;
    Ok(Json(RestResult::empty("Course deleted successfully.")))
}

async fn http_list_registrations(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Vec<RegistrationSummary>> {
    let registrations = server_api::list_registrations(&state.api, UserId(q.user_id))
        .await
        .map_err(failure)?;
    Ok(Json(RestResult::success(
        registrations,
        "Registrations retrieved successfully.",
    )))
}

async fn http_request_registration(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<RegistrationRequest>,
) -> ApiResult<StudentRegistration> {
    let registration = server_api::request_registration(&state.api, UserId(q.user_id), &req)
        .await
        .map_err(failure)?;
    Ok(Json(RestResult::success(
        registration,
        "Registration request submitted.",
    )))
}

async fn http_list_student_registrations(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Vec<StudentRegistration>> {
    let registrations = server_api::list_student_registrations(&state.api, UserId(q.user_id))
        .await
        .map_err(failure)?;
    Ok(Json(RestResult::success(
        registrations,
        "Student registrations retrieved successfully.",
    )))
}

async fn http_decide_registration(
    State(state): State<Arc<AppState>>,
    Path(registration_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<RegistrationApprovalRequest>,
) -> ApiResult<RegistrationStatus> {
    let status = server_api::decide_registration(
        &state.api,
        UserId(q.user_id),
        RegistrationId(registration_id),
        &req,
    )
    .await
    .map_err(failure)?;
    Ok(Json(RestResult::success(
        status,
        "Registration request updated successfully.",
    )))
}

fn failure(err: ApiError) -> ApiFailure {
    let status = StatusCode::from_u16(err.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(message = %err.message, "request failed");
    }
    (status, Json(RestResult::failure(err)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
