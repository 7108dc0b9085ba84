use super::*;
use axum::{
    body::{self, Body},
    http::Request,
};
use client_core::{ClientError, CourseApi, HttpCourseApi};
use shared::{
    domain::{RegistrationDecision, Role},
    error::ErrorCode,
};
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn test_app() -> (Router, Storage, i64) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let tutor = storage
        .create_user("alice", Role::Tutor)
        .await
        .expect("tutor");

    let app = build_router(
        Arc::new(AppState {
            api: ApiContext {
                storage: storage.clone(),
            },
        }),
        16 * 1024,
    );
    (app, storage, tutor.user_id.0)
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn json_request(method: &str, uri: String, value: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage, _tutor_id) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn login_returns_user_in_envelope() {
    let (app, _storage, _tutor_id) = test_app().await;
    let response = app
        .oneshot(json_request(
            "POST",
            "/login".into(),
            serde_json::json!({ "username": "route-tutor", "role": "tutor" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let envelope: RestResult<LoginResponse> = read_json(response).await;
    assert!(envelope.is_success());
    let login = envelope.data.expect("data");
    assert_eq!(login.role, Role::Tutor);
    assert!(login.user_id.0 > 0);
}

#[tokio::test]
async fn create_then_list_tutor_courses() {
    let (app, _storage, tutor_id) = test_app().await;

    let create = app
        .clone()
        .oneshot(json_request(
            "POST",
            format!("/courses?user_id={tutor_id}"),
            serde_json::json!({ "name": "Algebra", "description": "intro", "subject": "math" }),
        ))
        .await
        .expect("create response");
    assert_eq!(create.status(), StatusCode::OK);
    let created: RestResult<CourseRegistration> = read_json(create).await;
    let created = created.data.expect("created course");

    let list = app
        .oneshot(
            Request::get(format!("/courses/tutor?user_id={tutor_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("list response");
    assert_eq!(list.status(), StatusCode::OK);

    let raw: serde_json::Value = read_json(list).await;
    assert_eq!(raw["code"], 200);
    assert_eq!(raw["data"][0]["courseId"], created.course_id.0);
    assert_eq!(raw["data"][0]["courseName"], "Algebra");
}

#[tokio::test]
async fn update_and_delete_course_routes() {
    let (app, storage, tutor_id) = test_app().await;
    let course_id = storage
        .create_course(UserId(tutor_id), &CourseFields::new("Algebra", "", "math"))
        .await
        .expect("course");

    let update = app
        .clone()
        .oneshot(json_request(
            "PUT",
            format!("/courses/{}?user_id={tutor_id}", course_id.0),
            serde_json::json!({ "name": "Algebra II", "description": "", "subject": "math" }),
        ))
        .await
        .expect("update response");
    assert_eq!(update.status(), StatusCode::OK);
    let stored = storage
        .course(course_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(stored.name, "Algebra II");

    let delete = app
        .clone()
        .oneshot(
            Request::delete(format!("/courses/{}?user_id={tutor_id}", course_id.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("delete response");
    assert_eq!(delete.status(), StatusCode::OK);
    let envelope: RestResult<()> = read_json(delete).await;
    assert!(envelope.is_success());

    let missing = app
        .oneshot(
            Request::delete(format!("/courses/{}?user_id={tutor_id}", course_id.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("second delete response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn student_gets_forbidden_envelope() {
    let (app, storage, _tutor_id) = test_app().await;
    let student = storage
        .create_user("sam", Role::Student)
        .await
        .expect("student");

    let response = app
        .oneshot(
            Request::get(format!("/courses/tutor?user_id={}", student.user_id.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let envelope: RestResult<()> = read_json(response).await;
    assert_eq!(envelope.code, 403);
    let error = envelope.error.expect("error");
    assert_eq!(error.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn invalid_fields_are_bad_request() {
    let (app, _storage, tutor_id) = test_app().await;
    let response = app
        .oneshot(json_request(
            "POST",
            format!("/courses?user_id={tutor_id}"),
            serde_json::json!({ "name": "", "description": "", "subject": "math" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (app, _storage, tutor_id) = test_app().await;
    let response = app
        .oneshot(json_request(
            "POST",
            format!("/courses?user_id={tutor_id}"),
            serde_json::json!({
                "name": "Algebra",
                "description": "x".repeat(32 * 1024),
                "subject": "math"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn registration_routes_cover_request_review_and_decision() {
    let (app, storage, tutor_id) = test_app().await;
    let course_id = storage
        .create_course(UserId(tutor_id), &CourseFields::new("Algebra", "", "math"))
        .await
        .expect("course");
    let student = storage
        .create_user("sam", Role::Student)
        .await
        .expect("student");
    let student_id = student.user_id.0;

    let requested = app
        .clone()
        .oneshot(json_request(
            "POST",
            format!("/course/registrations?user_id={student_id}"),
            serde_json::json!({ "courseId": course_id.0 }),
        ))
        .await
        .expect("request response");
    assert_eq!(requested.status(), StatusCode::OK);
    let requested: RestResult<StudentRegistration> = read_json(requested).await;
    let registration_id = requested
        .data
        .expect("registration")
        .course
        .registration_id
        .expect("registration id");

    let listed = app
        .clone()
        .oneshot(
            Request::get(format!("/course/registrations?user_id={tutor_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("list response");
    assert_eq!(listed.status(), StatusCode::OK);
    let raw: serde_json::Value = read_json(listed).await;
    assert_eq!(raw["data"][0]["registrationId"], registration_id.0);
    assert_eq!(raw["data"][0]["studentName"], "sam");
    assert_eq!(raw["data"][0]["status"], "pending");

    let decided = app
        .clone()
        .oneshot(json_request(
            "PUT",
            format!("/course/registrations/{}?user_id={tutor_id}", registration_id.0),
            serde_json::json!({ "decision": "approved" }),
        ))
        .await
        .expect("decide response");
    assert_eq!(decided.status(), StatusCode::OK);

    let mine = app
        .clone()
        .oneshot(
            Request::get(format!("/course/registrations/student?user_id={student_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("student list response");
    assert_eq!(mine.status(), StatusCode::OK);
    let mine: RestResult<Vec<StudentRegistration>> = read_json(mine).await;
    let mine = mine.data.expect("registrations");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, RegistrationStatus::Approved);

    let tutor_view = app
        .oneshot(
            Request::get(format!("/course/registrations/student?user_id={tutor_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("tutor as student response");
    assert_eq!(tutor_view.status(), StatusCode::FORBIDDEN);
}

async fn serve_on_loopback(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn http_client_round_trips_through_real_router() {
    let (app, storage, _tutor_id) = test_app().await;
    let base_url = serve_on_loopback(app).await;

    let api = HttpCourseApi::login(&base_url, "loopback-tutor", Role::Tutor)
        .await
        .expect("login");
    api.create_course(&CourseFields::new("Algebra", "intro", "math"))
        .await
        .expect("create");
    let courses = api.list_tutor_courses().await.expect("list");
    assert_eq!(courses.len(), 1);
    let course_id = courses[0].course_id;

    api.update_course(&CourseFields::new("Algebra II", "intro", "math"), course_id)
        .await
        .expect("update");
    assert_eq!(
        api.list_tutor_courses().await.expect("list")[0].course_name,
        "Algebra II"
    );

    let student = storage
        .create_user("loopback-student", Role::Student)
        .await
        .expect("student");
    let registration_id = storage
        .request_registration(course_id, student.user_id)
        .await
        .expect("request")
        .expect("registration id");
    let registrations = api.list_registrations().await.expect("registrations");
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].student_name, "loopback-student");
    let status = api
        .decide_registration(registration_id, RegistrationDecision::Approved)
        .await
        .expect("decide");
    assert_eq!(status, RegistrationStatus::Approved);

    api.delete_course(course_id).await.expect("delete");
    assert!(api.list_tutor_courses().await.expect("list").is_empty());

    let err = api.delete_course(course_id).await.expect_err("missing course");
    assert!(matches!(
        err,
        ClientError::Api {
            status: 404,
            code: Some(ErrorCode::NotFound),
            ..
        }
    ));
}

#[tokio::test]
async fn http_client_sees_forbidden_for_student_identity() {
    let (app, _storage, _tutor_id) = test_app().await;
    let base_url = serve_on_loopback(app).await;

    let api = HttpCourseApi::login(&base_url, "loopback-student", Role::Student)
        .await
        .expect("login");
    let err = api.list_tutor_courses().await.expect_err("forbidden");
    assert!(matches!(
        err,
        ClientError::Api {
            status: 403,
            code: Some(ErrorCode::Forbidden),
            ..
        }
    ));
}
