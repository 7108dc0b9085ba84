use shared::{
    domain::{
        CourseFields, CourseId, CourseRegistration, RegistrationId, RegistrationStatus,
        RegistrationSummary, Role, StudentRegistration, UserId,
    },
    error::{ApiError, ErrorCode},
    protocol::{LoginRequest, LoginResponse, RegistrationApprovalRequest, RegistrationRequest},
};
use storage::{Storage, StoredCourse, StoredUser};
use tracing::info;

const MAX_USERNAME_BYTES: usize = 64;
const MAX_COURSE_NAME_BYTES: usize = 120;
const MAX_SUBJECT_BYTES: usize = 80;
const MAX_DESCRIPTION_BYTES: usize = 2000;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub fn tutor_courses_route() -> &'static str {
    "/courses/tutor"
}

pub fn courses_route() -> &'static str {
    "/courses"
}

pub fn course_route() -> &'static str {
    "/courses/:course_id"
}

pub fn registrations_route() -> &'static str {
    "/course/registrations"
}

pub fn student_registrations_route() -> &'static str {
    "/course/registrations/student"
}

pub fn registration_route() -> &'static str {
    "/course/registrations/:registration_id"
}

pub async fn login(ctx: &ApiContext, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "username is required"));
    }
    if username.len() > MAX_USERNAME_BYTES {
        return Err(ApiError::new(ErrorCode::Validation, "username is too long"));
    }
    let user = ctx
        .storage
        .create_user(username, request.role)
        .await
        .map_err(internal)?;
    info!(user_id = user.user_id.0, role = user.role.as_str(), "auth: login");
    Ok(LoginResponse {
        user_id: user.user_id,
        role: user.role,
    })
}

pub async fn list_tutor_courses(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<CourseRegistration>, ApiError> {
    ensure_role(ctx, user_id, Role::Tutor, "only tutors can manage courses").await?;
    let courses = ctx
        .storage
        .list_courses_for_tutor(user_id)
        .await
        .map_err(internal)?;
    Ok(courses
        .into_iter()
        .map(StoredCourse::into_registration)
        .collect())
}

pub async fn create_course(
    ctx: &ApiContext,
    user_id: UserId,
    fields: CourseFields,
) -> Result<CourseRegistration, ApiError> {
    ensure_role(ctx, user_id, Role::Tutor, "only tutors can manage courses").await?;
    let fields = validate_fields(fields)?;
    let course_id = ctx
        .storage
        .create_course(user_id, &fields)
        .await
        .map_err(internal)?;
    info!(
        tutor_id = user_id.0,
        course_id = course_id.0,
        "courses: created"
    );
    Ok(CourseRegistration {
        course_id,
        registration_id: None,
        course_name: fields.name,
        description: fields.description,
        subject: fields.subject,
    })
}

pub async fn update_course(
    ctx: &ApiContext,
    user_id: UserId,
    course_id: CourseId,
    fields: CourseFields,
) -> Result<CourseRegistration, ApiError> {
    ensure_role(ctx, user_id, Role::Tutor, "only tutors can manage courses").await?;
    ensure_owned_course(ctx, user_id, course_id).await?;
    let fields = validate_fields(fields)?;
    let updated = ctx
        .storage
        .update_course(course_id, &fields)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "course not found"));
    }
    info!(
        tutor_id = user_id.0,
        course_id = course_id.0,
        "courses: updated"
    );
    Ok(CourseRegistration {
        course_id,
        registration_id: None,
        course_name: fields.name,
        description: fields.description,
        subject: fields.subject,
    })
}

pub async fn delete_course(
    ctx: &ApiContext,
    user_id: UserId,
    course_id: CourseId,
) -> Result<(), ApiError> {
    ensure_role(ctx, user_id, Role::Tutor, "only tutors can manage courses").await?;
    ensure_owned_course(ctx, user_id, course_id).await?;
    let deleted = ctx
        .storage
        .delete_course(course_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::new(ErrorCode::NotFound, "course not found"));
    }
    info!(
        tutor_id = user_id.0,
        course_id = course_id.0,
        "courses: deleted"
    );
    Ok(())
}

pub async fn list_registrations(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<RegistrationSummary>, ApiError> {
    ensure_role(
        ctx,
        user_id,
        Role::Tutor,
        "only tutors can view registration requests",
    )
    .await?;
    ctx.storage
        .list_registrations_for_tutor(user_id)
        .await
        .map_err(internal)
}

/// Approves or rejects a pending registration on one of the tutor's courses.
pub async fn decide_registration(
    ctx: &ApiContext,
    user_id: UserId,
    registration_id: RegistrationId,
    request: &RegistrationApprovalRequest,
) -> Result<RegistrationStatus, ApiError> {
    ensure_role(
        ctx,
        user_id,
        Role::Tutor,
        "only tutors can update registration requests",
    )
    .await?;
    let registration = ctx
        .storage
        .registration(registration_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "registration not found"))?;
    if registration.tutor_id != user_id {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "registration belongs to another tutor's course",
        ));
    }
    if registration.status != RegistrationStatus::Pending {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!(
                "registration was already {}",
                registration.status.as_str()
            ),
        ));
    }

    let status = request.decision.status();
    let updated = ctx
        .storage
        .set_registration_status(registration_id, status)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "registration not found"));
    }
    info!(
        tutor_id = user_id.0,
        registration_id = registration_id.0,
        status = status.as_str(),
        "registrations: decided"
    );
    Ok(status)
}

pub async fn list_student_registrations(
    ctx: &ApiContext,
    user_id: UserId,
) -> Result<Vec<StudentRegistration>, ApiError> {
    ensure_role(
        ctx,
        user_id,
        Role::Student,
        "only students can view their registrations",
    )
    .await?;
    ctx.storage
        .list_registrations_for_student(user_id)
        .await
        .map_err(internal)
}

/// Files a pending registration for the calling student.
pub async fn request_registration(
    ctx: &ApiContext,
    user_id: UserId,
    request: &RegistrationRequest,
) -> Result<StudentRegistration, ApiError> {
    ensure_role(
        ctx,
        user_id,
        Role::Student,
        "only students can register for courses",
    )
    .await?;
    let course = ctx
        .storage
        .course(request.course_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "course not found"))?;
    let registration_id = ctx
        .storage
        .request_registration(course.course_id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::Validation,
                "already registered for this course",
            )
        })?;
    info!(
        student_id = user_id.0,
        course_id = course.course_id.0,
        registration_id = registration_id.0,
        "registrations: requested"
    );

    let mut registration = course.into_registration();
    registration.registration_id = Some(registration_id);
    Ok(StudentRegistration {
        course: registration,
        status: RegistrationStatus::Pending,
    })
}

/// Trims the fields and enforces the length limits.
pub fn validate_fields(fields: CourseFields) -> Result<CourseFields, ApiError> {
    let name = fields.name.trim().to_string();
    let subject = fields.subject.trim().to_string();
    let description = fields.description.trim().to_string();

    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "course name is required"));
    }
    if subject.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "subject is required"));
    }
    if name.len() > MAX_COURSE_NAME_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("course name exceeds {MAX_COURSE_NAME_BYTES} bytes"),
        ));
    }
    if subject.len() > MAX_SUBJECT_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("subject exceeds {MAX_SUBJECT_BYTES} bytes"),
        ));
    }
    if description.len() > MAX_DESCRIPTION_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("description exceeds {MAX_DESCRIPTION_BYTES} bytes"),
        ));
    }

    Ok(CourseFields {
        name,
        description,
        subject,
    })
}

/// Unknown users are `Unauthorized`; users with another role are `Forbidden`.
async fn ensure_role(
    ctx: &ApiContext,
    user_id: UserId,
    role: Role,
    forbidden_message: &str,
) -> Result<StoredUser, ApiError> {
    let user = ctx
        .storage
        .user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "user is not authenticated"))?;
    if user.role != role {
        return Err(ApiError::new(ErrorCode::Forbidden, forbidden_message));
    }
    Ok(user)
}

async fn ensure_owned_course(
    ctx: &ApiContext,
    user_id: UserId,
    course_id: CourseId,
) -> Result<StoredCourse, ApiError> {
    let course = ctx
        .storage
        .course(course_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "course not found"))?;
    if course.tutor_id != user_id {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "course belongs to another tutor",
        ));
    }
    Ok(course)
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
