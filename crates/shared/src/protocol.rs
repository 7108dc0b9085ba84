use serde::{Deserialize, Serialize};

use crate::{
    domain::{CourseId, RegistrationDecision, Role, UserId},
    error::ApiError,
};

pub const SUCCESS_CODE: u16 = 200;

/// Response envelope shared by every course endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestResult<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> RestResult<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn failure(error: ApiError) -> Self {
        Self {
            code: error.code.http_status(),
            message: error.message.clone(),
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE && self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub role: Role,
}

/// Body of a student's request to join a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub course_id: CourseId,
}

/// Body of a tutor's approve or reject call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationApprovalRequest {
    pub decision: RegistrationDecision,
}
