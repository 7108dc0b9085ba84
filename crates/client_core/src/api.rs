use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{
        CourseFields, CourseId, CourseRegistration, RegistrationDecision, RegistrationId,
        RegistrationStatus, RegistrationSummary, Role, UserId,
    },
    protocol::{LoginRequest, LoginResponse, RegistrationApprovalRequest, RestResult},
};
use tracing::debug;
use url::Url;

use crate::error::ClientError;

/// Remote course operations the list screen depends on.
#[async_trait]
pub trait CourseApi: Send + Sync {
    async fn list_tutor_courses(&self) -> Result<Vec<CourseRegistration>, ClientError>;
    async fn create_course(&self, fields: &CourseFields) -> Result<(), ClientError>;
    async fn update_course(
        &self,
        fields: &CourseFields,
        course_id: CourseId,
    ) -> Result<(), ClientError>;
    async fn delete_course(&self, course_id: CourseId) -> Result<(), ClientError>;
}

/// [`CourseApi`] over the course REST endpoints, acting as one tutor.
pub struct HttpCourseApi {
    http: Client,
    base_url: Url,
    user_id: UserId,
}

impl HttpCourseApi {
    pub fn new(base_url: &str, user_id: UserId) -> Result<Self, ClientError> {
        Self::with_client(Client::new(), base_url, user_id)
    }

    pub fn with_client(http: Client, base_url: &str, user_id: UserId) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            user_id,
        })
    }

    /// Logs in (creating the account on first use) and returns a client bound to that user.
    pub async fn login(base_url: &str, username: &str, role: Role) -> Result<Self, ClientError> {
        let http = Client::new();
        let base_url = parse_base_url(base_url)?;
        let response = http
            .post(join(&base_url, "login")?)
            .json(&LoginRequest {
                username: username.to_string(),
                role,
            })
            .send()
            .await?;
        let login: LoginResponse = read_envelope(response)
            .await?
            .data
            .ok_or_else(|| ClientError::Decode("login response carried no data".into()))?;
        debug!(user_id = login.user_id.0, "courses api: logged in");
        Ok(Self {
            http,
            base_url,
            user_id: login.user_id,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Registration requests filed against this tutor's courses.
    pub async fn list_registrations(&self) -> Result<Vec<RegistrationSummary>, ClientError> {
        let response = self
            .http
            .get(self.endpoint("course/registrations")?)
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await?;
        let envelope: RestResult<Vec<RegistrationSummary>> = read_envelope(response).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    pub async fn decide_registration(
        &self,
        registration_id: RegistrationId,
        decision: RegistrationDecision,
    ) -> Result<RegistrationStatus, ClientError> {
        let response = self
            .http
            .put(self.endpoint(&format!("course/registrations/{}", registration_id.0))?)
            .query(&[("user_id", self.user_id.0)])
            .json(&RegistrationApprovalRequest { decision })
            .send()
            .await?;
        read_envelope::<RegistrationStatus>(response)
            .await?
            .data
            .ok_or_else(|| ClientError::Decode("decision response carried no status".into()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        join(&self.base_url, path)
    }
}

#[async_trait]
impl CourseApi for HttpCourseApi {
    async fn list_tutor_courses(&self) -> Result<Vec<CourseRegistration>, ClientError> {
        let response = self
            .http
            .get(self.endpoint("courses/tutor")?)
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await?;
        let envelope: RestResult<Vec<CourseRegistration>> = read_envelope(response).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn create_course(&self, fields: &CourseFields) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint("courses")?)
            .query(&[("user_id", self.user_id.0)])
            .json(fields)
            .send()
            .await?;
        read_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn update_course(
        &self,
        fields: &CourseFields,
        course_id: CourseId,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.endpoint(&format!("courses/{}", course_id.0))?)
            .query(&[("user_id", self.user_id.0)])
            .json(fields)
            .send()
            .await?;
        read_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn delete_course(&self, course_id: CourseId) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("courses/{}", course_id.0))?)
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await?;
        read_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ClientError> {
    let trimmed = raw.trim();
    // Without a trailing slash `Url::join` would replace the last path segment.
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).map_err(|source| ClientError::InvalidBaseUrl {
        url: raw.to_string(),
        source,
    })
}

fn join(base_url: &Url, path: &str) -> Result<Url, ClientError> {
    base_url
        .join(path)
        .map_err(|source| ClientError::InvalidBaseUrl {
            url: format!("{base_url}{path}"),
            source,
        })
}

async fn read_envelope<T: DeserializeOwned>(
    response: Response,
) -> Result<RestResult<T>, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    let envelope: RestResult<T> = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(ClientError::Api {
                status: status.as_u16(),
                code: None,
                message: format!("server returned {status}"),
            });
        }
        Err(err) => return Err(ClientError::Decode(err.to_string())),
    };

    if !status.is_success() || !envelope.is_success() {
        let message = if envelope.message.trim().is_empty() {
            format!("server returned {status}")
        } else {
            envelope.message
        };
        return Err(ClientError::Api {
            status: envelope.code,
            code: envelope.error.map(|error| error.code),
            message,
        });
    }

    Ok(envelope)
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
