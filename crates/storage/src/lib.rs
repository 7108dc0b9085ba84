use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    CourseFields, CourseId, CourseRegistration, RegistrationId, RegistrationStatus,
    RegistrationSummary, Role, StudentRegistration, UserId,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct StoredCourse {
    pub course_id: CourseId,
    pub tutor_id: UserId,
    pub name: String,
    pub description: String,
    pub subject: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredCourse {
    pub fn into_registration(self) -> CourseRegistration {
        CourseRegistration {
            course_id: self.course_id,
            registration_id: None,
            course_name: self.name,
            description: self.description,
            subject: self.subject,
        }
    }
}

/// A registration row together with the tutor who owns its course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRegistration {
    pub registration_id: RegistrationId,
    pub course_id: CourseId,
    pub tutor_id: UserId,
    pub student_id: UserId,
    pub status: RegistrationStatus,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        create_parent_dir(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns the user named `username`, creating it with `role` on first use.
    /// An existing user keeps the role it was created with.
    pub async fn create_user(&self, username: &str, role: Role) -> Result<StoredUser> {
        let row = sqlx::query(
            "INSERT INTO users (username, role, created_at) VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id, username, role",
        )
        .bind(username)
        .bind(role.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to upsert user '{username}'"))?;
        user_from_row(&row)
    }

    pub async fn user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query("SELECT id, username, role FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn list_courses_for_tutor(&self, tutor_id: UserId) -> Result<Vec<StoredCourse>> {
        let rows = sqlx::query(
            "SELECT id, tutor_id, name, description, subject, created_at, updated_at
             FROM courses WHERE tutor_id = ? ORDER BY id ASC",
        )
        .bind(tutor_id.0)
        .fetch_all(&self.pool)
        .await
        .context("failed to list tutor courses")?;
        rows.iter().map(course_from_row).collect()
    }

    pub async fn course(&self, course_id: CourseId) -> Result<Option<StoredCourse>> {
        let row = sqlx::query(
            "SELECT id, tutor_id, name, description, subject, created_at, updated_at
             FROM courses WHERE id = ?",
        )
        .bind(course_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(course_from_row).transpose()
    }

    pub async fn create_course(&self, tutor_id: UserId, fields: &CourseFields) -> Result<CourseId> {
        let now = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO courses (tutor_id, name, description, subject, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(tutor_id.0)
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(&fields.subject)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert course")?;
        Ok(CourseId(rec.get::<i64, _>(0)))
    }

    /// Returns `false` when no course has `course_id`.
    pub async fn update_course(&self, course_id: CourseId, fields: &CourseFields) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE courses SET name = ?, description = ?, subject = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(&fields.subject)
        .bind(Utc::now())
        .bind(course_id.0)
        .execute(&self.pool)
        .await
        .context("failed to update course")?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` when no course has `course_id`.
    pub async fn delete_course(&self, course_id: CourseId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM courses WHERE id = ?")
            .bind(course_id.0)
            .execute(&self.pool)
            .await
            .context("failed to delete course")?;
        Ok(result.rows_affected() > 0)
    }

    /// Files a pending registration. Returns `None` when the student already
    /// has one for this course.
    pub async fn request_registration(
        &self,
        course_id: CourseId,
        student_id: UserId,
    ) -> Result<Option<RegistrationId>> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO registrations (course_id, student_id, status, created_at, updated_at)
             VALUES (?, ?, 'pending', ?, ?)
             ON CONFLICT(course_id, student_id) DO NOTHING
             RETURNING id",
        )
        .bind(course_id.0)
        .bind(student_id.0)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert registration")?;
        Ok(row.map(|row| RegistrationId(row.get::<i64, _>(0))))
    }

    pub async fn registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<StoredRegistration>> {
        let row = sqlx::query(
            "SELECT r.id, r.course_id, c.tutor_id, r.student_id, r.status
             FROM registrations r JOIN courses c ON c.id = r.course_id
             WHERE r.id = ?",
        )
        .bind(registration_id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(StoredRegistration {
            registration_id: RegistrationId(row.try_get("id")?),
            course_id: CourseId(row.try_get("course_id")?),
            tutor_id: UserId(row.try_get("tutor_id")?),
            student_id: UserId(row.try_get("student_id")?),
            status: status_from_row(&row)?,
        }))
    }

    /// Registrations for every course `tutor_id` teaches, oldest first.
    pub async fn list_registrations_for_tutor(
        &self,
        tutor_id: UserId,
    ) -> Result<Vec<RegistrationSummary>> {
        let rows = sqlx::query(
            "SELECT r.id, r.course_id, c.name AS course_name, r.student_id,
                    u.username AS student_name, r.status
             FROM registrations r
             JOIN courses c ON c.id = r.course_id
             JOIN users u ON u.id = r.student_id
             WHERE c.tutor_id = ?
             ORDER BY r.id ASC",
        )
        .bind(tutor_id.0)
        .fetch_all(&self.pool)
        .await
        .context("failed to list tutor registrations")?;
        rows.iter()
            .map(|row| -> Result<RegistrationSummary> {
                Ok(RegistrationSummary {
                    registration_id: RegistrationId(row.try_get("id")?),
                    course_id: CourseId(row.try_get("course_id")?),
                    course_name: row.try_get("course_name")?,
                    student_id: UserId(row.try_get("student_id")?),
                    student_name: row.try_get("student_name")?,
                    status: status_from_row(row)?,
                })
            })
            .collect()
    }

    pub async fn list_registrations_for_student(
        &self,
        student_id: UserId,
    ) -> Result<Vec<StudentRegistration>> {
        let rows = sqlx::query(
            "SELECT r.id, r.course_id, c.name, c.description, c.subject, r.status
             FROM registrations r JOIN courses c ON c.id = r.course_id
             WHERE r.student_id = ?
             ORDER BY r.id ASC",
        )
        .bind(student_id.0)
        .fetch_all(&self.pool)
        .await
        .context("failed to list student registrations")?;
        rows.iter()
            .map(|row| -> Result<StudentRegistration> {
                Ok(StudentRegistration {
                    course: CourseRegistration {
                        course_id: CourseId(row.try_get("course_id")?),
                        registration_id: Some(RegistrationId(row.try_get("id")?)),
                        course_name: row.try_get("name")?,
                        description: row.try_get("description")?,
                        subject: row.try_get("subject")?,
                    },
                    status: status_from_row(row)?,
                })
            })
            .collect()
    }

    /// Returns `false` when no registration has `registration_id`.
    pub async fn set_registration_status(
        &self,
        registration_id: RegistrationId,
        status: RegistrationStatus,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE registrations SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(registration_id.0)
                .execute(&self.pool)
                .await
                .context("failed to update registration status")?;
        Ok(result.rows_affected() > 0)
    }
}

fn status_from_row(row: &SqliteRow) -> Result<RegistrationStatus> {
    let raw: String = row.try_get("status")?;
    RegistrationStatus::parse(&raw).ok_or_else(|| anyhow!("unknown registration status '{raw}'"))
}

fn user_from_row(row: &SqliteRow) -> Result<StoredUser> {
    let raw_role: String = row.try_get("role")?;
    let role = Role::parse(&raw_role).ok_or_else(|| anyhow!("unknown role '{raw_role}'"))?;
    Ok(StoredUser {
        user_id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        role,
    })
}

fn course_from_row(row: &SqliteRow) -> Result<StoredCourse> {
    Ok(StoredCourse {
        course_id: CourseId(row.try_get("id")?),
        tutor_id: UserId(row.try_get("tutor_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        subject: row.try_get("subject")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Turns a bare path or `sqlite:` URL into a `sqlite://` URL and creates the
/// database file's parent directory. A blank input yields `fallback`.
pub fn prepare_sqlite_url(raw: &str, fallback: &str) -> Result<String> {
    let database_url = normalize_sqlite_url(raw, fallback);
    create_parent_dir(&database_url)?;
    Ok(database_url)
}

fn normalize_sqlite_url(raw: &str, fallback: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return fallback.to_string();
    }
    if raw.starts_with("sqlite::memory:") || raw.contains("://") {
        return raw.to_string();
    }
    let path = raw.strip_prefix("sqlite:").unwrap_or(raw);
    format!("sqlite://{}", path.replace('\\', "/"))
}

fn create_parent_dir(database_url: &str) -> Result<()> {
    let Some(parent) = sqlite_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };
    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "cannot create directory '{}' for '{database_url}'",
            parent.display()
        )
    })
}

/// Filesystem path behind a `sqlite:` URL; `None` for in-memory databases.
fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url.strip_prefix("sqlite:")?;
    if rest.starts_with(":memory:") {
        return None;
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
