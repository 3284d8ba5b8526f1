//! User management with initial and last admin protection

use bcrypt::{hash, DEFAULT_COST};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use shared::{fuzzy_pattern, validate_password, validate_phone_number, AuditAction};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::{AuditLog, AuditTrail};
use crate::services::auth::AuthUser;

const USER_COLUMNS: &str = "id, name, admin, phone_number, last_logged_in, created_at";

#[derive(Clone)]
pub struct UserService {
    db: PgPool,
    audit: AuditLog,
}

/// User as returned to clients; the password hash never leaves the service
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub name: String,
    pub admin: bool,
    pub phone_number: String,
    pub last_logged_in: DateTime<Local>,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserInput {
    pub admin_password: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 130))]
    pub password: String,
    pub phone_number: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyUserInput {
    pub id: i32,
    pub new_data: RegisterUserInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAdminInput {
    pub id: i32,
    pub admin_password: String,
    pub admin: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveUserInput {
    pub id: i32,
    pub admin_password: String,
}

impl UserService {
    pub fn new(db: PgPool, audit: AuditLog) -> Self {
        Self { db, audit }
    }

    /// Create the configured admin when no user exists yet
    pub async fn ensure_initial_admin(&self, name: &str, password: &str) -> AppResult<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await?;
        if count > 0 {
            return Ok(false);
        }
        if password.is_empty() {
            tracing::warn!("no users and no initial admin password configured");
            return Ok(false);
        }

        let hashed = hash_password(password)?;
        sqlx::query("INSERT INTO users (name, password, admin) VALUES ($1, $2, TRUE)")
            .bind(name)
            .bind(hashed)
            .execute(&self.db)
            .await?;
        tracing::info!("initial admin {} created", name);
        Ok(true)
    }

    pub async fn register(&self, input: RegisterUserInput, actor: &AuthUser) -> AppResult<User> {
        input.validate()?;
        check_credentials(&input)?;

        let hashed = hash_password(&input.password)?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, password, admin, phone_number)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&input.name)
        .bind(hashed)
        .bind(input.admin)
        .bind(&input.phone_number)
        .fetch_one(&self.db)
        .await
        .map_err(|e| duplicate_name(e, &input.name))?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Create, "user", &actor.name, user.id, &user);
        trail.flush(&self.audit).await;

        tracing::info!("user {} registered by {}", user.name, actor.name);
        Ok(user)
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user id {}", id)))
    }

    /// `params` is `id`, `name` or `phone-number`; `val == "all"` lists everyone
    pub async fn list(&self, params: &str, val: &str) -> AppResult<Vec<User>> {
        if val == "all" {
            let users = sqlx::query_as::<_, User>(&format!(
                "SELECT {} FROM users WHERE deleted_at IS NULL ORDER BY name",
                USER_COLUMNS
            ))
            .fetch_all(&self.db)
            .await?;
            return Ok(users);
        }

        match params {
            "id" => {
                let id = val
                    .parse::<i32>()
                    .map_err(|_| AppError::InvalidPayload(format!("{} is not a number", val)))?;
                Ok(vec![self.get_by_id(id).await?])
            }
            "name" => self.search("name", val).await,
            "phone-number" => self.search("phone_number", val).await,
            other => Err(AppError::InvalidPayload(format!("params {} undefined", other))),
        }
    }

    /// Exact match first, then the fuzzy pattern
    async fn search(&self, column: &str, val: &str) -> AppResult<Vec<User>> {
        let exact = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE {} = $1 AND deleted_at IS NULL ORDER BY name",
            USER_COLUMNS, column
        ))
        .bind(val)
        .fetch_all(&self.db)
        .await?;
        if !exact.is_empty() {
            return Ok(exact);
        }

        let fuzzy = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE {} ILIKE $1 ESCAPE '\\' \
             AND deleted_at IS NULL ORDER BY name",
            USER_COLUMNS, column
        ))
        .bind(fuzzy_pattern(val))
        .fetch_all(&self.db)
        .await?;
        Ok(fuzzy)
    }

    pub async fn modify(&self, input: ModifyUserInput, actor: &AuthUser) -> AppResult<User> {
        input.new_data.validate()?;
        check_credentials(&input.new_data)?;

        let before = self.get_by_id(input.id).await?;
        let mut tx = self.db.begin().await?;
        if before.admin && !input.new_data.admin {
            guard_admin_removal(&mut tx, before.id).await?;
        }

        let hashed = hash_password(&input.new_data.password)?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET name = $1, password = $2, admin = $3, phone_number = $4
            WHERE id = $5 AND deleted_at IS NULL
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&input.new_data.name)
        .bind(hashed)
        .bind(input.new_data.admin)
        .bind(&input.new_data.phone_number)
        .bind(input.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| duplicate_name(e, &input.new_data.name))?;
        tx.commit().await?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Modify, "user", &actor.name, before.id, &before);
        trail.flush(&self.audit).await;
        Ok(user)
    }

    pub async fn set_admin(&self, input: ChangeAdminInput, actor: &AuthUser) -> AppResult<User> {
        let before = self.get_by_id(input.id).await?;
        let mut tx = self.db.begin().await?;
        if before.admin && !input.admin {
            guard_admin_removal(&mut tx, before.id).await?;
        }

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET admin = $1 WHERE id = $2 AND deleted_at IS NULL RETURNING {}",
            USER_COLUMNS
        ))
        .bind(input.admin)
        .bind(input.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Modify, "user", &actor.name, before.id, &before);
        trail.flush(&self.audit).await;
        tracing::info!("user {} admin set to {} by {}", user.name, user.admin, actor.name);
        Ok(user)
    }

    pub async fn delete(&self, id: i32, actor: &AuthUser) -> AppResult<()> {
        let before = self.get_by_id(id).await?;
        let mut tx = self.db.begin().await?;
        if before.admin {
            guard_admin_removal(&mut tx, before.id).await?;
        }

        sqlx::query(
            "UPDATE users SET deleted_at = NOW(), deleted_by_user_id = $1 \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(actor.id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM verify_token WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut trail = AuditTrail::new();
        trail.record(AuditAction::Delete, "user", &actor.name, id, &before);
        trail.flush(&self.audit).await;
        tracing::info!("user {} deleted by {}", before.name, actor.name);
        Ok(())
    }
}

fn hash_password(password: &str) -> AppResult<String> {
    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

fn check_credentials(input: &RegisterUserInput) -> AppResult<()> {
    validate_password(&input.password).map_err(|m| AppError::validation("password", m))?;
    validate_phone_number(&input.phone_number)
        .map_err(|m| AppError::validation("phoneNumber", m))?;
    Ok(())
}

fn duplicate_name(e: sqlx::Error, name: &str) -> AppError {
    let err = AppError::from(e);
    if err.is_unique_violation() {
        AppError::DuplicateDocument(format!("user {}", name))
    } else {
        err
    }
}

/// Refuse to demote or delete the initial admin or the last remaining admin
async fn guard_admin_removal(conn: &mut PgConnection, user_id: i32) -> AppResult<()> {
    let initial = sqlx::query_scalar::<_, Option<i32>>(
        "SELECT MIN(id) FROM users WHERE admin = TRUE",
    )
    .fetch_one(&mut *conn)
    .await?;
    if initial == Some(user_id) {
        return Err(AppError::ProtectedUser(
            "cannot remove the initial admin".to_string(),
        ));
    }

    let admins = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE admin = TRUE AND deleted_at IS NULL",
    )
    .fetch_one(&mut *conn)
    .await?;
    if admins <= 1 {
        return Err(AppError::ProtectedUser(
            "at least one admin must remain".to_string(),
        ));
    }
    Ok(())
}
