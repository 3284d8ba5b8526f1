//! Authentication service: login, logout and per-request token validation
//!
//! A login stores a `verify_token` row `(uuid, user_id, expired_at)` and
//! signs a JWT carrying the uuid. A request is accepted only while that row
//! exists and it is the user's single active token.

use bcrypt::verify;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db: PgPool,
    jwt_secret: String,
    expiry_seconds: i64,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub authorized: bool,
    pub admin: bool,
    pub token_uuid: String,
    pub user_id: i32,
    pub exp: i64,
}

/// The acting user of a request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: i32,
    pub name: String,
    pub admin: bool,
    #[serde(skip)]
    pub token_uuid: Uuid,
}

impl AuthUser {
    pub fn require_admin(&self) -> AppResult<()> {
        if self.admin {
            Ok(())
        } else {
            Err(AppError::NotAdmin)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    id: i32,
    password: String,
    admin: bool,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i32,
    name: String,
    admin: bool,
}

impl AuthService {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            jwt_secret: config.jwt.secret.clone(),
            expiry_seconds: config.jwt.expiry_seconds,
        }
    }

    /// Check the password, store a token row and sign the JWT
    pub async fn login(&self, input: LoginInput) -> AppResult<LoginResponse> {
        let user = sqlx::query_as::<_, CredentialRow>(
            "SELECT id, password, admin FROM users WHERE name = $1 AND deleted_at IS NULL",
        )
        .bind(&input.name)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

        let valid = verify(&input.password, &user.password)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;
        if !valid {
            return Err(AppError::InvalidCredentials);
        }

        let token_uuid = Uuid::new_v4();
        let expired_at = Utc::now() + Duration::seconds(self.expiry_seconds);
        let token = self.sign(user.id, user.admin, token_uuid, expired_at.timestamp())?;

        sqlx::query(
            "INSERT INTO verify_token (token_uuid, user_id, expired_at) VALUES ($1, $2, $3)",
        )
            .bind(token_uuid)
            .bind(user.id)
            .bind(expired_at)
            .execute(&self.db)
            .await?;

        sqlx::query("UPDATE users SET last_logged_in = NOW() WHERE id = $1")
            .bind(user.id)
            .execute(&self.db)
            .await?;

        tracing::info!("user {} logged in", input.name);
        Ok(LoginResponse { token })
    }

    /// Remove every token of the caller
    pub async fn logout(&self, user: &AuthUser) -> AppResult<()> {
        self.delete_user_tokens(user.id).await?;
        tracing::info!("user {} logged out", user.name);
        Ok(())
    }

    fn sign(&self, user_id: i32, admin: bool, token_uuid: Uuid, exp: i64) -> AppResult<String> {
        let claims = Claims {
            authorized: true,
            admin,
            token_uuid: token_uuid.to_string(),
            user_id,
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature and expiry, no database access
    pub fn decode_claims(&self, token: &str) -> AppResult<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::TokenExpired,
            _ => AppError::Unauthorized(format!("Invalid token: {}", e)),
        })?;

        if !data.claims.authorized {
            return Err(AppError::Unauthorized("token not authorized".to_string()));
        }
        Ok(data.claims)
    }

    /// Validate a bearer token against the token table and load its user
    pub async fn authorize(&self, token: &str, need_admin: bool) -> AppResult<AuthUser> {
        sqlx::query("DELETE FROM verify_token WHERE expired_at < NOW()")
            .execute(&self.db)
            .await?;

        let claims = self.decode_claims(token)?;
        let token_uuid = Uuid::parse_str(&claims.token_uuid)
            .map_err(|_| AppError::Unauthorized("invalid token uuid".to_string()))?;

        let active = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM verify_token WHERE user_id = $1 AND expired_at >= NOW()",
        )
        .bind(claims.user_id)
        .fetch_one(&self.db)
        .await?;
        if active > 1 {
            self.delete_user_tokens(claims.user_id).await?;
            return Err(AppError::LoggedInElsewhere);
        }

        let exists = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM verify_token
            WHERE token_uuid = $1 AND user_id = $2 AND expired_at >= NOW()
            "#,
        )
        .bind(token_uuid)
        .bind(claims.user_id)
        .fetch_one(&self.db)
        .await?;
        if exists == 0 {
            self.delete_user_tokens(claims.user_id).await?;
            return Err(AppError::TokenExpired);
        }

        let user = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, admin FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(claims.user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("user not found".to_string()))?;

        if need_admin && !user.admin {
            return Err(AppError::NotAdmin);
        }

        Ok(AuthUser {
            id: user.id,
            name: user.name,
            admin: user.admin,
            token_uuid,
        })
    }

    /// Re-check an admin's own password before a privileged user command
    pub async fn verify_admin_password(&self, admin: &AuthUser, password: &str) -> AppResult<()> {
        admin.require_admin()?;
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT password FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(admin.id)
        .fetch_one(&self.db)
        .await?;

        let valid = verify(password, &hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;
        if !valid {
            return Err(AppError::Unauthorized("admin password wrong".to_string()));
        }
        Ok(())
    }

    async fn delete_user_tokens(&self, user_id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM verify_token WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        tracing::debug!("tokens of user {} cleared", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn service(secret: &str, expiry_seconds: i64) -> AuthService {
        // connect_lazy never opens a connection, enough for the pure paths
        let db = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        AuthService {
            db,
            jwt_secret: secret.to_string(),
            expiry_seconds,
        }
    }

    #[tokio::test]
    async fn test_signed_claims_round_trip() {
        let auth = service("secret", 60);
        let uuid = Uuid::new_v4();
        let exp = (Utc::now() + Duration::seconds(60)).timestamp();
        let token = auth.sign(7, true, uuid, exp).unwrap();

        let claims = auth.decode_claims(&token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert!(claims.admin);
        assert!(claims.authorized);
        assert_eq!(claims.token_uuid, uuid.to_string());
    }

    #[tokio::test]
    async fn test_expired_token_is_reported_as_expired() {
        let auth = service("secret", 60);
        let exp = (Utc::now() - Duration::seconds(3600)).timestamp();
        let token = auth.sign(7, false, Uuid::new_v4(), exp).unwrap();
        assert!(matches!(auth.decode_claims(&token), Err(AppError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_foreign_signature_is_rejected() {
        let exp = (Utc::now() + Duration::seconds(60)).timestamp();
        let token = service("one", 60).sign(7, false, Uuid::new_v4(), exp).unwrap();
        assert!(matches!(
            service("two", 60).decode_claims(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_require_admin() {
        let mut user = AuthUser {
            id: 1,
            name: "kasir".to_string(),
            admin: false,
            token_uuid: Uuid::new_v4(),
        };
        assert!(matches!(user.require_admin(), Err(AppError::NotAdmin)));
        user.admin = true;
        assert!(user.require_admin().is_ok());
    }
}
