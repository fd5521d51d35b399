//! User and session models, plus the credential store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::{info, warn};

use super::query::format_timestamp;
use crate::crypto::{hash_password, hash_token, verify_password};
use crate::db::error::is_unique_violation;
use crate::db::StoreError;

/// Role a user registers and logs in as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Client,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Client => "Client",
            UserRole::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" => Ok(UserRole::Client),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub hashed_password: String,
    pub client_email: String,
    pub status: String,
    pub created_at: String,
}

impl User {
    pub fn role(&self) -> Option<UserRole> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub client_email: String,
    pub status: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            client_email: user.client_email,
            status: user.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: UserRole,
}

impl User {
    /// Register a new user.
    ///
    /// Returns `Ok(false)` if the username or email is already taken,
    /// including when a concurrent registration wins the race to insert.
    pub async fn register(
        db: &SqlitePool,
        username: &str,
        password: &str,
        email: &str,
        role: UserRole,
    ) -> Result<bool, StoreError> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM users WHERE username = ? OR client_email = ?")
                .bind(username)
                .bind(email)
                .fetch_optional(db)
                .await?;

        if existing.is_some() {
            warn!(username = %username, "Registration rejected: username or email already exists");
            return Ok(false);
        }

        let hashed_password = hash_password(password).map_err(|e| {
            StoreError::validation("password", format!("Failed to hash password: {}", e))
        })?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, hashed_password, client_email, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(username)
        .bind(&hashed_password)
        .bind(email)
        .bind(role.as_str())
        .bind(&now)
        .execute(db)
        .await;

        match result {
            Ok(_) => {
                info!(username = %username, role = %role, "Registered user");
                Ok(true)
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(username = %username, "Registration lost a uniqueness race");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by username and role and check the password.
    ///
    /// The role is part of the key: the right credentials under the other
    /// role yield `None`.
    pub async fn authenticate(
        db: &SqlitePool,
        username: &str,
        password: &str,
        role: UserRole,
    ) -> Result<Option<User>, StoreError> {
        let user: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE username = ? AND status = ?")
                .bind(username)
                .bind(role.as_str())
                .fetch_optional(db)
                .await?;

        Ok(user.filter(|u| verify_password(password, &u.hashed_password)))
    }
}

impl Session {
    /// Store a session for `user_id` keyed by the hash of `token`
    pub async fn create(
        db: &SqlitePool,
        user_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| StoreError::validation("session_ttl", "Session lifetime out of range"))?;

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            token_hash: hash_token(token),
            expires_at: format_timestamp(expires_at),
            created_at: format_timestamp(now),
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.token_hash)
        .bind(&session.expires_at)
        .bind(&session.created_at)
        .execute(db)
        .await?;

        Ok(session)
    }

    /// Resolve a bearer token to its user if the session has not expired
    pub async fn user_for_token(
        db: &SqlitePool,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as(
            r#"
            SELECT u.* FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = ? AND s.expires_at > ?
            "#,
        )
        .bind(hash_token(token))
        .bind(format_timestamp(now))
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn revoke(db: &SqlitePool, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(hash_token(token))
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn purge_expired(db: &SqlitePool, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(format_timestamp(now))
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_token;
    use crate::db::test_pool;

    async fn user_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("client".parse::<UserRole>().unwrap(), UserRole::Client);
        assert_eq!("Admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let pool = test_pool().await;
        assert!(User::register(&pool, "alice", "s3cret!", "alice@example.com", UserRole::Client)
            .await
            .unwrap());

        let user = User::authenticate(&pool, "alice", "s3cret!", UserRole::Client)
            .await
            .unwrap()
            .expect("user should authenticate");
        assert_eq!(user.client_email, "alice@example.com");
        assert_eq!(user.role(), Some(UserRole::Client));
        assert_ne!(user.hashed_password, "s3cret!");
    }

    #[tokio::test]
    async fn test_register_duplicate_email_leaves_one_row() {
        let pool = test_pool().await;
        assert!(User::register(&pool, "alice", "pw", "shared@example.com", UserRole::Client)
            .await
            .unwrap());
        assert!(!User::register(&pool, "bob", "pw", "shared@example.com", UserRole::Admin)
            .await
            .unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE client_email = ?")
            .bind("shared@example.com")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_register_duplicate_username() {
        let pool = test_pool().await;
        User::register(&pool, "alice", "pw", "a@example.com", UserRole::Client)
            .await
            .unwrap();
        assert!(!User::register(&pool, "alice", "pw", "other@example.com", UserRole::Client)
            .await
            .unwrap());
        assert_eq!(user_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_authenticate_wrong_role_returns_none() {
        let pool = test_pool().await;
        User::register(&pool, "carol", "pw", "carol@example.com", UserRole::Client)
            .await
            .unwrap();

        let user = User::authenticate(&pool, "carol", "pw", UserRole::Admin)
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_authenticate_wrong_password_returns_none() {
        let pool = test_pool().await;
        User::register(&pool, "dave", "pw", "dave@example.com", UserRole::Admin)
            .await
            .unwrap();

        assert!(User::authenticate(&pool, "dave", "nope", UserRole::Admin)
            .await
            .unwrap()
            .is_none());
        assert!(User::authenticate(&pool, "nobody", "pw", UserRole::Admin)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let pool = test_pool().await;
        User::register(&pool, "erin", "pw", "erin@example.com", UserRole::Admin)
            .await
            .unwrap();
        let user = User::authenticate(&pool, "erin", "pw", UserRole::Admin)
            .await
            .unwrap()
            .unwrap();

        let token = generate_token();
        let session = Session::create(&pool, &user.id, &token, Duration::hours(1))
            .await
            .unwrap();
        assert_ne!(session.token_hash, token);

        let found = Session::user_for_token(&pool, &token, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);

        // Past the expiry the token no longer resolves
        let later = Utc::now() + Duration::hours(2);
        assert!(Session::user_for_token(&pool, &token, later)
            .await
            .unwrap()
            .is_none());
        assert_eq!(Session::purge_expired(&pool, later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revoke_session() {
        let pool = test_pool().await;
        User::register(&pool, "frank", "pw", "frank@example.com", UserRole::Client)
            .await
            .unwrap();
        let user = User::authenticate(&pool, "frank", "pw", UserRole::Client)
            .await
            .unwrap()
            .unwrap();

        let token = generate_token();
        Session::create(&pool, &user.id, &token, Duration::hours(1))
            .await
            .unwrap();

        assert!(Session::revoke(&pool, &token).await.unwrap());
        assert!(!Session::revoke(&pool, &token).await.unwrap());
        assert!(Session::user_for_token(&pool, &token, Utc::now())
            .await
            .unwrap()
            .is_none());
    }
}
