use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::crypto::generate_token;
use crate::db::{
    LoginRequest, LoginResponse, RegisterRequest, Session, User, UserResponse, UserRole,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use super::validation::{validate_email, validate_password, validate_username};

/// Response for a successful registration
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub username: String,
    pub role: UserRole,
    pub message: String,
}

/// Authenticated caller, resolved from the bearer token on every request.
///
/// Handlers take this as an argument instead of reading any shared session
/// state, so routing by role happens per request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub role: UserRole,
    token: String,
}

impl AuthContext {
    /// Reject callers that are not logged in as `role`
    pub fn require(&self, role: UserRole) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "This action requires the {} role",
                role
            )))
        }
    }
}

/// Extract the token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

        let user = Session::user_for_token(&state.db, &token, Utc::now())
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

        let role = user
            .role()
            .ok_or_else(|| ApiError::forbidden("Account has an unknown role"))?;

        Ok(Self { user, role, token })
    }
}

/// Register a new user
///
/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let username = req.username.trim();
    let email = req.email.trim();

    let mut errors = ValidationErrorBuilder::new();
    errors.check("username", validate_username(username));
    errors.check("email", validate_email(email));
    errors.check("password", validate_password(&req.password, &req.confirm_password));
    errors.finish()?;

    if req.role == UserRole::Admin && !state.config.auth.allow_admin_registration {
        return Err(ApiError::forbidden("Admin registration is disabled"));
    }

    let registered = User::register(&state.db, username, &req.password, email, req.role).await?;
    if !registered {
        return Err(ApiError::conflict("Username or email already exists"));
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            username: username.to_string(),
            role: req.role,
            message: "Registration successful! You can now login.".to_string(),
        }),
    ))
}

/// Login endpoint
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = User::authenticate(&state.db, req.username.trim(), &req.password, req.role)
        .await?
        .ok_or_else(|| {
            tracing::info!(username = %req.username, role = %req.role, "Failed login attempt");
            ApiError::unauthorized("Invalid credentials")
        })?;

    let token = generate_token();
    let ttl = chrono::Duration::try_hours(state.config.auth.session_ttl_hours)
        .ok_or_else(|| ApiError::internal("Configured session lifetime is out of range"))?;
    let session = Session::create(&state.db, &user.id, &token, ttl).await?;

    tracing::info!(username = %user.username, role = %user.status, "User logged in");

    Ok(Json(LoginResponse {
        token,
        expires_at: session.expires_at,
        user: UserResponse::from(user),
    }))
}

/// Logout endpoint, revokes the caller's session
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<StatusCode, ApiError> {
    Session::revoke(&state.db, &ctx.token).await?;
    tracing::info!(username = %ctx.user.username, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Current user
///
/// GET /api/auth/me
pub async fn me(ctx: AuthContext) -> Json<UserResponse> {
    Json(UserResponse::from(ctx.user))
}
