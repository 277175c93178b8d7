//! Registration, login, and the authenticated-user endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use common::{ApiResponse, UserId};
use messaging::MessageBus;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthUser, hash_password, verify_password};
use crate::domain::{User, UserSummary};
use crate::error::AppError;
use crate::store::{TransactionStore, UserStore};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: UserSummary,
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let username_len = req.username.chars().count();
    if !(3..=50).contains(&username_len) {
        return Err(AppError::Validation(
            "username must be between 3 and 50 characters".to_string(),
        ));
    }
    if !req.email.contains('@') || req.email.trim().is_empty() {
        return Err(AppError::Validation("email is not valid".to_string()));
    }
    if req.password.len() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/auth/register — create a user account.
#[tracing::instrument(skip(state, req), fields(username = %req.username))]
pub async fn register<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserSummary>>), AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    validate_registration(&req)?;

    let now = Utc::now();
    let user = User {
        id: UserId::new(),
        username: req.username,
        email: req.email,
        password_hash: hash_password(&req.password)?,
        created_at: now,
        updated_at: now,
    };
    state.users.create(&user).await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(UserSummary::from(&user))),
    ))
}

/// POST /api/auth/login — exchange credentials for a bearer token.
#[tracing::instrument(skip(state, req), fields(username = %req.username))]
pub async fn login<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    // absent user and wrong password produce the same response
    let invalid = || AppError::Unauthorized("Invalid username or password".to_string());

    let user = state
        .users
        .find_by_username(&req.username)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(invalid());
    }

    let access_token = state.jwt.sign(&user)?;
    Ok(Json(ApiResponse::ok(LoginResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.jwt.expires_in_secs(),
        user: UserSummary::from(&user),
    })))
}

/// GET /api/auth/me — summary of the authenticated user.
#[tracing::instrument(skip(state, claims))]
pub async fn me<S, U, B>(
    State(state): State<Arc<AppState<S, U, B>>>,
    AuthUser(claims): AuthUser,
) -> Result<Json<ApiResponse<UserSummary>>, AppError>
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(ApiResponse::ok(UserSummary::from(&user))))
}
