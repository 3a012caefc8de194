use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            MessageResponse, PublicUser, RegisterRequest, ResetPasswordRequest, SetActiveRequest,
            UpdateProfileRequest, VerifyResetCodeRequest,
        },
        extractors::{AdminUser, AuthUser},
        rate_limit::{rate_limit, RateLimitGuard, RateLimitPolicy},
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let login_routes = Router::new()
        .route("/auth/login", post(login))
        .route_layer(middleware::from_fn_with_state(
            RateLimitGuard::new(state.limiter.clone(), RateLimitPolicy::LOGIN),
            rate_limit,
        ));
    let forgot_routes = Router::new()
        .route("/auth/forgot-password", post(forgot_password))
        .route_layer(middleware::from_fn_with_state(
            RateLimitGuard::new(state.limiter.clone(), RateLimitPolicy::FORGOT_PASSWORD),
            rate_limit,
        ));

    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/verify-reset-code", post(verify_reset_code))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/profile", get(get_profile).put(update_profile))
        .route("/auth/change-password", put(change_password))
        .route("/auth/delete-account", delete(delete_account))
        .merge(login_routes)
        .merge(forgot_routes)
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/admin/users/:id/active", put(set_active))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AuthError> {
    let user = state
        .auth
        .register(&payload.name, &payload.email, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let outcome = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(AuthResponse {
        token: outcome.token,
        user: outcome.user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.auth.forgot_password(&payload.email).await?;
    // Same answer whether or not the address is registered.
    Ok(Json(MessageResponse::new(
        "if the address is registered, a reset code has been sent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn verify_reset_code(
    State(state): State<AppState>,
    Json(payload): Json<VerifyResetCodeRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.auth.verify_reset_code(&payload.code).await?;
    Ok(Json(MessageResponse::new("reset code is valid")))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .auth
        .reset_password(&payload.code, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse::new("password has been reset")))
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    let profile = state.auth.get_profile(user.id).await?;
    Ok(Json(profile.into()))
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<PublicUser>, AuthError> {
    let profile = state
        .auth
        .update_profile(user.id, &payload.name, &payload.email)
        .await?;
    Ok(Json(profile.into()))
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .auth
        .change_password(user.id, &payload.old_password, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse::new("password changed")))
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, AuthError> {
    state.auth.delete_user(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(admin_id = admin.id))]
pub async fn set_active(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.auth.set_active(id, payload.is_active).await?;
    info!(admin_id = admin.id, user_id = id, active = payload.is_active, "admin changed user status");
    Ok(Json(MessageResponse::new(if payload.is_active {
        "user activated"
    } else {
        "user deactivated"
    })))
}
