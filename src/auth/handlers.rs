use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, MessageResponse, ProfileResponse,
            RegisterRequest, ResetPasswordRequest, UpdateProfileRequest, VerifyResetCodeRequest,
        },
        jwt::{AuthUser, JwtKeys},
        repo::ProfileChanges,
        services::{self, RegisterInput},
    },
    error::AuthError,
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/reset-password", post(reset_password))
        .route("/verify-reset-code", post(verify_reset_code))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .route("/change-password", put(change_password))
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let keys = JwtKeys::from_ref(&state);
    let outcome = services::register(
        &*state.store,
        &keys,
        &state.config.password_cost,
        RegisterInput {
            name: payload.name,
            email: payload.email,
            password: payload.password,
            role: payload.role,
        },
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            token: outcome.token,
            user: outcome.user.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let keys = JwtKeys::from_ref(&state);
    let outcome = services::login(&*state.store, &keys, &payload.email, &payload.password).await?;
    Ok(Json(AuthResponse {
        success: true,
        token: outcome.token,
        user: outcome.user.into(),
    }))
}

#[instrument(skip(state))]
async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, AuthError> {
    let user = services::get_profile(&*state.store, user_id).await?;
    Ok(Json(ProfileResponse {
        success: true,
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, AuthError> {
    let changes = ProfileChanges {
        name: payload.name,
        email: payload.email,
        first_name: payload.first_name,
        last_name: payload.last_name,
        phone: payload.phone,
        address: payload.address,
        date_of_birth: payload.date_of_birth,
        gender: payload.gender,
        policy_number: payload.policy_number,
        insurance_provider: payload.insurance_provider,
        city: payload.city,
        state: payload.state,
        zip_code: payload.zip_code,
    };
    let user = services::update_profile(&*state.store, user_id, changes).await?;
    Ok(Json(ProfileResponse {
        success: true,
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    services::change_password(
        &*state.store,
        &state.config.password_cost,
        user_id,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password updated successfully".into(),
    }))
}

/// Acknowledges with the same body whether or not the email is registered.
#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    services::request_password_reset(
        &*state.store,
        &*state.mailer,
        state.config.reset_code_ttl_minutes,
        &payload.email,
    )
    .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "If an account exists with this email, you will receive password reset instructions"
            .into(),
    }))
}

#[instrument(skip(state, payload))]
async fn verify_reset_code(
    State(state): State<AppState>,
    Json(payload): Json<VerifyResetCodeRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    services::verify_reset_code(
        &*state.store,
        &state.config.password_cost,
        &payload.email,
        &payload.code,
        &payload.new_password,
    )
    .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password has been reset successfully".into(),
    }))
}
