use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::Role,
        dto::{
            is_valid_email, LoginRequest, LoginResponse, PublicUser, RegisterRequest,
            RegisterResponse,
        },
        extractors::AuthUser,
        password::{
            hash_password_blocking, verify_against_dummy, verify_password_blocking,
            MIN_PASSWORD_LEN,
        },
        repo_types::User,
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn user_routes() -> Router<AppState> {
    Router::new().route("/users/:id", get(get_user))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    payload.username = payload.username.trim().to_string();

    if payload.username.is_empty() {
        return Err(ApiError::bad_request("Username is required"));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::bad_request("Password too short"));
    }

    if User::find_by_email(&state.db, &payload.email)
        .await
        .map_err(ApiError::internal)?
        .is_some()
    {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::conflict("Email already registered"));
    }
    if User::find_by_username(&state.db, &payload.username)
        .await
        .map_err(ApiError::internal)?
        .is_some()
    {
        warn!(username = %payload.username, "username already taken");
        return Err(ApiError::conflict("Username already taken"));
    }

    let hash = hash_password_blocking(payload.password)
        .await
        .map_err(ApiError::internal)?;
    let user = User::create(&state.db, &payload.username, &payload.email, &hash, Role::User)
        .await
        .map_err(ApiError::internal)?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully",
            user_id: user.id,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = payload.username.trim();

    let user = match User::find_by_username(&state.db, username)
        .await
        .map_err(ApiError::internal)?
    {
        Some(u) => u,
        None => {
            verify_against_dummy(payload.password).await;
            warn!(username = %username, "login unknown user");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    let ok = verify_password_blocking(payload.password, user.password_hash.clone())
        .await
        .map_err(ApiError::internal)?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = state
        .jwt
        .issue(&user.id.to_string(), &user.username, user.role())
        .map_err(ApiError::from)?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(LoginResponse {
        user_id: user.id,
        token,
    }))
}

#[instrument(skip(state, caller), fields(caller = %caller.user_id))]
pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, ApiError> {
    if !caller.may_access(&id.to_string()) {
        warn!(requested = %id, "profile access denied");
        return Err(ApiError::forbidden(
            "Forbidden, you can only access your own profile",
        ));
    }

    let user = User::find_by_id(&state.db, id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(PublicUser::from(user)))
}
