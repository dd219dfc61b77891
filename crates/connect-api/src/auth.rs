use std::path::PathBuf;
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::RngCore;
use tracing::info;
use uuid::Uuid;

use connect_db::{Database, now_timestamp};
use connect_types::api::{
    AuthResponse, Claims, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
    SignupRequest, UpdateProfileRequest, UserProfile,
};

use crate::convert;
use crate::error::{ApiError, join_error};
use crate::store::MessageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub messages: MessageStore,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
}

const TOKEN_LIFETIME_MINUTES: i64 = 30;
const RESET_TOKEN_LIFETIME_HOURS: i64 = 1;

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("Username must be 3-32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("Password must be at least 8 characters"));
    }
    if !req.email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email address"));
    }

    let taken = {
        let db = state.db.clone();
        let (email, username) = (req.email.clone(), req.username.clone());
        tokio::task::spawn_blocking(move || {
            Ok::<_, anyhow::Error>(
                db.get_user_by_email(&email)?.is_some()
                    || db.get_user_by_username(&username)?.is_some(),
            )
        })
        .await
        .map_err(join_error)?
        .map_err(ApiError::Internal)?
    };
    if taken {
        return Err(ApiError::Conflict(
            "User with this email or username already exists",
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    let user = {
        let db = state.db.clone();
        tokio::task::spawn_blocking(move || {
            db.create_user(
                &user_id.to_string(),
                &req.name,
                &req.username,
                &req.email,
                &password_hash,
                &req.bio,
                &now_timestamp(),
            )?;
            db.get_user_by_id(&user_id.to_string())
        })
        .await
        .map_err(join_error)?
        // The pre-check above races with concurrent signups; the UNIQUE
        // constraint is the authority, so a loss maps to the same conflict.
        .map_err(|e| {
            if connect_db::is_unique_violation(&e) {
                ApiError::Conflict("User with this email or username already exists")
            } else {
                ApiError::Internal(e)
            }
        })?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user vanished after insert")))?
    };

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            access_token: token,
            token_type: "bearer".into(),
            user: convert::user_profile(&user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = {
        let db = state.db.clone();
        let email = req.email.clone();
        tokio::task::spawn_blocking(move || db.get_user_by_email(&email))
            .await
            .map_err(join_error)?
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::Unauthorized)?
    };

    verify_password(&req.password, &user.password)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?;
    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(AuthResponse {
        access_token: token,
        token_type: "bearer".into(),
        user: convert::user_profile(&user),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = fetch_user(&state, claims.sub).await?;
    Ok(Json(convert::user_profile(&user)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();

    let updated = tokio::task::spawn_blocking(move || {
        let Some(current) = db.get_user_by_id(&user_id)? else {
            return Ok(Err(ApiError::Unauthorized));
        };

        if let Some(username) = &req.username {
            if db.username_taken_by_other(username, &user_id)? {
                return Ok(Err(ApiError::Conflict("Username already taken")));
            }
        }
        if let Some(email) = &req.email {
            if db.email_taken_by_other(email, &user_id)? {
                return Ok(Err(ApiError::Conflict("Email already taken")));
            }
        }

        // Absent fields keep their current value; profile_picture is only
        // ever set, never cleared, through this endpoint.
        let name = req.name.unwrap_or(current.name);
        let username = req.username.unwrap_or(current.username);
        let email = req.email.unwrap_or(current.email);
        let bio = req.bio.unwrap_or(current.bio);
        let profile_picture = req.profile_picture.or(current.profile_picture);

        db.update_user_profile(
            &user_id,
            &name,
            &username,
            &email,
            &bio,
            profile_picture.as_deref(),
        )?;
        Ok::<_, anyhow::Error>(Ok(db.get_user_by_id(&user_id)?))
    })
    .await
    .map_err(join_error)?
    .map_err(ApiError::Internal)?;

    let user = updated?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user vanished during update")))?;
    Ok(Json(convert::user_profile(&user)))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Same response whether or not the account exists.
    let neutral = serde_json::json!({
        "message": "If the email exists, a reset link has been sent"
    });

    let db = state.db.clone();
    let email = req.email.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&email))
        .await
        .map_err(join_error)?
        .map_err(ApiError::Internal)?;

    let Some(user) = user else {
        return Ok(Json(neutral));
    };

    let token = reset_token();
    let expires_at = (chrono::Utc::now() + chrono::Duration::hours(RESET_TOKEN_LIFETIME_HOURS))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

    {
        let db = state.db.clone();
        let (uid, tok, exp) = (user.id.clone(), token.clone(), expires_at);
        tokio::task::spawn_blocking(move || {
            db.insert_password_reset(&Uuid::new_v4().to_string(), &uid, &tok, &exp)
        })
        .await
        .map_err(join_error)?
        .map_err(ApiError::Internal)?;
    }

    // Mail delivery is not wired up; surface the token in the logs so an
    // operator can hand it over manually.
    info!("Password reset requested for {}; token: {}", req.email, token);

    Ok(Json(neutral))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.new_password.len() < 8 {
        return Err(ApiError::BadRequest("Password must be at least 8 characters"));
    }

    let password_hash = hash_password(&req.new_password)?;

    let db = state.db.clone();
    let reset = tokio::task::spawn_blocking(move || {
        let Some(reset) = db.get_active_reset(&req.token, &now_timestamp())? else {
            return Ok(false);
        };
        db.set_user_password(&reset.user_id, &password_hash)?;
        db.mark_reset_used(&reset.id)?;
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(join_error)?
    .map_err(ApiError::Internal)?;

    if !reset {
        return Err(ApiError::BadRequest("Invalid or expired reset token"));
    }

    Ok(Json(serde_json::json!({ "message": "Password reset successfully" })))
}

pub(crate) async fn fetch_user(
    state: &AppState,
    user_id: Uuid,
) -> Result<connect_db::models::UserRow, ApiError> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || db.get_user_by_id(&user_id.to_string()))
        .await
        .map_err(join_error)?
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::NotFound("User not found"))
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored_hash: &str) -> Result<(), ApiError> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {}", e)))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::minutes(TOKEN_LIFETIME_MINUTES)).timestamp()
            as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("token encoding failed: {}", e)))
}

fn reset_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
