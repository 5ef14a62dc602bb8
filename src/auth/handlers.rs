use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            validate_password, EmailRequest, LoginForm, MessageResponse, PasswordResetConfirm,
            SignupRequest, SignupResponse, TokenResponse,
        },
        jwt::{BearerToken, JwtKeys, TokenKind},
        password::{hash_password, verify_password},
        repo::User,
        services::{gravatar_url, hash_token, normalize_email},
    },
    error::{is_unique_violation, AppError},
    extract::{AppForm, AppJson, AppPath},
    mail::{confirmation_email, password_reset_email, send_in_background},
    rate_limit::Throttle,
    state::AppState,
};

type AuthThrottle = Throttle<10, 60>;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/refresh_token", get(refresh_token))
        .route("/auth/confirm_email/:token", get(confirm_email))
        .route("/auth/request_email", post(request_email))
        .route("/auth/password-reset", post(password_reset_request))
        .route("/auth/password-reset/confirm", post(password_reset_confirm))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    _: AuthThrottle,
    State(state): State<AppState>,
    AppJson(payload): AppJson<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    let payload = payload.normalize()?;

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "account already exists");
        return Err(AppError::Conflict("Account already exists".into()));
    }

    let hash = hash_password(&payload.password)?;
    let avatar = gravatar_url(&payload.email);
    let user = match User::create(&state.db, &payload.username, &payload.email, &hash, Some(&avatar)).await {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::Conflict("Account already exists".into()));
        }
        Err(e) => return Err(e.into()),
    };

    send_confirmation(&state, &user)?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: user.into(),
            detail: "User successfully created. Check your email for confirmation.",
        }),
    ))
}

#[instrument(skip(state, form))]
pub async fn login(
    _: AuthThrottle,
    State(state): State<AppState>,
    AppForm(form): AppForm<LoginForm>,
) -> Result<Json<TokenResponse>, AppError> {
    let email = normalize_email(&form.username);

    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized("Invalid email".into()));
    };

    if !user.confirmed {
        warn!(user_id = %user.id, "login before email confirmation");
        return Err(AppError::Unauthorized("Email not confirmed".into()));
    }

    if !verify_password(&form.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized("Invalid password".into()));
    }

    let tokens = issue_tokens(&state, user.id).await?;
    info!(user_id = %user.id, "user logged in");
    Ok(Json(tokens))
}

#[instrument(skip(state, token))]
pub async fn refresh_token(
    _: AuthThrottle,
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<TokenResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_kind(&token, TokenKind::Refresh).map_err(|e| {
        warn!(error = %e, "rejected refresh token");
        AppError::credentials()
    })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(AppError::credentials)?;

    if user.refresh_token_hash.as_deref() != Some(hash_token(&token).as_str()) {
        // A valid but superseded token: revoke the session.
        User::set_refresh_token(&state.db, user.id, None).await?;
        warn!(user_id = %user.id, "stale refresh token presented; session revoked");
        return Err(AppError::Unauthorized("Invalid refresh token".into()));
    }

    let tokens = issue_tokens(&state, user.id).await?;
    Ok(Json(tokens))
}

#[instrument(skip(state, token))]
pub async fn confirm_email(
    _: AuthThrottle,
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let claims = JwtKeys::from_ref(&state)
        .verify_kind(&token, TokenKind::EmailConfirm)
        .map_err(|e| {
            warn!(error = %e, "rejected email confirmation token");
            AppError::Unprocessable("Invalid token for email verification".into())
        })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| AppError::BadRequest("Verification error".into()))?;

    if user.confirmed {
        return Ok(Json(MessageResponse {
            message: "Your email is already confirmed",
        }));
    }

    User::confirm_email(&state.db, user.id).await?;
    info!(user_id = %user.id, "email confirmed");
    Ok(Json(MessageResponse {
        message: "Email confirmed",
    }))
}

#[instrument(skip(state, body))]
pub async fn request_email(
    _: AuthThrottle,
    State(state): State<AppState>,
    AppJson(body): AppJson<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = find_requested_user(&state, &body.email)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(
                "No account found with this email address. Please check your email address or register."
                    .into(),
            )
        })?;

    if user.confirmed {
        return Ok(Json(MessageResponse {
            message: "Your email is already confirmed",
        }));
    }

    send_confirmation(&state, &user)?;
    Ok(Json(MessageResponse {
        message: "Check your email for confirmation.",
    }))
}

#[instrument(skip(state, body))]
pub async fn password_reset_request(
    _: AuthThrottle,
    State(state): State<AppState>,
    AppJson(body): AppJson<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let user = find_requested_user(&state, &body.email)
        .await?
        .ok_or_else(|| AppError::NotFound("User with this email does not exist.".into()))?;

    let token = JwtKeys::from_ref(&state).sign(user.id, TokenKind::PasswordReset)?;
    send_in_background(
        state.mailer.clone(),
        password_reset_email(&user.email, &user.username, &state.config.public_base_url, &token),
    );

    info!(user_id = %user.id, "password reset requested");
    Ok(Json(MessageResponse {
        message: "If your email is registered, we've sent a link to reset your password.",
    }))
}

#[instrument(skip(state, body))]
pub async fn password_reset_confirm(
    _: AuthThrottle,
    State(state): State<AppState>,
    AppJson(body): AppJson<PasswordResetConfirm>,
) -> Result<Json<MessageResponse>, AppError> {
    validate_password(&body.new_password)?;

    let claims = JwtKeys::from_ref(&state)
        .verify_kind(&body.token, TokenKind::PasswordReset)
        .map_err(|e| {
            warn!(error = %e, "rejected password reset token");
            AppError::Unprocessable("Invalid token for password reset".into())
        })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".into()))?;

    let hash = hash_password(&body.new_password)?;
    User::update_password(&state.db, user.id, &hash).await?;

    info!(user_id = %user.id, "password reset");
    Ok(Json(MessageResponse {
        message: "Your password has been reset successfully.",
    }))
}

async fn find_requested_user(state: &AppState, email: &str) -> Result<Option<User>, AppError> {
    let email = normalize_email(email);
    if !super::services::is_valid_email(&email) {
        return Err(AppError::Unprocessable("email is not a valid email address".into()));
    }
    Ok(User::find_by_email(&state.db, &email).await?)
}

fn send_confirmation(state: &AppState, user: &User) -> Result<(), AppError> {
    let token = JwtKeys::from_ref(state).sign(user.id, TokenKind::EmailConfirm)?;
    send_in_background(
        state.mailer.clone(),
        confirmation_email(&user.email, &user.username, &state.config.public_base_url, &token),
    );
    Ok(())
}

/// Issues an access/refresh pair and records the refresh token as current.
async fn issue_tokens(state: &AppState, user_id: Uuid) -> Result<TokenResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign(user_id, TokenKind::Access)?;
    let refresh_token = keys.sign(user_id, TokenKind::Refresh)?;
    User::set_refresh_token(&state.db, user_id, Some(&hash_token(&refresh_token))).await?;
    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer",
    })
}
