use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use tracing::{info, instrument};

use super::avatar::{ext_from_mime, remove_stale, store_avatar, AvatarUpload, AVATAR_MAX_BYTES};
use crate::{
    auth::{dto::PublicUser, jwt::AuthUser, repo::User},
    error::AppError,
    rate_limit::Throttle,
    state::AppState,
};

pub fn read_router() -> Router<AppState> {
    Router::new().route("/users/me", get(me))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/users/avatar", patch(update_avatar))
        // room for multipart framing on top of the file itself
        .layer(DefaultBodyLimit::max(AVATAR_MAX_BYTES + 64 * 1024))
}

#[instrument(skip(state))]
pub async fn me(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<PublicUser>, AppError> {
    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(AppError::credentials)?;
    Ok(Json(user.into()))
}

/// PATCH /users/avatar (multipart, field `file`)
#[instrument(skip(state, mp))]
pub async fn update_avatar(
    _: Throttle<10, 60>,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    mut mp: Multipart,
) -> Result<Json<PublicUser>, AppError> {
    let upload = read_avatar_field(&mut mp).await?;

    let user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(AppError::credentials)?;

    let stored = store_avatar(state.storage.as_ref(), user_id, user.avatar.as_deref(), upload).await?;
    let user = User::update_avatar(&state.db, user_id, &stored.url)
        .await?
        .ok_or_else(AppError::credentials)?;
    if let Some(key) = stored.stale_key {
        remove_stale(state.storage.as_ref(), &key).await;
    }

    info!(%user_id, "avatar updated");
    Ok(Json(user.into()))
}

async fn read_avatar_field(mp: &mut Multipart) -> Result<AvatarUpload, AppError> {
    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_ascii_lowercase();
        if ext_from_mime(&content_type).is_none() {
            return Err(AppError::UnsupportedMediaType(
                "Avatar must be a JPEG, PNG, WebP or GIF image".into(),
            ));
        }
        let body = field.bytes().await.map_err(multipart_error)?;
        if body.is_empty() {
            return Err(AppError::BadRequest("Uploaded file is empty".into()));
        }
        if body.len() > AVATAR_MAX_BYTES {
            return Err(too_large());
        }
        return Ok(AvatarUpload { body, content_type });
    }
    Err(AppError::BadRequest("file is required".into()))
}

fn too_large() -> AppError {
    AppError::PayloadTooLarge(format!(
        "Avatar must not exceed {} MiB",
        AVATAR_MAX_BYTES / (1024 * 1024)
    ))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large()
    } else {
        AppError::BadRequest(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{header, HeaderValue, StatusCode};
    use axum_test::{
        multipart::{MultipartForm, Part},
        TestServer,
    };
    use serde_json::Value;
    use sqlx::PgPool;

    use crate::{
        app::build_app,
        auth::{
            jwt::{JwtKeys, TokenKind},
            repo::User,
        },
        state::AppState,
        users::avatar::testing::FakeStore,
    };

    #[sqlx::test(migrations = "./migrations")]
    async fn avatar_replaces_previous_object_after_saving(db: PgPool) {
        let store = Arc::new(FakeStore::default());
        let state = AppState {
            storage: store.clone(),
            ..AppState::fake_with_db(db)
        };
        let user = User::create(&state.db, "annlee", "ann@example.com", "hash", None)
            .await
            .unwrap();
        let previous = format!("https://fake.local/bucket/avatars/{}.png?v=1", user.id);
        User::update_avatar(&state.db, user.id, &previous).await.unwrap();

        let token = JwtKeys::from_config(&state.config.jwt)
            .sign(user.id, TokenKind::Access)
            .unwrap();
        let auth = HeaderValue::from_str(&format!("Bearer {token}")).unwrap();
        let server = TestServer::new(build_app(state.clone())).unwrap();

        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(vec![0xff, 0xd8, 0xff, 0xe0])
                .file_name("me.jpg")
                .mime_type("image/jpeg"),
        );
        let res = server
            .patch("/api/users/avatar")
            .add_header(header::AUTHORIZATION, auth.clone())
            .multipart(form)
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);

        let avatar = res.json::<Value>()["avatar"].as_str().unwrap().to_string();
        let expected = format!("https://fake.local/bucket/avatars/{}.jpg?v=", user.id);
        assert!(avatar.starts_with(&expected), "{avatar}");
        assert_eq!(
            *store.deletes.lock().unwrap(),
            vec![format!("avatars/{}.png", user.id)]
        );

        let stored = User::find_by_id(&state.db, user.id).await.unwrap().unwrap();
        assert_eq!(stored.avatar.as_deref(), Some(avatar.as_str()));

        let res = server
            .get("/api/users/me")
            .add_header(header::AUTHORIZATION, auth)
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.json::<Value>()["avatar"], avatar.as_str());
    }
}
