use axum::{
    extract::State,
    http::{header, StatusCode},
    routing::get,
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    birthdays,
    dto::{BirthdayQuery, ContactCreate, ContactResponse, ContactUpdate, ListQuery},
    repo,
};
use crate::{
    auth::jwt::AuthUser,
    error::{is_unique_violation, AppError},
    extract::{AppJson, AppPath, AppQuery},
    rate_limit::Throttle,
    state::AppState,
};

type Strict = Throttle<10, 60>;
type Relaxed = Throttle<30, 60>;

pub fn contacts_routes() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(list_contacts).post(create_contact))
        .route("/contacts/birthdays", get(upcoming_birthdays))
        .route(
            "/contacts/:id",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
}

fn not_found() -> AppError {
    AppError::NotFound("Contact not found".into())
}

fn map_write_error(e: anyhow::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::Conflict("Contact with this email already exists".into())
    } else {
        e.into()
    }
}

#[instrument(skip(state, q))]
pub async fn list_contacts(
    _: Strict,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    AppQuery(q): AppQuery<ListQuery>,
) -> Result<Json<Vec<ContactResponse>>, AppError> {
    q.validate()?;
    let contacts = repo::list_by_user(&state.db, user_id, q.term(), q.skip, q.limit).await?;
    Ok(Json(contacts.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state))]
pub async fn upcoming_birthdays(
    _: Relaxed,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    AppQuery(q): AppQuery<BirthdayQuery>,
) -> Result<Json<Vec<ContactResponse>>, AppError> {
    q.validate()?;
    let today = OffsetDateTime::now_utc().date();
    let contacts = repo::list_all_by_user(&state.db, user_id).await?;
    let hits = birthdays::upcoming(contacts, today, q.days);
    Ok(Json(hits.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state))]
pub async fn get_contact(
    _: Relaxed,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<ContactResponse>, AppError> {
    let contact = repo::get(&state.db, user_id, id).await?.ok_or_else(not_found)?;
    Ok(Json(contact.into()))
}

#[instrument(skip(state, body))]
pub async fn create_contact(
    _: Strict,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<ContactCreate>,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Json<ContactResponse>), AppError> {
    let body = body.normalize()?;
    let contact = repo::create(&state.db, user_id, &body)
        .await
        .map_err(map_write_error)?;

    info!(%user_id, contact_id = %contact.id, "contact created");
    let location = format!("/api/contacts/{}", contact.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(contact.into()),
    ))
}

#[instrument(skip(state, body))]
pub async fn update_contact(
    _: Strict,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<ContactUpdate>,
) -> Result<Json<ContactResponse>, AppError> {
    let body = body.normalize()?;
    let contact = repo::update(&state.db, user_id, id, &body)
        .await
        .map_err(map_write_error)?
        .ok_or_else(not_found)?;

    info!(%user_id, contact_id = %contact.id, "contact updated");
    Ok(Json(contact.into()))
}

#[instrument(skip(state))]
pub async fn delete_contact(
    _: Strict,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<ContactResponse>, AppError> {
    let contact = repo::delete(&state.db, user_id, id).await?.ok_or_else(not_found)?;
    info!(%user_id, contact_id = %contact.id, "contact deleted");
    Ok(Json(contact.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::{
        app::build_app,
        auth::{
            jwt::{JwtKeys, TokenKind},
            repo::User,
        },
        state::AppState,
    };

    async fn bearer_for(state: &AppState, email: &str) -> HeaderValue {
        let user = User::create(&state.db, "tester", email, "hash", None).await.unwrap();
        let token = JwtKeys::from_config(&state.config.jwt)
            .sign(user.id, TokenKind::Access)
            .unwrap();
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
    }

    fn contact_body(email: &str) -> Value {
        json!({
            "first_name": "Carl",
            "last_name": "Doe",
            "email": email,
            "phone_number": "380501234567",
            "birthday": "1990-03-14"
        })
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn contact_of_another_user_is_not_found(db: PgPool) {
        let state = AppState::fake_with_db(db);
        let ann = bearer_for(&state, "ann@example.com").await;
        let bob = bearer_for(&state, "bob@example.com").await;
        let server = TestServer::new(build_app(state)).unwrap();

        let res = server
            .post("/api/contacts")
            .add_header(header::AUTHORIZATION, ann.clone())
            .json(&contact_body("carl@example.com"))
            .await;
        assert_eq!(res.status_code(), StatusCode::CREATED);
        let id: Uuid = serde_json::from_value(res.json::<Value>()["id"].clone()).unwrap();
        assert_eq!(res.header(header::LOCATION), format!("/api/contacts/{id}").as_str());

        let res = server
            .get(&format!("/api/contacts/{id}"))
            .add_header(header::AUTHORIZATION, bob.clone())
            .await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.json::<Value>()["detail"], "Contact not found");

        let res = server
            .delete(&format!("/api/contacts/{id}"))
            .add_header(header::AUTHORIZATION, bob)
            .await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

        let res = server
            .get(&format!("/api/contacts/{id}"))
            .add_header(header::AUTHORIZATION, ann)
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.json::<Value>()["email"], "carl@example.com");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_email_conflicts_regardless_of_case(db: PgPool) {
        let state = AppState::fake_with_db(db);
        let ann = bearer_for(&state, "ann@example.com").await;
        let server = TestServer::new(build_app(state)).unwrap();

        let res = server
            .post("/api/contacts")
            .add_header(header::AUTHORIZATION, ann.clone())
            .json(&contact_body("carl@example.com"))
            .await;
        assert_eq!(res.status_code(), StatusCode::CREATED);

        let res = server
            .post("/api/contacts")
            .add_header(header::AUTHORIZATION, ann)
            .json(&contact_body("Carl@Example.com"))
            .await;
        assert_eq!(res.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            res.json::<Value>()["detail"],
            "Contact with this email already exists"
        );
    }
}
