use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::dto::{ContactCreate, ContactUpdate};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub birthday: Date,
    pub additional_info: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

const CONTACT_COLUMNS: &str = "id, user_id, first_name, last_name, email, phone_number, \
                               birthday, additional_info, created_at, updated_at";

/// `%term%` with LIKE wildcards in `term` escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

pub async fn list_by_user(
    db: &PgPool,
    user_id: Uuid,
    search: Option<&str>,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<Contact>> {
    let pattern = search.map(like_pattern);
    let rows = sqlx::query_as::<_, Contact>(&format!(
        r#"
        SELECT {CONTACT_COLUMNS}
        FROM contacts
        WHERE user_id = $1
          AND ($2::text IS NULL
               OR first_name ILIKE $2
               OR last_name ILIKE $2
               OR email ILIKE $2
               OR phone_number ILIKE $2)
        ORDER BY last_name, first_name, id
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(user_id)
    .bind(pattern)
    .bind(limit)
    .bind(skip)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

/// Every contact of the user; the birthday window is applied by the caller.
pub async fn list_all_by_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<Contact>> {
    let rows = sqlx::query_as::<_, Contact>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<Option<Contact>> {
    let row = sqlx::query_as::<_, Contact>(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1 AND user_id = $2"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn create(db: &PgPool, user_id: Uuid, body: &ContactCreate) -> anyhow::Result<Contact> {
    let row = sqlx::query_as::<_, Contact>(&format!(
        r#"
        INSERT INTO contacts
            (user_id, first_name, last_name, email, phone_number, birthday, additional_info)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {CONTACT_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(&body.email)
    .bind(&body.phone_number)
    .bind(body.birthday)
    .bind(&body.additional_info)
    .fetch_one(db)
    .await?;
    Ok(row)
}

pub async fn update(
    db: &PgPool,
    user_id: Uuid,
    id: Uuid,
    body: &ContactUpdate,
) -> anyhow::Result<Option<Contact>> {
    let (set_notes, notes) = match &body.additional_info {
        Some(v) => (true, v.clone()),
        None => (false, None),
    };
    let row = sqlx::query_as::<_, Contact>(&format!(
        r#"
        UPDATE contacts
           SET first_name      = COALESCE($3, first_name),
               last_name       = COALESCE($4, last_name),
               email           = COALESCE($5, email),
               phone_number    = COALESCE($6, phone_number),
               birthday        = COALESCE($7, birthday),
               additional_info = CASE WHEN $8 THEN $9 ELSE additional_info END,
               updated_at      = now()
         WHERE id = $1 AND user_id = $2
        RETURNING {CONTACT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(user_id)
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(&body.email)
    .bind(&body.phone_number)
    .bind(body.birthday)
    .bind(set_notes)
    .bind(notes)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn delete(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<Option<Contact>> {
    let row = sqlx::query_as::<_, Contact>(&format!(
        "DELETE FROM contacts WHERE id = $1 AND user_id = $2 RETURNING {CONTACT_COLUMNS}"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_wraps_and_escapes() {
        assert_eq!(like_pattern("ann"), "%ann%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
