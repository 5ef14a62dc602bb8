use serde::{Deserialize, Deserializer, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::repo::Contact;
use crate::{
    auth::services::{is_valid_email, normalize_email},
    error::AppError,
};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

pub const NAME_MAX: usize = 50;
pub const EMAIL_MAX: usize = 50;
pub const PHONE_MAX: usize = 15;
pub const MAX_PAGE: i64 = 1000;
pub const MAX_BIRTHDAY_WINDOW: i64 = 366;

#[derive(Debug, Clone, Deserialize)]
pub struct ContactCreate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    #[serde(with = "iso_date")]
    pub birthday: Date,
    #[serde(default)]
    pub additional_info: Option<String>,
}

impl ContactCreate {
    pub fn normalize(mut self) -> Result<Self, AppError> {
        self.first_name = required_text("first_name", &self.first_name, NAME_MAX)?;
        self.last_name = required_text("last_name", &self.last_name, NAME_MAX)?;
        self.email = contact_email(&self.email)?;
        self.phone_number = required_text("phone_number", &self.phone_number, PHONE_MAX)?;
        Ok(self)
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default, with = "iso_date::option")]
    pub birthday: Option<Date>,
    /// `Some(None)` when the client sent an explicit `null`.
    #[serde(default, deserialize_with = "double_option")]
    pub additional_info: Option<Option<String>>,
}

impl ContactUpdate {
    pub fn normalize(mut self) -> Result<Self, AppError> {
        if let Some(v) = self.first_name.as_deref() {
            self.first_name = Some(required_text("first_name", v, NAME_MAX)?);
        }
        if let Some(v) = self.last_name.as_deref() {
            self.last_name = Some(required_text("last_name", v, NAME_MAX)?);
        }
        if let Some(v) = self.email.as_deref() {
            self.email = Some(contact_email(v)?);
        }
        if let Some(v) = self.phone_number.as_deref() {
            self.phone_number = Some(required_text("phone_number", v, PHONE_MAX)?);
        }
        Ok(self)
    }
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn required_text(field: &str, value: &str, max: usize) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Unprocessable(format!("{field} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(AppError::Unprocessable(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

fn contact_email(value: &str) -> Result<String, AppError> {
    let email = normalize_email(&required_text("email", value, EMAIL_MAX)?);
    if !is_valid_email(&email) {
        return Err(AppError::Unprocessable("email is not a valid email address".into()));
    }
    Ok(email)
}

#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    #[serde(with = "iso_date")]
    pub birthday: Date,
    pub additional_info: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Contact> for ContactResponse {
    fn from(c: Contact) -> Self {
        Self {
            id: c.id,
            first_name: c.first_name,
            last_name: c.last_name,
            email: c.email,
            phone_number: c.phone_number,
            birthday: c.birthday,
            additional_info: c.additional_info,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub search: Option<String>,
}
fn default_limit() -> i64 {
    100
}

impl ListQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.skip < 0 {
            return Err(AppError::Unprocessable("skip must be zero or greater".into()));
        }
        if !(1..=MAX_PAGE).contains(&self.limit) {
            return Err(AppError::Unprocessable(format!(
                "limit must be between 1 and {MAX_PAGE}"
            )));
        }
        Ok(())
    }

    /// Search term, or `None` when blank.
    pub fn term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct BirthdayQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}
fn default_days() -> i64 {
    7
}

impl BirthdayQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        if (0..=MAX_BIRTHDAY_WINDOW).contains(&self.days) {
            Ok(())
        } else {
            Err(AppError::Unprocessable(format!(
                "days must be between 0 and {MAX_BIRTHDAY_WINDOW}"
            )))
        }
    }
}
