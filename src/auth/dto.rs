use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{repo::User, services::is_valid_email};
use crate::error::AppError;

pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 4..=16;
pub const PASSWORD_LEN: std::ops::RangeInclusive<usize> = 6..=15;

/// Request body for `POST /auth/signup`.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl SignupRequest {
    /// Trims the username, lower-cases the email and checks field constraints.
    pub fn normalize(mut self) -> Result<Self, AppError> {
        self.username = self.username.trim().to_string();
        self.email = super::services::normalize_email(&self.email);

        if !USERNAME_LEN.contains(&self.username.chars().count()) {
            return Err(AppError::Unprocessable(format!(
                "username must be {} to {} characters",
                USERNAME_LEN.start(),
                USERNAME_LEN.end()
            )));
        }
        if !is_valid_email(&self.email) {
            return Err(AppError::Unprocessable("email is not a valid email address".into()));
        }
        validate_password(&self.password)?;
        Ok(self)
    }
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if PASSWORD_LEN.contains(&password.chars().count()) {
        Ok(())
    } else {
        Err(AppError::Unprocessable(format!(
            "password must be {} to {} characters",
            PASSWORD_LEN.start(),
            PASSWORD_LEN.end()
        )))
    }
}

/// OAuth2 password-grant form: `username` carries the email.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            avatar: u.avatar,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Response body for a successful signup.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: PublicUser,
    pub detail: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(username: &str, email: &str, password: &str) -> SignupRequest {
        SignupRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn signup_is_normalized() {
        let body = signup("  johndoe ", " John.Doe@Example.COM", "123456").normalize().unwrap();
        assert_eq!(body.username, "johndoe");
        assert_eq!(body.email, "john.doe@example.com");
    }

    #[test]
    fn signup_rejects_bad_fields() {
        assert!(signup("joe", "joe@example.com", "123456").normalize().is_err());
        assert!(signup("johndoe_the_seventeenth", "joe@example.com", "123456").normalize().is_err());
        assert!(signup("johndoe", "not-an-email", "123456").normalize().is_err());
        assert!(signup("johndoe", "joe@example.com", "12345").normalize().is_err());
        assert!(signup("johndoe", "joe@example.com", "1234567890123456").normalize().is_err());
    }

    #[test]
    fn public_user_hides_secrets() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: "johndoe".into(),
            email: "john.doe@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            avatar: None,
            refresh_token_hash: Some("abc".into()),
            confirmed: true,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(PublicUser::from(user)).unwrap();
        assert_eq!(json["email"], "john.doe@example.com");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refresh_token_hash").is_none());
        assert!(json["created_at"].as_str().unwrap().contains('T'));
    }
}
