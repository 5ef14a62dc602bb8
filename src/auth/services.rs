use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// SHA-256 hex digest; refresh tokens are stored only in this form.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Default avatar for a freshly registered account.
pub fn gravatar_url(email: &str) -> String {
    format!(
        "https://www.gravatar.com/avatar/{}?d=identicon",
        hash_token(&normalize_email(email))
    )
}
