use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub email_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL the stored objects are publicly served from.
    pub public_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailBackend {
    Ses,
    Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub backend: MailBackend,
    pub from: String,
    pub from_name: String,
    pub ses_region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub public_base_url: String,
    pub cors_origins: Vec<String>,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: var_or("JWT_ISSUER", "contacts-api"),
            audience: var_or("JWT_AUDIENCE", "contacts-api-users"),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 15),
            refresh_ttl_minutes: parsed_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7),
            email_ttl_minutes: parsed_or("JWT_EMAIL_TTL_MINUTES", 60 * 24 * 7),
        };

        let endpoint = std::env::var("S3_ENDPOINT").context("S3_ENDPOINT is not set")?;
        let bucket = std::env::var("S3_BUCKET").context("S3_BUCKET is not set")?;
        let public_url = std::env::var("S3_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let storage = StorageConfig {
            access_key: std::env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY is not set")?,
            secret_key: std::env::var("S3_SECRET_KEY").context("S3_SECRET_KEY is not set")?,
            region: var_or("S3_REGION", "us-east-1"),
            public_url,
            endpoint,
            bucket,
        };

        let mail = MailConfig {
            backend: parse_mail_backend(&var_or("MAIL_BACKEND", "log"))?,
            from: var_or("MAIL_FROM", "no-reply@localhost"),
            from_name: var_or("MAIL_FROM_NAME", "Contacts API"),
            ses_region: var_or("SES_REGION", "us-east-1"),
        };

        Ok(Self {
            database_url,
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379/0"),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            cors_origins: split_origins(&var_or("CORS_ORIGINS", "http://localhost:3000")),
            jwt,
            storage,
            mail,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn parse_mail_backend(raw: &str) -> anyhow::Result<MailBackend> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "ses" => Ok(MailBackend::Ses),
        "log" => Ok(MailBackend::Log),
        other => anyhow::bail!("unknown MAIL_BACKEND {other:?}, expected \"ses\" or \"log\""),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_empty_entries_dropped() {
        let origins = split_origins(" http://localhost:3000/ ,, https://app.example.com");
        assert_eq!(origins, vec!["http://localhost:3000", "https://app.example.com"]);
    }

    #[test]
    fn mail_backend_is_case_insensitive() {
        assert_eq!(parse_mail_backend("SES").unwrap(), MailBackend::Ses);
        assert_eq!(parse_mail_backend(" log ").unwrap(), MailBackend::Log);
        assert!(parse_mail_backend("smtp").is_err());
    }
}
