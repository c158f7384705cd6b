use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ALLOWED_DOMAIN: &str = "@skit.ac.in";
pub const DEFAULT_OFFICER_EMAIL: &str = "tpo@skit.ac.in";
pub const MEMORY_DB_PATH: &str = ":memory:";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// `None` keeps everything in memory for the lifetime of the process.
    pub db_path: Option<PathBuf>,
    pub allowed_domain: String,
    pub officer_email: String,
    pub officer_password: Option<String>,
    pub session_max_age: Duration,
    pub extract_provider: String,
    pub extract_model: Option<String>,
    pub extract_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let db_path = match env::var("PLACEMENT_DB_PATH") {
            Ok(path) if path == MEMORY_DB_PATH => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => Some(default_db_path()),
        };
        let allowed_domain = env::var("PLACEMENT_ALLOWED_DOMAIN")
            .map(|d| normalize_domain(&d))
            .unwrap_or_else(|_| DEFAULT_ALLOWED_DOMAIN.to_string());
        let officer_email = env::var("PLACEMENT_OFFICER_EMAIL")
            .unwrap_or_else(|_| DEFAULT_OFFICER_EMAIL.to_string());
        let officer_password = env::var("PLACEMENT_OFFICER_PASSWORD")
            .ok()
            .filter(|p| !p.is_empty());
        let session_max_age_secs: u64 = env::var("SESSION_MAX_AGE_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .context("SESSION_MAX_AGE_SECS must be a whole number of seconds")?;
        let extract_provider =
            env::var("EXTRACT_PROVIDER").unwrap_or_else(|_| "mock".to_string());
        let extract_model = env::var("EXTRACT_MODEL").ok().filter(|m| !m.is_empty());
        let extract_timeout_secs: u64 = env::var("EXTRACT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("EXTRACT_TIMEOUT_SECS must be a whole number of seconds")?;

        Ok(Self {
            db_path,
            allowed_domain,
            officer_email,
            officer_password,
            session_max_age: Duration::from_secs(session_max_age_secs),
            extract_provider,
            extract_model,
            extract_timeout: Duration::from_secs(extract_timeout_secs),
        })
    }
}

/// Anchors a configured domain at the `@`, so `skit.ac.in` cannot be matched
/// by the tail of `someone@evilskit.ac.in`.
pub fn normalize_domain(raw: &str) -> String {
    let domain = raw.trim().trim_start_matches('@');
    if domain.is_empty() {
        DEFAULT_ALLOWED_DOMAIN.to_string()
    } else {
        format!("@{}", domain)
    }
}

fn default_db_path() -> PathBuf {
    // XDG data directory, or the working directory as a last resort
    match directories::ProjectDirs::from("", "", "placement") {
        Some(dirs) => dirs.data_dir().join("placement.db"),
        None => PathBuf::from("placement.db"),
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            db_path: None,
            allowed_domain: DEFAULT_ALLOWED_DOMAIN.to_string(),
            officer_email: DEFAULT_OFFICER_EMAIL.to_string(),
            officer_password: Some("1234".to_string()),
            session_max_age: Duration::from_secs(3600),
            extract_provider: "mock".to_string(),
            extract_model: None,
            extract_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain_adds_at_sign() {
        assert_eq!(normalize_domain("skit.ac.in"), "@skit.ac.in");
        assert_eq!(normalize_domain(" @skit.ac.in "), "@skit.ac.in");
        assert_eq!(normalize_domain("@@skit.ac.in"), "@skit.ac.in");
        assert_eq!(normalize_domain("  "), DEFAULT_ALLOWED_DOMAIN);
    }
}
