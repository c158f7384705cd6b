use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::AppConfig;
use crate::storage::{Scope, Storage};

const SESSION_KEY: &str = "authSession";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "student")]
    Student,
    #[serde(rename = "tpo")]
    Officer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Student => "student",
            Role::Officer => "placement officer",
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("{email} is not on the allowed domain {domain}")]
    DomainNotAllowed { email: String, domain: String },
    #[error("invalid officer credentials")]
    InvalidCredentials,
    #[error("not signed in (or the session expired); run `placement login` first")]
    Unauthenticated,
    #[error("this command is only available to the {0} role")]
    Forbidden(Role),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub email: String,
    pub role: Role,
    pub signed_in_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Decides which role, if any, an identity gets. A password means an officer
/// sign-in against the configured pair; otherwise the email must be on the
/// allowed domain.
pub fn authorize(config: &AppConfig, email: &str, password: Option<&str>) -> Result<Role, AuthError> {
    let email = email.trim();

    if let Some(password) = password {
        let matches = config.officer_password.as_deref() == Some(password)
            && email.eq_ignore_ascii_case(&config.officer_email);
        return if matches {
            Ok(Role::Officer)
        } else {
            Err(AuthError::InvalidCredentials)
        };
    }

    if email
        .to_lowercase()
        .ends_with(&config.allowed_domain.to_lowercase())
    {
        Ok(Role::Student)
    } else {
        Err(AuthError::DomainNotAllowed {
            email: email.to_string(),
            domain: config.allowed_domain.clone(),
        })
    }
}

pub fn sign_in(
    storage: &Storage,
    config: &AppConfig,
    email: &str,
    password: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Session, AuthError> {
    let role = authorize(config, email, password)?;
    let email = email.trim().to_lowercase();

    // Re-authenticating the same identity renews the session; anything else
    // starts a fresh one.
    let renewing = current_session(storage, now)
        .map(|s| s.email == email && s.role == role)
        .unwrap_or(false);
    if !renewing {
        storage.clear(Scope::Session);
    }

    let max_age = Duration::from_std(config.session_max_age).unwrap_or(Duration::hours(1));
    let session = Session {
        email,
        role,
        signed_in_at: now,
        expires_at: now + max_age,
    };
    match serde_json::to_string(&session) {
        Ok(text) => {
            storage.set(Scope::Session, SESSION_KEY, &text);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode session"),
    }
    tracing::info!(email = %session.email, role = %session.role, renewing, "Signed in");
    Ok(session)
}

/// Ends the session and everything scoped to it.
pub fn sign_out(storage: &Storage) -> bool {
    storage.clear(Scope::Session)
}

/// The live session, if any. An expired session is ended on the spot.
pub fn current_session(storage: &Storage, now: DateTime<Utc>) -> Option<Session> {
    let text = storage.get(Scope::Session, SESSION_KEY)?;
    let session: Session = match serde_json::from_str(&text) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Stored session unreadable");
            return None;
        }
    };

    if session.is_expired(now) {
        tracing::info!(email = %session.email, "Session expired");
        sign_out(storage);
        return None;
    }
    Some(session)
}

pub fn require_role(storage: &Storage, now: DateTime<Utc>, role: Role) -> Result<Session, AuthError> {
    let session = current_session(storage, now).ok_or(AuthError::Unauthenticated)?;
    if session.role != role {
        return Err(AuthError::Forbidden(role));
    }
    Ok(session)
}
