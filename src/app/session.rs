//! Cookie-backed visitor session.
//!
//! The whole session lives in a single encrypted cookie, so the OAuth token
//! never touches server-side storage.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use url::Url;

use super::AppState;
use crate::error::AppError;
use crate::models::GitHubUser;
use crate::scope::RequestScope;

pub const SESSION_COOKIE: &str = "s";

const SESSION_MAX_AGE: time::Duration = time::Duration::days(30);

/// Key for the session cookie. An empty secret yields a random key.
pub fn cookie_key(secret: &str) -> Key {
    if secret.is_empty() {
        tracing::warn!("PRCHECKLIST_SESSION_SECRET is empty, sessions will not survive a restart");
        return Key::generate();
    }
    if secret.len() < 32 {
        tracing::warn!("PRCHECKLIST_SESSION_SECRET is shorter than 32 bytes");
    }
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
}

/// A logged-in visitor, including the OAuth token.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    pub token: String,
}

impl std::fmt::Debug for SessionUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionUser")
            .field("id", &self.id)
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl SessionUser {
    pub fn from_github_user(user: &GitHubUser) -> Option<Self> {
        Some(Self {
            id: user.id,
            login: user.login.clone(),
            avatar_url: user.avatar_url.clone(),
            token: user.token.clone()?,
        })
    }

    pub fn to_github_user(&self) -> GitHubUser {
        GitHubUser {
            id: self.id,
            login: self.login.clone(),
            avatar_url: self.avatar_url.clone(),
            token: Some(self.token.clone()),
        }
    }
}

impl SessionData {
    /// Reads the session; a missing or undecodable cookie is an empty session.
    pub fn load(jar: &PrivateCookieJar) -> Self {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
            .unwrap_or_default()
    }

    pub fn store(&self, jar: PrivateCookieJar) -> Result<PrivateCookieJar, AppError> {
        let value = serde_json::to_string(self)
            .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("encoding session")))?;
        let cookie = Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(SESSION_MAX_AGE);
        Ok(jar.add(cookie))
    }

    pub fn clear(jar: PrivateCookieJar) -> PrivateCookieJar {
        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }
}

/// Scheme and host the visitor reached us on.
#[derive(Debug, Clone)]
pub struct RequestOrigin(pub Url);

impl FromRequestParts<AppState> for RequestOrigin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let parts: &Parts = parts;
        let forwarded = |name: &str| {
            if state.behind_proxy {
                first_header_value(parts, name)
            } else {
                None
            }
        };

        let scheme = forwarded("x-forwarded-proto")
            .or(parts.uri.scheme_str())
            .unwrap_or("http");
        let host = forwarded("x-forwarded-host")
            .or_else(|| first_header_value(parts, "host"))
            .or(parts.uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");

        Url::parse(&format!("{scheme}://{host}"))
            .map(RequestOrigin)
            .map_err(|e| AppError::Validation(format!("invalid request origin {host:?}: {e}")))
    }
}

fn first_header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl RequestOrigin {
    pub fn scope_for(&self, user: Option<&SessionUser>) -> RequestScope {
        RequestScope::new(user.map(|u| u.token.clone()), self.0.clone())
    }
}

/// Local path to send the visitor back to after login. Anything that could
/// leave the site falls back to `/`.
pub fn safe_return_to(return_to: Option<&str>) -> String {
    match return_to {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\") =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}
