use axum::extract::{Query, State};
use axum::response::Redirect;
use axum_extra::extract::PrivateCookieJar;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::app::session::{RequestOrigin, SessionData, SessionUser, safe_return_to};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    #[serde(default)]
    pub return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub return_to: Option<String>,
}

fn random_state() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

/// Starts the OAuth flow: remembers a fresh state in the session and sends
/// the visitor to the provider's authorization page.
pub async fn auth_start(
    State(state): State<AppState>,
    origin: RequestOrigin,
    jar: PrivateCookieJar,
    Query(query): Query<AuthQuery>,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    let mut session = SessionData::load(&jar);
    let oauth_state = random_state();
    session.oauth_state = Some(oauth_state.clone());
    let jar = session.store(jar)?;

    let mut callback = origin.scope_for(None).build_url("/auth/callback");
    if let Some(return_to) = query.return_to.as_deref().filter(|s| !s.is_empty()) {
        callback.query_pairs_mut().append_pair("return_to", return_to);
    }

    let auth_url = state.oauth.auth_code_url(&oauth_state, Some(&callback))?;
    Ok((jar, Redirect::to(auth_url.as_str())))
}

#[tracing::instrument(skip_all)]
pub async fn auth_callback(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(PrivateCookieJar, Redirect), AppError> {
    let mut session = SessionData::load(&jar);

    let expected = session.oauth_state.take();
    if expected.is_none() || expected != query.state {
        tracing::warn!("OAuth state mismatch");
        return Err(AppError::Validation("OAuth state mismatch".to_string()));
    }

    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("missing OAuth code".to_string()))?;

    let user = state.oauth.authenticate_user(code).await?;
    let session_user = SessionUser::from_github_user(&user).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("authenticated user {} carries no token", user.login))
    })?;

    state.usecase.add_user(&user).await?;
    tracing::info!(login = %user.login, id = user.id, "user logged in");

    session.user = Some(session_user);
    let jar = session.store(jar)?;

    let return_to = safe_return_to(query.return_to.as_deref());
    Ok((jar, Redirect::to(&return_to)))
}

pub async fn auth_clear(jar: PrivateCookieJar) -> (PrivateCookieJar, Redirect) {
    (SessionData::clear(jar), Redirect::to("/"))
}
