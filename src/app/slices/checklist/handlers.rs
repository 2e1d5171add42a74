use axum::Json;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;

use crate::app::AppState;
use crate::app::session::{RequestOrigin, SessionData, SessionUser};
use crate::error::AppError;
use crate::models::{ChecklistRef, ChecklistResponse, DEFAULT_STAGE, MeResponse};

#[derive(Debug, Deserialize)]
pub struct ChecklistQuery {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    #[serde(default)]
    pub stage: String,
}

impl ChecklistQuery {
    fn checklist_ref(&self) -> ChecklistRef {
        checklist_ref(&self.owner, &self.repo, self.number, &self.stage)
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckForm {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    #[serde(default)]
    pub stage: String,
    #[serde(rename = "featureNumber", alias = "feature_number")]
    pub feature_number: u64,
}

impl CheckForm {
    fn checklist_ref(&self) -> ChecklistRef {
        checklist_ref(&self.owner, &self.repo, self.number, &self.stage)
    }
}

fn checklist_ref(owner: &str, repo: &str, number: u64, stage: &str) -> ChecklistRef {
    let stage = if stage.is_empty() { DEFAULT_STAGE } else { stage };
    ChecklistRef::new(owner, repo, number, stage)
}

fn require_user(jar: &PrivateCookieJar) -> Result<SessionUser, AppError> {
    SessionData::load(jar).user.ok_or(AppError::NotAuthenticated)
}

pub async fn me(
    State(state): State<AppState>,
    origin: RequestOrigin,
    jar: PrivateCookieJar,
) -> Result<Json<MeResponse>, AppError> {
    let Some(user) = SessionData::load(&jar).user else {
        return Ok(Json(MeResponse {
            me: None,
            pull_requests: None,
        }));
    };

    let scope = origin.scope_for(Some(&user));
    let pull_requests = state.usecase.get_recent_pull_requests(&scope).await?;

    Ok(Json(MeResponse {
        me: Some(user.to_github_user()),
        pull_requests: Some(pull_requests),
    }))
}

pub async fn get_checklist(
    State(state): State<AppState>,
    origin: RequestOrigin,
    jar: PrivateCookieJar,
    query: Result<Query<ChecklistQuery>, QueryRejection>,
) -> Result<Json<ChecklistResponse>, AppError> {
    let user = require_user(&jar)?;
    let Query(query) = query.map_err(|e| AppError::Validation(e.body_text()))?;

    let scope = origin.scope_for(Some(&user));
    let checklist = state
        .usecase
        .get_checklist(&scope, &query.checklist_ref())
        .await?;

    Ok(Json(ChecklistResponse {
        checklist,
        me: user.to_github_user(),
    }))
}

#[tracing::instrument(skip_all)]
pub async fn add_check(
    State(state): State<AppState>,
    origin: RequestOrigin,
    jar: PrivateCookieJar,
    form: Result<Form<CheckForm>, FormRejection>,
) -> Result<Json<ChecklistResponse>, AppError> {
    let user = require_user(&jar)?;
    let Form(form) = form.map_err(|e| AppError::Validation(e.body_text()))?;
    tracing::debug!(?form, login = %user.login, "add check");

    let scope = origin.scope_for(Some(&user));
    let me = user.to_github_user();
    let checklist = state
        .usecase
        .add_check(&scope, &form.checklist_ref(), form.feature_number, &me)
        .await?;

    Ok(Json(ChecklistResponse { checklist, me }))
}

#[tracing::instrument(skip_all)]
pub async fn remove_check(
    State(state): State<AppState>,
    origin: RequestOrigin,
    jar: PrivateCookieJar,
    form: Result<Form<CheckForm>, FormRejection>,
) -> Result<Json<ChecklistResponse>, AppError> {
    let user = require_user(&jar)?;
    let Form(form) = form.map_err(|e| AppError::Validation(e.body_text()))?;
    tracing::debug!(?form, login = %user.login, "remove check");

    let scope = origin.scope_for(Some(&user));
    let me = user.to_github_user();
    let checklist = state
        .usecase
        .remove_check(&scope, &form.checklist_ref(), form.feature_number, &me)
        .await?;

    Ok(Json(ChecklistResponse { checklist, me }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stage_defaults() {
        let r = checklist_ref("motemen", "test", 1, "");
        assert_eq!(r, ChecklistRef::new("motemen", "test", 1, "default"));

        let r = checklist_ref("motemen", "test", 1, "qa");
        assert_eq!(r.stage, "qa");
    }

    #[test]
    fn test_check_form_field_names() {
        let form: CheckForm = serde_json::from_value(serde_json::json!({
            "owner": "o",
            "repo": "r",
            "number": 3,
            "featureNumber": 5,
        }))
        .unwrap();
        assert_eq!(form.feature_number, 5);
        assert_eq!(form.checklist_ref(), ChecklistRef::new("o", "r", 3, "default"));
    }
}
