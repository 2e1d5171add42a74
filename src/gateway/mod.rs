//! Access to GitHub (or a GitHub Enterprise instance).

pub mod cache;
pub mod github;

use std::collections::BTreeMap;

use async_trait::async_trait;
use url::Url;

use crate::error::AppError;
use crate::models::{ChecklistRef, GitHubUser, PullRequest};
use crate::scope::RequestScope;

pub use github::{GitHubEndpoints, HttpGitHubGateway, OAuthCredentials};

/// A commit status to attach to a repository commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    pub owner: String,
    pub repo: String,
    pub sha: String,
    pub context: String,
    pub state: String,
    pub target_url: String,
}

/// Repository reads and writes made on behalf of the visitor in `scope`.
#[async_trait]
pub trait GitHubGateway: Send + Sync {
    /// Raw contents of the blob `sha` in the repository of `cl_ref`.
    async fn get_blob(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
        sha: &str,
    ) -> Result<Vec<u8>, AppError>;

    /// Fetches a pull request. Commits and the config blob id are only
    /// filled when `is_base` is set.
    async fn get_pull_request(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
        is_base: bool,
    ) -> Result<PullRequest, AppError>;

    /// Recently updated pull requests of the visitor, keyed by `owner/repo`.
    async fn get_recent_pull_requests(
        &self,
        scope: &RequestScope,
    ) -> Result<BTreeMap<String, Vec<PullRequest>>, AppError>;

    async fn set_repository_status_as(
        &self,
        scope: &RequestScope,
        status: &CommitStatus,
    ) -> Result<(), AppError>;
}

/// The OAuth web flow.
#[async_trait]
pub trait OAuthGateway: Send + Sync {
    /// Authorization page URL the visitor is redirected to.
    fn auth_code_url(&self, state: &str, redirect_uri: Option<&Url>) -> Result<Url, AppError>;

    /// Exchanges an authorization code for a token and resolves its owner.
    /// The returned user carries the token.
    async fn authenticate_user(&self, code: &str) -> Result<GitHubUser, AppError>;
}
