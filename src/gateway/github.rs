use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::cache::TtlCache;
use super::{CommitStatus, GitHubGateway, OAuthGateway};
use crate::error::AppError;
use crate::models::{ChecklistRef, Commit, GitHubUser, GitHubUserSimple, PullRequest};
use crate::scope::RequestScope;

const USER_AGENT: &str = "prchecklist";
const ACCEPT: &str = "application/vnd.github+json";

const CONFIG_FILE_NAME: &str = "prchecklist.yml";

const CACHE_TTL_BASE_PULL_REQUEST: Duration = Duration::from_secs(30);
const CACHE_TTL_FEATURE_PULL_REQUEST: Duration = Duration::from_secs(5 * 60);

const PULL_REQUEST_QUERY: &str = r#"
query ($owner: String!, $repo: String!, $number: Int!, $isBase: Boolean!, $commitsAfter: String) {
  repository(owner: $owner, name: $repo) {
    isPrivate
    pullRequest(number: $number) {
      title
      number
      body
      url
      author { login }
      assignees(first: 1) { edges { node { login } } }
      baseRef { name }
      headRef @include(if: $isBase) {
        target {
          ... on Commit {
            tree { entries { name oid type } }
          }
        }
      }
      commits(first: 100, after: $commitsAfter) @include(if: $isBase) {
        edges { node { commit { message oid } } }
        pageInfo { hasNextPage endCursor }
        totalCount
      }
    }
  }
}
"#;

const RECENT_PULL_REQUESTS_QUERY: &str = r#"
query {
  viewer {
    repositories(first: 10, orderBy: {field: PUSHED_AT, direction: DESC}, affiliations: [OWNER, ORGANIZATION_MEMBER, COLLABORATOR]) {
      edges {
        node {
          nameWithOwner
          pullRequests(first: 5, orderBy: {field: UPDATED_AT, direction: DESC}, baseRefName: "master") {
            edges { node { title number url } }
          }
        }
      }
    }
  }
}
"#;

/// Where the GitHub APIs and the OAuth pages live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubEndpoints {
    /// REST API root, without a trailing slash.
    pub api_base: String,
    pub graphql: String,
    /// Web root serving `/login/oauth/*`, without a trailing slash.
    pub web_base: String,
}

impl GitHubEndpoints {
    /// Endpoints for `github.com` or a GitHub Enterprise host.
    pub fn for_domain(domain: &str) -> Self {
        if domain == "github.com" {
            Self {
                api_base: "https://api.github.com".to_string(),
                graphql: "https://api.github.com/graphql".to_string(),
                web_base: "https://github.com".to_string(),
            }
        } else {
            Self {
                api_base: format!("https://{domain}/api/v3"),
                graphql: format!("https://{domain}/api/graphql"),
                web_base: format!("https://{domain}"),
            }
        }
    }
}

#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// [`GitHubGateway`] and [`OAuthGateway`] over the GitHub GraphQL and REST APIs.
///
/// Pull requests are cached briefly; base pull requests of private
/// repositories are never cached so that every visitor's access is checked
/// against GitHub. Blobs are content-addressed and cached forever.
pub struct HttpGitHubGateway {
    client: Client,
    endpoints: GitHubEndpoints,
    oauth: OAuthCredentials,
    pull_requests: TtlCache<PullRequest>,
    blobs: TtlCache<Vec<u8>>,
}

impl HttpGitHubGateway {
    pub fn new(client: Client, endpoints: GitHubEndpoints, oauth: OAuthCredentials) -> Self {
        Self {
            client,
            endpoints,
            oauth,
            pull_requests: TtlCache::new(),
            blobs: TtlCache::new(),
        }
    }

    fn request(&self, req: RequestBuilder, scope: &RequestScope) -> RequestBuilder {
        let req = req.header("User-Agent", USER_AGENT).header("Accept", ACCEPT);
        match &scope.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn query_graphql<T: DeserializeOwned>(
        &self,
        scope: &RequestScope,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, AppError> {
        let resp = self
            .request(self.client.post(&self.endpoints.graphql), scope)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("failed to send GraphQL query")
            .map_err(AppError::Upstream)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(anyhow::anyhow!(
                "GitHub GraphQL error {status}: {body}"
            )));
        }

        let result: GraphQLResult<T> = resp
            .json()
            .await
            .context("failed to parse GraphQL response")
            .map_err(AppError::Upstream)?;

        if !result.errors.is_empty() {
            let messages: Vec<&str> = result.errors.iter().map(|e| e.message.as_str()).collect();
            if result
                .errors
                .iter()
                .any(|e| e.kind.as_deref() == Some("NOT_FOUND"))
            {
                return Err(AppError::NotFound(messages.join("; ")));
            }
            return Err(AppError::Upstream(anyhow::anyhow!(
                "GraphQL error: {}",
                messages.join("; ")
            )));
        }

        result
            .data
            .ok_or_else(|| AppError::Upstream(anyhow::anyhow!("GraphQL response without data")))
    }

    async fn fetch_pull_request(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
        is_base: bool,
    ) -> Result<PullRequest, AppError> {
        let mut commits_after: Option<String> = None;
        let mut pull_request: Option<PullRequest> = None;

        loop {
            let data: PullRequestData = self
                .query_graphql(
                    scope,
                    PULL_REQUEST_QUERY,
                    json!({
                        "owner": cl_ref.owner,
                        "repo": cl_ref.repo,
                        "number": cl_ref.number,
                        "isBase": is_base,
                        "commitsAfter": commits_after.as_deref(),
                    }),
                )
                .await?;

            let repository = data.repository.ok_or_else(|| {
                AppError::NotFound(format!("repository {}/{}", cl_ref.owner, cl_ref.repo))
            })?;
            let node = repository.pull_request.ok_or_else(|| {
                AppError::NotFound(format!(
                    "pull request {}/{}#{}",
                    cl_ref.owner, cl_ref.repo, cl_ref.number
                ))
            })?;

            let page = node.commits.as_ref().map(|c| c.page_info.clone());
            let commits = node
                .commits
                .as_ref()
                .map(|c| {
                    c.edges
                        .iter()
                        .map(|e| Commit {
                            message: e.node.commit.message.clone(),
                            oid: e.node.commit.oid.clone(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            match pull_request.as_mut() {
                Some(pr) => pr.commits.extend(commits),
                None => {
                    let mut pr = node.into_pull_request(cl_ref, repository.is_private);
                    pr.commits = commits;
                    pull_request = Some(pr);
                }
            }

            match page {
                Some(PageInfo {
                    has_next_page: true,
                    end_cursor: Some(cursor),
                }) => {
                    tracing::debug!(pull_request = %cl_ref, cursor = %cursor, "fetching next commits page");
                    commits_after = Some(cursor);
                }
                _ => break,
            }
        }

        pull_request
            .ok_or_else(|| AppError::Upstream(anyhow::anyhow!("could not retrieve pull request")))
    }

    async fn fetch_blob(&self, scope: &RequestScope, cl_ref: &ChecklistRef, sha: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/repos/{}/{}/git/blobs/{sha}",
            self.endpoints.api_base, cl_ref.owner, cl_ref.repo
        );
        let resp = self
            .request(self.client.get(&url), scope)
            .send()
            .await
            .context("failed to fetch blob")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error {status} fetching blob {sha}: {body}");
        }

        let blob: Blob = resp.json().await.context("failed to parse blob")?;
        if blob.encoding != "base64" {
            anyhow::bail!("unknown blob encoding: {:?}", blob.encoding);
        }

        let content: String = blob.content.split_whitespace().collect();
        base64::engine::general_purpose::STANDARD
            .decode(content)
            .context("failed to decode blob content")
    }

    async fn post_status(&self, scope: &RequestScope, status: &CommitStatus) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.endpoints.api_base, status.owner, status.repo, status.sha
        );
        let resp = self
            .request(self.client.post(&url), scope)
            .json(&json!({
                "state": status.state,
                "target_url": status.target_url,
                "context": status.context,
            }))
            .send()
            .await
            .context("failed to post commit status")?;

        let code = resp.status();
        if !code.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "GitHub API error {code} setting status on {}/{}@{}: {body}",
                status.owner,
                status.repo,
                status.sha
            );
        }
        Ok(())
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let url = format!("{}/login/oauth/access_token", self.endpoints.web_base);
        let resp = self
            .client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.oauth.client_id.as_str()),
                ("client_secret", self.oauth.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .context("failed to exchange OAuth code")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitHub OAuth error {status}: {body}");
        }

        let token: AccessToken = resp.json().await.context("failed to parse OAuth token")?;
        match (token.access_token, token.error) {
            (Some(access_token), _) if !access_token.is_empty() => Ok(access_token),
            (_, Some(error)) => anyhow::bail!(
                "GitHub OAuth error {error}: {}",
                token.error_description.unwrap_or_default()
            ),
            _ => anyhow::bail!("GitHub OAuth response without access_token"),
        }
    }

    async fn fetch_viewer(&self, token: &str) -> Result<GitHubUser> {
        let url = format!("{}/user", self.endpoints.api_base);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", ACCEPT)
            .send()
            .await
            .context("failed to fetch authenticated user")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GitHub API error {status} fetching user: {body}");
        }

        let user: RestUser = resp.json().await.context("failed to parse user")?;
        Ok(GitHubUser {
            id: user.id,
            login: user.login,
            avatar_url: user.avatar_url,
            token: Some(token.to_string()),
        })
    }
}

fn pull_request_cache_key(cl_ref: &ChecklistRef, is_base: bool) -> String {
    format!(
        "pull_request\0{}/{}#{}\0{is_base}",
        cl_ref.owner, cl_ref.repo, cl_ref.number
    )
}

#[async_trait]
impl GitHubGateway for HttpGitHubGateway {
    async fn get_blob(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
        sha: &str,
    ) -> Result<Vec<u8>, AppError> {
        let key = format!("blob\0{}/{}\0{sha}", cl_ref.owner, cl_ref.repo);
        if let Some(blob) = self.blobs.get(&key) {
            return Ok(blob);
        }

        let blob = self
            .fetch_blob(scope, cl_ref, sha)
            .await
            .map_err(AppError::Upstream)?;
        self.blobs.insert(key, blob.clone(), None);
        Ok(blob)
    }

    async fn get_pull_request(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
        is_base: bool,
    ) -> Result<PullRequest, AppError> {
        let key = pull_request_cache_key(cl_ref, is_base);
        if let Some(pr) = self.pull_requests.get(&key) {
            tracing::debug!(pull_request = %cl_ref, is_base, "pull request cache hit");
            return Ok(pr);
        }

        let pr = self.fetch_pull_request(scope, cl_ref, is_base).await?;
        if is_base && pr.is_private {
            return Ok(pr);
        }

        let ttl = if is_base {
            CACHE_TTL_BASE_PULL_REQUEST
        } else {
            CACHE_TTL_FEATURE_PULL_REQUEST
        };
        self.pull_requests.insert(key, pr.clone(), Some(ttl));
        Ok(pr)
    }

    async fn get_recent_pull_requests(
        &self,
        scope: &RequestScope,
    ) -> Result<BTreeMap<String, Vec<PullRequest>>, AppError> {
        let data: RecentPullRequestsData = self
            .query_graphql(scope, RECENT_PULL_REQUESTS_QUERY, json!({}))
            .await?;

        let mut result = BTreeMap::new();
        for edge in data.viewer.repositories.edges {
            let repo = edge.node;
            if repo.pull_requests.edges.is_empty() {
                continue;
            }
            let (owner, name) = repo
                .name_with_owner
                .split_once('/')
                .unwrap_or(("", repo.name_with_owner.as_str()));
            let pull_requests = repo
                .pull_requests
                .edges
                .iter()
                .map(|e| PullRequest {
                    url: e.node.url.clone(),
                    title: e.node.title.clone(),
                    owner: owner.to_string(),
                    repo: name.to_string(),
                    number: e.node.number,
                    ..Default::default()
                })
                .collect();
            result.insert(repo.name_with_owner.clone(), pull_requests);
        }
        Ok(result)
    }

    async fn set_repository_status_as(
        &self,
        scope: &RequestScope,
        status: &CommitStatus,
    ) -> Result<(), AppError> {
        self.post_status(scope, status)
            .await
            .map_err(AppError::Upstream)
    }
}

#[async_trait]
impl OAuthGateway for HttpGitHubGateway {
    fn auth_code_url(&self, state: &str, redirect_uri: Option<&Url>) -> Result<Url, AppError> {
        let base = format!("{}/login/oauth/authorize", self.endpoints.web_base);
        let mut params = vec![
            ("client_id", self.oauth.client_id.clone()),
            ("response_type", "code".to_string()),
            ("scope", "repo".to_string()),
            ("state", state.to_string()),
        ];
        if let Some(uri) = redirect_uri {
            params.push(("redirect_uri", uri.to_string()));
        }
        Url::parse_with_params(&base, &params)
            .with_context(|| format!("invalid OAuth authorize URL {base:?}"))
            .map_err(AppError::Internal)
    }

    async fn authenticate_user(&self, code: &str) -> Result<GitHubUser, AppError> {
        let token = self.exchange_code(code).await.map_err(AppError::Upstream)?;
        let user = self.fetch_viewer(&token).await.map_err(AppError::Upstream)?;
        tracing::info!(login = %user.login, id = user.id, "authenticated GitHub user");
        Ok(user)
    }
}

// GitHub wire types

#[derive(Debug, Deserialize)]
struct GraphQLResult<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestData {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    is_private: bool,
    pull_request: Option<PullRequestNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    title: String,
    #[serde(default)]
    body: String,
    url: String,
    author: Option<Login>,
    #[serde(default)]
    assignees: Connection<Login>,
    head_ref: Option<HeadRef>,
    commits: Option<CommitConnection>,
}

impl PullRequestNode {
    fn into_pull_request(self, cl_ref: &ChecklistRef, is_private: bool) -> PullRequest {
        // An assignee, when present, is who the item is attributed to.
        let login = self
            .assignees
            .edges
            .into_iter()
            .next()
            .map(|e| e.node.login)
            .or(self.author.map(|a| a.login))
            .unwrap_or_default();

        let config_blob_id = self.head_ref.and_then(|head| {
            head.target?
                .tree?
                .entries
                .into_iter()
                .find(|e| e.name == CONFIG_FILE_NAME && e.kind == "blob")
                .map(|e| e.oid)
        });

        PullRequest {
            url: self.url,
            title: self.title,
            body: self.body,
            owner: cl_ref.owner.clone(),
            repo: cl_ref.repo.clone(),
            number: cl_ref.number,
            is_private,
            user: GitHubUserSimple { login },
            commits: Vec::new(),
            config_blob_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self { edges: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    target: Option<HeadTarget>,
}

#[derive(Debug, Deserialize)]
struct HeadTarget {
    tree: Option<Tree>,
}

#[derive(Debug, Deserialize)]
struct Tree {
    #[serde(default)]
    entries: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    name: String,
    oid: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitConnection {
    #[serde(default)]
    edges: Vec<Edge<CommitNode>>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct CommitNode {
    commit: CommitFields,
}

#[derive(Debug, Deserialize)]
struct CommitFields {
    message: String,
    oid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecentPullRequestsData {
    viewer: Viewer,
}

#[derive(Debug, Deserialize)]
struct Viewer {
    repositories: Connection<RecentRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentRepository {
    name_with_owner: String,
    #[serde(default)]
    pull_requests: Connection<RecentPullRequest>,
}

#[derive(Debug, Deserialize)]
struct RecentPullRequest {
    title: String,
    number: u64,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Blob {
    content: String,
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestUser {
    id: u64,
    login: String,
    #[serde(default)]
    avatar_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> HttpGitHubGateway {
        HttpGitHubGateway::new(
            Client::new(),
            GitHubEndpoints {
                api_base: server.uri(),
                graphql: format!("{}/graphql", server.uri()),
                web_base: server.uri(),
            },
            OAuthCredentials {
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
            },
        )
    }

    fn scope() -> RequestScope {
        RequestScope::new(
            Some("visitor-token".to_string()),
            Url::parse("http://localhost:7888").unwrap(),
        )
    }

    fn commit_edges(range: std::ops::Range<u64>) -> Vec<serde_json::Value> {
        range
            .map(|n| {
                json!({ "node": { "commit": {
                    "message": format!("Merge pull request #{n} from feature/{n}\n\nfeature {n}"),
                    "oid": format!("sha{n}"),
                }}})
            })
            .collect()
    }

    fn base_pull_request_response(
        is_private: bool,
        edges: Vec<serde_json::Value>,
        next: Option<&str>,
    ) -> serde_json::Value {
        json!({
            "data": { "repository": {
                "isPrivate": is_private,
                "pullRequest": {
                    "title": "Release",
                    "number": 1,
                    "body": "",
                    "url": "https://github.com/motemen/test/pull/1",
                    "author": { "login": "motemen" },
                    "assignees": { "edges": [] },
                    "baseRef": { "name": "master" },
                    "headRef": { "target": { "tree": { "entries": [
                        { "name": "README.md", "oid": "readme-oid", "type": "blob" },
                        { "name": "prchecklist.yml", "oid": "config-oid", "type": "blob" },
                    ]}}},
                    "commits": {
                        "edges": edges,
                        "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next },
                        "totalCount": 0,
                    },
                }
            }}
        })
    }

    #[test]
    fn test_endpoints_for_domain() {
        let public = GitHubEndpoints::for_domain("github.com");
        assert_eq!(public.graphql, "https://api.github.com/graphql");
        assert_eq!(public.web_base, "https://github.com");

        let enterprise = GitHubEndpoints::for_domain("ghe.example.com");
        assert_eq!(enterprise.api_base, "https://ghe.example.com/api/v3");
        assert_eq!(enterprise.graphql, "https://ghe.example.com/api/graphql");
    }

    #[tokio::test]
    async fn test_get_pull_request_paginates_commits() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer visitor-token"))
            .and(body_partial_json(json!({ "variables": { "commitsAfter": null } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(base_pull_request_response(
                false,
                commit_edges(2..102),
                Some("cursor-1"),
            )))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "variables": { "commitsAfter": "cursor-1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(base_pull_request_response(
                false,
                commit_edges(102..105),
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server);
        let cl_ref = ChecklistRef::new("motemen", "test", 1, "default");
        let pr = gw.get_pull_request(&scope(), &cl_ref, true).await.unwrap();

        assert_eq!(pr.commits.len(), 103);
        assert_eq!(pr.commits[0].oid, "sha2");
        assert_eq!(pr.commits[102].oid, "sha104");
        assert_eq!(pr.config_blob_id.as_deref(), Some("config-oid"));
        assert_eq!(pr.user.login, "motemen");
        assert_eq!(pr.owner, "motemen");
        assert_eq!(pr.number, 1);

        // Served from cache, the mocks expect a single call each.
        let again = gw.get_pull_request(&scope(), &cl_ref, true).await.unwrap();
        assert_eq!(again, pr);
    }

    #[tokio::test]
    async fn test_private_base_pull_request_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(base_pull_request_response(
                true,
                Vec::new(),
                None,
            )))
            .expect(2)
            .mount(&server)
            .await;

        let gw = gateway(&server);
        let cl_ref = ChecklistRef::new("motemen", "secret", 1, "default");
        assert!(gw.get_pull_request(&scope(), &cl_ref, true).await.unwrap().is_private);
        assert!(gw.get_pull_request(&scope(), &cl_ref, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_feature_pull_request_prefers_assignee() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "variables": { "isBase": false, "number": 2 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "repository": {
                    "isPrivate": false,
                    "pullRequest": {
                        "title": "feature-2",
                        "number": 2,
                        "body": "",
                        "url": "https://github.com/motemen/test/pull/2",
                        "author": { "login": "author" },
                        "assignees": { "edges": [{ "node": { "login": "assignee" } }] },
                        "baseRef": { "name": "develop" },
                    }
                }}
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server);
        let pr = gw
            .get_pull_request(&scope(), &ChecklistRef::new("motemen", "test", 2, ""), false)
            .await
            .unwrap();
        assert_eq!(pr.user.login, "assignee");
        assert!(pr.commits.is_empty());
        assert_eq!(pr.config_blob_id, None);
    }

    #[tokio::test]
    async fn test_graphql_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "variables": { "number": 404 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "repository": { "isPrivate": false, "pullRequest": null } },
                "errors": [{ "type": "NOT_FOUND", "message": "Could not resolve to a PullRequest" }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "variables": { "number": 500 } })))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let gw = gateway(&server);
        assert!(matches!(
            gw.get_pull_request(&scope(), &ChecklistRef::new("o", "r", 404, "default"), true)
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            gw.get_pull_request(&scope(), &ChecklistRef::new("o", "r", 500, "default"), true)
                .await,
            Err(AppError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_get_blob_decodes_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/motemen/test/git/blobs/config-oid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "c3RhZ2Vz\nOiBbcWFd\n",
                "encoding": "base64",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server);
        let cl_ref = ChecklistRef::new("motemen", "test", 1, "default");
        let blob = gw.get_blob(&scope(), &cl_ref, "config-oid").await.unwrap();
        assert_eq!(blob, b"stages: [qa]");
        assert_eq!(gw.get_blob(&scope(), &cl_ref, "config-oid").await.unwrap(), blob);
    }

    #[tokio::test]
    async fn test_get_recent_pull_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("viewer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "viewer": { "repositories": { "edges": [
                    { "node": { "nameWithOwner": "motemen/test", "pullRequests": { "edges": [
                        { "node": { "title": "Release", "number": 3, "url": "https://github.com/motemen/test/pull/3" } },
                    ]}}},
                    { "node": { "nameWithOwner": "motemen/empty", "pullRequests": { "edges": [] } } },
                ]}}}
            })))
            .mount(&server)
            .await;

        let recent = gateway(&server)
            .get_recent_pull_requests(&scope())
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        let prs = &recent["motemen/test"];
        assert_eq!(prs[0].number, 3);
        assert_eq!(prs[0].owner, "motemen");
        assert_eq!(prs[0].repo, "test");
    }

    #[tokio::test]
    async fn test_set_repository_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/motemen/test/statuses/sha9"))
            .and(body_partial_json(json!({
                "state": "success",
                "context": "prchecklist/qa/completed",
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let status = CommitStatus {
            owner: "motemen".to_string(),
            repo: "test".to_string(),
            sha: "sha9".to_string(),
            context: "prchecklist/qa/completed".to_string(),
            state: "success".to_string(),
            target_url: "http://localhost:7888/motemen/test/pull/1/qa".to_string(),
        };
        gateway(&server)
            .set_repository_status_as(&scope(), &status)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_oauth_flow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "gho_token",
                "token_type": "bearer",
                "scope": "repo",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer gho_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "login": "motemen",
                "avatar_url": "https://avatars.example.com/42",
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server);
        let redirect = Url::parse("http://localhost:7888/auth/callback?return_to=%2F").unwrap();
        let url = gw.auth_code_url("state-1", Some(&redirect)).unwrap();
        assert_eq!(url.path(), "/login/oauth/authorize");
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["state"], "state-1");
        assert_eq!(params["scope"], "repo");
        assert_eq!(params["redirect_uri"], redirect.as_str());

        let user = gw.authenticate_user("the-code").await.unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.login, "motemen");
        assert_eq!(user.token.as_deref(), Some("gho_token"));
    }

    #[tokio::test]
    async fn test_oauth_error_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired.",
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            gateway(&server).authenticate_user("stale").await,
            Err(AppError::Upstream(_))
        ));
    }
}
