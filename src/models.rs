use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Stage used when a request does not name one.
pub const DEFAULT_STAGE: &str = "default";

/// Channel name used by every notification event unless the config says otherwise.
pub const DEFAULT_CHANNEL: &str = "default";

/// Identifies one checklist: a base pull request at a given stage.
///
/// Feature pull request refs derived from merge commits carry an empty stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChecklistRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub stage: String,
}

impl ChecklistRef {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        number: u64,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
            stage: stage.into(),
        }
    }

    /// A feature pull request in the same repository as this ref.
    pub fn feature(&self, number: u64) -> Self {
        Self {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            number,
            stage: String::new(),
        }
    }

    /// A ref is usable as a storage key only with a non-zero number and a stage.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.number == 0 || self.stage.is_empty() {
            return Err(AppError::Validation(format!(
                "not a valid checklist reference: {:?}",
                self.to_string()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ChecklistRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}::{}", self.owner, self.repo, self.number, self.stage)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Commit {
    pub message: String,
    pub oid: String,
}

/// The login-only user attached to a pull request (author or first assignee).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GitHubUserSimple {
    pub login: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PullRequest {
    #[serde(rename = "URL")]
    pub url: String,
    pub title: String,
    pub body: String,
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub is_private: bool,
    pub user: GitHubUserSimple,

    // Filled only for base pull requests.
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(rename = "ConfigBlobID", default, skip_serializing_if = "Option::is_none")]
    pub config_blob_id: Option<String>,
}

/// A GitHub account known to the application.
///
/// The OAuth token is never serialized: API responses and repositories only
/// ever see the public fields.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubUser {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "Login")]
    pub login: String,
    #[serde(rename = "AvatarURL", default)]
    pub avatar_url: String,
    #[serde(skip)]
    pub token: Option<String>,
}

impl fmt::Debug for GitHubUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubUser")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("avatar_url", &self.avatar_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChecklistItem {
    #[serde(flatten)]
    pub pull_request: PullRequest,
    pub checked_by: Vec<GitHubUser>,
}

impl ChecklistItem {
    pub fn number(&self) -> u64 {
        self.pull_request.number
    }

    pub fn is_checked(&self) -> bool {
        !self.checked_by.is_empty()
    }
}

/// Read model assembled on every request; never persisted as a whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Checklist {
    #[serde(flatten)]
    pub pull_request: PullRequest,
    pub stage: String,
    pub items: Vec<ChecklistItem>,
    pub config: Option<ChecklistConfig>,
}

impl Checklist {
    pub fn item(&self, feature_number: u64) -> Option<&ChecklistItem> {
        self.items.iter().find(|item| item.number() == feature_number)
    }

    /// True when every item has at least one checker. An empty checklist is complete.
    pub fn completed(&self) -> bool {
        self.items.iter().all(ChecklistItem::is_checked)
    }

    pub fn authored_by(&self, login: &str) -> bool {
        self.items.iter().any(|item| item.pull_request.user.login == login)
    }

    /// True when every item authored by `login` has at least one checker.
    pub fn user_completed(&self, login: &str) -> bool {
        self.items
            .iter()
            .filter(|item| item.pull_request.user.login == login)
            .all(ChecklistItem::is_checked)
    }

    pub fn path(&self) -> String {
        let pr = &self.pull_request;
        let mut path = format!("/{}/{}/pull/{}", pr.owner, pr.repo, pr.number);
        if has_named_stage(&self.stage) {
            path.push('/');
            path.push_str(&self.stage);
        }
        path
    }

    /// Commit the completion status is attached to.
    pub fn last_commit_oid(&self) -> Option<&str> {
        self.pull_request.commits.last().map(|c| c.oid.as_str())
    }
}

impl fmt::Display for Checklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pr = &self.pull_request;
        write!(f, "{}/{}#{}", pr.owner, pr.repo, pr.number)?;
        if has_named_stage(&self.stage) {
            write!(f, "::{}", self.stage)?;
        }
        Ok(())
    }
}

fn has_named_stage(stage: &str) -> bool {
    !stage.is_empty() && stage != DEFAULT_STAGE
}

/// Persisted check state of one checklist: feature number (as string) to the
/// ids of users who checked it, in check order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checks(BTreeMap<String, Vec<u64>>);

impl Checks {
    pub fn key_for(feature_number: u64) -> String {
        feature_number.to_string()
    }

    pub fn get(&self, key: &str) -> &[u64] {
        self.0.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns whether the state changed.
    pub fn add(&mut self, key: &str, user: &GitHubUser) -> bool {
        let ids = self.0.entry(key.to_string()).or_default();
        if ids.contains(&user.id) {
            return false;
        }
        ids.push(user.id);
        true
    }

    /// Returns whether the state changed. Keys left without checkers are dropped.
    pub fn remove(&mut self, key: &str, user: &GitHubUser) -> bool {
        let Some(ids) = self.0.get_mut(key) else {
            return false;
        };
        let Some(pos) = ids.iter().position(|id| *id == user.id) else {
            return false;
        };
        ids.remove(pos);
        if ids.is_empty() {
            self.0.remove(key);
        }
        true
    }

    /// Distinct user ids across all items.
    pub fn user_ids(&self) -> BTreeSet<u64> {
        self.0.values().flatten().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Notification event classes, each routed through its own channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    OnCheck,
    OnRemove,
    OnComplete,
    OnUserComplete,
}

/// Contents of `prchecklist.yml` in the base pull request's head tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "PascalCase", deserialize = "snake_case"))]
pub struct ChecklistConfig {
    #[serde(default)]
    pub stages: Vec<String>,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "PascalCase", deserialize = "snake_case"))]
pub struct NotificationConfig {
    // Webhook URLs stay server-side.
    #[serde(default, skip_serializing)]
    pub channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "PascalCase", deserialize = "snake_case"))]
pub struct EventsConfig {
    #[serde(default)]
    pub on_check: Option<Vec<String>>,
    #[serde(default)]
    pub on_remove: Option<Vec<String>>,
    #[serde(default)]
    pub on_complete: Option<Vec<String>>,
    #[serde(default)]
    pub on_user_complete: Option<Vec<String>>,
}

impl ChecklistConfig {
    /// Parses a config blob. Unset event lists fall back to the default channel.
    pub fn parse(buf: &[u8]) -> Result<Self, serde_yaml::Error> {
        let mut config: ChecklistConfig = if buf.iter().all(u8::is_ascii_whitespace) {
            ChecklistConfig::default()
        } else {
            serde_yaml::from_slice(buf)?
        };

        let events = &mut config.notification.events;
        for list in [
            &mut events.on_check,
            &mut events.on_remove,
            &mut events.on_complete,
            &mut events.on_user_complete,
        ] {
            list.get_or_insert_with(|| vec![DEFAULT_CHANNEL.to_string()]);
        }

        Ok(config)
    }

    pub fn channels_for(&self, kind: EventKind) -> &[String] {
        let events = &self.notification.events;
        let list = match kind {
            EventKind::OnCheck => &events.on_check,
            EventKind::OnRemove => &events.on_remove,
            EventKind::OnComplete => &events.on_complete,
            EventKind::OnUserComplete => &events.on_user_complete,
        };
        list.as_deref().unwrap_or_default()
    }

    pub fn channel_url(&self, name: &str) -> Option<&str> {
        self.notification
            .channels
            .get(name)
            .map(|ch| ch.url.as_str())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChecklistResponse {
    pub checklist: Checklist,
    pub me: GitHubUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeResponse {
    pub me: Option<GitHubUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_requests: Option<BTreeMap<String, Vec<PullRequest>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64, login: &str) -> GitHubUser {
        GitHubUser {
            id,
            login: login.to_string(),
            ..Default::default()
        }
    }

    fn item(number: u64, author: &str) -> ChecklistItem {
        ChecklistItem {
            pull_request: PullRequest {
                number,
                user: GitHubUserSimple {
                    login: author.to_string(),
                },
                ..Default::default()
            },
            checked_by: Vec::new(),
        }
    }

    fn stub_checklist() -> Checklist {
        Checklist {
            pull_request: PullRequest {
                number: 1,
                owner: "motemen".to_string(),
                repo: "test".to_string(),
                ..Default::default()
            },
            stage: String::new(),
            items: vec![item(2, "alice"), item(3, "bob")],
            config: None,
        }
    }

    #[test]
    fn test_checklist_ref_string() {
        let r = ChecklistRef::new("motemen", "test", 1, "qa");
        assert_eq!(r.to_string(), "motemen/test#1::qa");
    }

    #[test]
    fn test_checklist_ref_validate() {
        assert!(ChecklistRef::new("o", "r", 1, "default").validate().is_ok());
        assert!(matches!(
            ChecklistRef::new("o", "r", 0, "default").validate(),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            ChecklistRef::new("o", "r", 1, "").validate(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_feature_ref_inherits_repo_without_stage() {
        let base = ChecklistRef::new("o", "r", 1, "qa");
        assert_eq!(base.feature(7), ChecklistRef::new("o", "r", 7, ""));
    }

    #[test]
    fn test_checklist_completed() {
        let mut checklist = stub_checklist();
        assert!(!checklist.completed());

        checklist.items[0].checked_by.push(user(1, "u1"));
        assert!(!checklist.completed());

        checklist.items[0].checked_by.push(user(2, "u2"));
        assert!(!checklist.completed());

        checklist.items[1].checked_by.push(user(1, "u1"));
        assert!(checklist.completed());
    }

    #[test]
    fn test_empty_checklist_is_completed() {
        let mut checklist = stub_checklist();
        checklist.items.clear();
        assert!(checklist.completed());
    }

    #[test]
    fn test_checklist_user_completed() {
        let mut checklist = stub_checklist();
        checklist.items.push(item(4, "alice"));

        assert!(checklist.authored_by("alice"));
        assert!(!checklist.authored_by("carol"));

        checklist.items[0].checked_by.push(user(9, "bob"));
        assert!(!checklist.user_completed("alice"));

        checklist.items[2].checked_by.push(user(9, "bob"));
        assert!(checklist.user_completed("alice"));
        assert!(!checklist.user_completed("bob"));
    }

    #[test]
    fn test_checklist_item() {
        let checklist = stub_checklist();
        assert!(checklist.item(1).is_none());
        assert_eq!(checklist.item(2).map(ChecklistItem::number), Some(2));
        assert!(checklist.item(100).is_none());
    }

    #[test]
    fn test_checklist_path_and_label() {
        let mut checklist = stub_checklist();
        assert_eq!(checklist.path(), "/motemen/test/pull/1");
        assert_eq!(checklist.to_string(), "motemen/test#1");

        checklist.stage = DEFAULT_STAGE.to_string();
        assert_eq!(checklist.path(), "/motemen/test/pull/1");

        checklist.stage = "production".to_string();
        assert_eq!(checklist.path(), "/motemen/test/pull/1/production");
        assert_eq!(checklist.to_string(), "motemen/test#1::production");
    }

    #[test]
    fn test_checks_add_is_idempotent() {
        let mut checks = Checks::default();
        let u = user(1, "u1");

        assert!(checks.add("2", &u));
        assert!(!checks.add("2", &u));
        assert_eq!(checks.get("2"), &[1]);

        assert!(checks.add("2", &user(5, "u5")));
        assert_eq!(checks.get("2"), &[1, 5]);
    }

    #[test]
    fn test_checks_remove_restores_prior_state() {
        let mut checks = Checks::default();
        checks.add("2", &user(3, "u3"));
        let before = checks.clone();

        let u = user(1, "u1");
        assert!(checks.add("2", &u));
        assert!(checks.remove("2", &u));
        assert_eq!(checks, before);

        assert!(checks.add("4", &u));
        assert!(checks.remove("4", &u));
        assert_eq!(checks, before);
        assert!(!checks.remove("4", &u));
    }

    #[test]
    fn test_checks_json_layout() {
        let mut checks = Checks::default();
        checks.add("2", &user(1, "u1"));
        checks.add("2", &user(7, "u7"));
        checks.add("10", &user(7, "u7"));

        let json = serde_json::to_string(&checks).unwrap();
        assert_eq!(json, r#"{"10":[7],"2":[1,7]}"#);
        assert_eq!(checks.user_ids().into_iter().collect::<Vec<_>>(), vec![1, 7]);

        let decoded: Checks = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, checks);
    }

    #[test]
    fn test_user_token_is_not_serialized() {
        let u = GitHubUser {
            id: 1,
            login: "u1".to_string(),
            avatar_url: "https://example.com/a.png".to_string(),
            token: Some("secret".to_string()),
        };
        let json = serde_json::to_value(&u).unwrap();
        assert_eq!(json["ID"], 1);
        assert_eq!(json["Login"], "u1");
        assert!(!json.to_string().contains("secret"));
        assert!(!format!("{u:?}").contains("secret"));
    }

    #[test]
    fn test_config_defaults() {
        let config = ChecklistConfig::parse(b"stages:\n  - qa\n  - production\n").unwrap();
        assert_eq!(config.stages, vec!["qa", "production"]);
        for kind in [
            EventKind::OnCheck,
            EventKind::OnRemove,
            EventKind::OnComplete,
            EventKind::OnUserComplete,
        ] {
            assert_eq!(config.channels_for(kind), &["default".to_string()]);
        }
    }

    #[test]
    fn test_config_channels_and_events() {
        let yaml = r#"
notification:
  channels:
    default:
      url: https://hooks.example.com/default
    qa:
      url: https://hooks.example.com/qa
  events:
    on_check:
      - qa
    on_complete:
      - default
      - qa
    on_remove: []
"#;
        let config = ChecklistConfig::parse(yaml.as_bytes()).unwrap();
        assert_eq!(config.channels_for(EventKind::OnCheck), &["qa".to_string()]);
        assert_eq!(config.channels_for(EventKind::OnComplete).len(), 2);
        assert!(config.channels_for(EventKind::OnRemove).is_empty());
        assert_eq!(
            config.channel_url("qa"),
            Some("https://hooks.example.com/qa")
        );
        assert_eq!(config.channel_url("missing"), None);

        let json = serde_json::to_value(&config).unwrap();
        assert!(json["Notification"].get("Channels").is_none());
        assert_eq!(json["Notification"]["Events"]["OnCheck"][0], "qa");
    }

    #[test]
    fn test_config_empty_blob() {
        let config = ChecklistConfig::parse(b"\n").unwrap();
        assert!(config.stages.is_empty());
        assert_eq!(config.channels_for(EventKind::OnCheck), &["default".to_string()]);
    }

    #[test]
    fn test_config_malformed_yaml() {
        assert!(ChecklistConfig::parse(b"stages: [unterminated").is_err());
    }

    #[test]
    fn test_checklist_json_flattens_pull_request() {
        let mut checklist = stub_checklist();
        checklist.items[0].checked_by.push(user(1, "u1"));
        let json = serde_json::to_value(&checklist).unwrap();

        assert_eq!(json["Number"], 1);
        assert_eq!(json["Owner"], "motemen");
        assert_eq!(json["Items"][0]["Number"], 2);
        assert_eq!(json["Items"][0]["CheckedBy"][0]["Login"], "u1");
        assert_eq!(json["Items"][0]["User"]["Login"], "alice");
        assert!(json["Config"].is_null());
    }
}
