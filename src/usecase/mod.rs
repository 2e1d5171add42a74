//! The checklist use cases: assembling a checklist from GitHub and the
//! repository, and checking items off.

pub mod notification;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};

use futures::future::try_join_all;
use regex::Regex;

use crate::error::AppError;
use crate::gateway::GitHubGateway;
use crate::models::{Checklist, ChecklistConfig, ChecklistItem, ChecklistRef, Checks, GitHubUser, PullRequest};
use crate::repository::CoreRepository;
use crate::scope::RequestScope;
use crate::sinks::WebhookSink;
use crate::tasks::TaskSpawner;

pub use notification::{NotificationEvent, Notifier};

static MERGE_COMMIT_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\AMerge pull request #(\d+) ").expect("merge commit pattern is valid")
});

pub struct Usecase {
    github: Arc<dyn GitHubGateway>,
    repo: Arc<dyn CoreRepository>,
    notifier: Notifier,
    spawner: Arc<dyn TaskSpawner>,
}

impl Usecase {
    pub fn new(
        github: Arc<dyn GitHubGateway>,
        repo: Arc<dyn CoreRepository>,
        sink: Arc<dyn WebhookSink>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            notifier: Notifier::new(github.clone(), sink),
            github,
            repo,
            spawner,
        }
    }

    /// Assembles the checklist pointed by `cl_ref`.
    ///
    /// Feature pull requests and the config are fetched concurrently; the
    /// first failure aborts the rest and no partial checklist is returned.
    pub async fn get_checklist(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
    ) -> Result<Checklist, AppError> {
        cl_ref.validate()?;

        let base = self.github.get_pull_request(scope, cl_ref, true).await?;
        let refs = merged_pull_request_refs(&base);

        let features = try_join_all(
            refs.iter()
                .map(|feature_ref| self.github.get_pull_request(scope, feature_ref, false)),
        );
        let config = async {
            let Some(blob_id) = base.config_blob_id.as_deref() else {
                return Ok::<_, AppError>(None);
            };
            let buf = self.github.get_blob(scope, cl_ref, blob_id).await?;
            Ok(Some(ChecklistConfig::parse(&buf)?))
        };
        let (features, config) = tokio::try_join!(features, config)?;

        let checks = self.repo.get_checks(cl_ref).await?;
        tracing::debug!(checklist = %cl_ref, checks = checks.len(), "loaded checks");

        let user_ids: Vec<u64> = checks.user_ids().into_iter().collect();
        let users = if user_ids.is_empty() {
            Default::default()
        } else {
            self.repo.get_users(&user_ids).await?
        };

        let items = features
            .into_iter()
            .map(|pull_request| {
                let checked_by = checks
                    .get(&Checks::key_for(pull_request.number))
                    .iter()
                    .filter_map(|id| users.get(id).cloned())
                    .collect();
                ChecklistItem {
                    pull_request,
                    checked_by,
                }
            })
            .collect();

        Ok(Checklist {
            pull_request: base,
            stage: cl_ref.stage.clone(),
            items,
            config,
        })
    }

    /// Records a check of `user` on the feature pull request `feature_number`
    /// and returns the updated checklist. Notifications are sent in the
    /// background.
    pub async fn add_check(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
        feature_number: u64,
        user: &GitHubUser,
    ) -> Result<Checklist, AppError> {
        cl_ref.validate()?;
        self.repo
            .add_check(cl_ref, &Checks::key_for(feature_number), user)
            .await?;

        let checklist = self.get_checklist(scope, cl_ref).await?;
        tracing::info!(checklist = %checklist, feature = feature_number, user = %user.login, "check added");

        let mut events = Vec::new();
        match checklist.item(feature_number) {
            Some(item) => events.push(NotificationEvent::AddCheck {
                item: item.clone(),
                user: user.clone(),
            }),
            None => tracing::warn!(
                checklist = %checklist,
                feature = feature_number,
                "checked item is not part of the checklist"
            ),
        }
        if checklist.authored_by(&user.login) && checklist.user_completed(&user.login) {
            events.push(NotificationEvent::UserComplete { user: user.clone() });
        }
        if checklist.completed() {
            events.push(NotificationEvent::Complete);
        }

        self.schedule_notifications(scope, &checklist, events);
        Ok(checklist)
    }

    /// Removes a check of `user`; the counterpart of [`Usecase::add_check`].
    pub async fn remove_check(
        &self,
        scope: &RequestScope,
        cl_ref: &ChecklistRef,
        feature_number: u64,
        user: &GitHubUser,
    ) -> Result<Checklist, AppError> {
        cl_ref.validate()?;
        self.repo
            .remove_check(cl_ref, &Checks::key_for(feature_number), user)
            .await?;

        let checklist = self.get_checklist(scope, cl_ref).await?;
        tracing::info!(checklist = %checklist, feature = feature_number, user = %user.login, "check removed");

        let mut events = Vec::new();
        match checklist.item(feature_number) {
            Some(item) => events.push(NotificationEvent::RemoveCheck {
                item: item.clone(),
                user: user.clone(),
            }),
            None => tracing::warn!(
                checklist = %checklist,
                feature = feature_number,
                "unchecked item is not part of the checklist"
            ),
        }

        self.schedule_notifications(scope, &checklist, events);
        Ok(checklist)
    }

    pub async fn add_user(&self, user: &GitHubUser) -> Result<(), AppError> {
        self.repo.add_user(user).await
    }

    /// Pull requests the visitor may be interested in, for the top page.
    pub async fn get_recent_pull_requests(
        &self,
        scope: &RequestScope,
    ) -> Result<BTreeMap<String, Vec<PullRequest>>, AppError> {
        self.github.get_recent_pull_requests(scope).await
    }

    fn schedule_notifications(
        &self,
        scope: &RequestScope,
        checklist: &Checklist,
        events: Vec<NotificationEvent>,
    ) {
        if events.is_empty() {
            return;
        }

        let notifier = self.notifier.clone();
        let scope = scope.clone();
        let checklist = checklist.clone();
        self.spawner.spawn(
            "notify",
            Box::pin(async move {
                notifier.notify(&scope, &checklist, &events).await;
                Ok(())
            }),
        );
    }
}

/// Feature pull requests merged into `pr`, in commit order, each listed once.
pub fn merged_pull_request_refs(pr: &PullRequest) -> Vec<ChecklistRef> {
    let base = ChecklistRef::new(&pr.owner, &pr.repo, pr.number, "");
    let mut seen = HashSet::new();

    pr.commits
        .iter()
        .filter_map(|commit| MERGE_COMMIT_MESSAGE.captures(&commit.message))
        .filter_map(|caps| caps[1].parse::<u64>().ok())
        .filter(|&n| n > 0 && seen.insert(n))
        .map(|n| base.feature(n))
        .collect()
}
