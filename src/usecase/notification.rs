use std::sync::Arc;

use futures::future::join_all;

use crate::gateway::{CommitStatus, GitHubGateway};
use crate::models::{Checklist, ChecklistItem, EventKind, GitHubUser};
use crate::scope::RequestScope;
use crate::sinks::WebhookSink;

/// A state transition worth telling the configured channels about.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    AddCheck {
        item: ChecklistItem,
        user: GitHubUser,
    },
    RemoveCheck {
        item: ChecklistItem,
        user: GitHubUser,
    },
    UserComplete {
        user: GitHubUser,
    },
    Complete,
}

impl NotificationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NotificationEvent::AddCheck { .. } => EventKind::OnCheck,
            NotificationEvent::RemoveCheck { .. } => EventKind::OnRemove,
            NotificationEvent::UserComplete { .. } => EventKind::OnUserComplete,
            NotificationEvent::Complete => EventKind::OnComplete,
        }
    }

    /// Slack-formatted text, linking to the checklist page on the request origin.
    pub fn message_text(&self, checklist: &Checklist, scope: &RequestScope) -> String {
        let link = format!("<{}|{}>", scope.build_url(&checklist.path()), checklist);
        match self {
            NotificationEvent::AddCheck { item, user } => format!(
                "[{link}] #{} {:?} checked by {}",
                item.number(),
                item.pull_request.title,
                user.login
            ),
            NotificationEvent::RemoveCheck { item, user } => format!(
                "[{link}] #{} {:?} check removed by {}",
                item.number(),
                item.pull_request.title,
                user.login
            ),
            NotificationEvent::UserComplete { user } => {
                format!("[{link}] {} completed", user.login)
            }
            NotificationEvent::Complete => format!("[{link}] Checklist completed! :tada:"),
        }
    }
}

/// Delivers events to the channels of a checklist's config.
///
/// Every failure is logged and dropped: notifications never affect the
/// outcome of the request that caused them.
#[derive(Clone)]
pub struct Notifier {
    github: Arc<dyn GitHubGateway>,
    sink: Arc<dyn WebhookSink>,
}

impl Notifier {
    pub fn new(github: Arc<dyn GitHubGateway>, sink: Arc<dyn WebhookSink>) -> Self {
        Self { github, sink }
    }

    /// Sends `events` one after another.
    pub async fn notify(
        &self,
        scope: &RequestScope,
        checklist: &Checklist,
        events: &[NotificationEvent],
    ) {
        for event in events {
            self.notify_event(scope, checklist, event).await;
        }
    }

    async fn notify_event(
        &self,
        scope: &RequestScope,
        checklist: &Checklist,
        event: &NotificationEvent,
    ) {
        if matches!(event, NotificationEvent::Complete) {
            self.set_completed_status(scope, checklist).await;
        }

        let Some(config) = &checklist.config else {
            return;
        };

        let text = event.message_text(checklist, scope);
        let deliveries = config
            .channels_for(event.kind())
            .iter()
            .filter_map(|name| match config.channel_url(name) {
                Some(url) => Some((name, url)),
                None => {
                    tracing::debug!(checklist = %checklist, channel = %name, "channel not configured");
                    None
                }
            })
            .map(|(name, url)| {
                let text = &text;
                async move {
                    if let Err(e) = self.sink.post(url, text).await {
                        tracing::warn!(
                            checklist = %checklist,
                            channel = %name,
                            error = %e,
                            "failed to deliver notification"
                        );
                    }
                }
            });
        join_all(deliveries).await;
    }

    async fn set_completed_status(&self, scope: &RequestScope, checklist: &Checklist) {
        let Some(sha) = checklist.last_commit_oid() else {
            tracing::warn!(checklist = %checklist, "no commits to attach completion status to");
            return;
        };

        let pr = &checklist.pull_request;
        let status = CommitStatus {
            owner: pr.owner.clone(),
            repo: pr.repo.clone(),
            sha: sha.to_string(),
            context: format!("prchecklist/{}/completed", checklist.stage),
            state: "success".to_string(),
            target_url: scope.build_url(&checklist.path()).to_string(),
        };
        if let Err(e) = self.github.set_repository_status_as(scope, &status).await {
            tracing::warn!(checklist = %checklist, error = %e, "failed to set completion status");
        }
    }
}
