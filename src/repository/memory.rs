use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CoreRepository, user_not_found};
use crate::error::AppError;
use crate::models::{ChecklistRef, Checks, GitHubUser};

/// The whole data set of a single-process backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    pub users: HashMap<u64, GitHubUser>,
    #[serde(default)]
    pub checks: HashMap<String, Checks>,
}

impl Tables {
    pub fn checks(&self, cl_ref: &ChecklistRef) -> Checks {
        self.checks
            .get(&cl_ref.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Applies `f` to the checks of `cl_ref`, keeping only non-empty documents.
    pub fn update_checks(
        &mut self,
        cl_ref: &ChecklistRef,
        f: impl FnOnce(&mut Checks) -> bool,
    ) -> bool {
        let key = cl_ref.to_string();
        let checks = self.checks.entry(key.clone()).or_default();
        let changed = f(checks);
        if checks.is_empty() {
            self.checks.remove(&key);
        }
        changed
    }

    pub fn insert_user(&mut self, user: &GitHubUser) {
        let stored = GitHubUser {
            token: None,
            ..user.clone()
        };
        self.users.insert(user.id, stored);
    }

    pub fn users(&self, user_ids: &[u64]) -> Result<HashMap<u64, GitHubUser>, AppError> {
        user_ids
            .iter()
            .map(|id| {
                self.users
                    .get(id)
                    .map(|u| (*id, u.clone()))
                    .ok_or_else(|| user_not_found(*id))
            })
            .collect()
    }
}

/// Process-local backend, selected by `memory:`. Contents vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoreRepository for MemoryRepository {
    async fn get_checks(&self, cl_ref: &ChecklistRef) -> Result<Checks, AppError> {
        cl_ref.validate()?;
        Ok(self.tables.lock().await.checks(cl_ref))
    }

    async fn add_check(
        &self,
        cl_ref: &ChecklistRef,
        key: &str,
        user: &GitHubUser,
    ) -> Result<bool, AppError> {
        cl_ref.validate()?;
        let mut tables = self.tables.lock().await;
        Ok(tables.update_checks(cl_ref, |checks| checks.add(key, user)))
    }

    async fn remove_check(
        &self,
        cl_ref: &ChecklistRef,
        key: &str,
        user: &GitHubUser,
    ) -> Result<bool, AppError> {
        cl_ref.validate()?;
        let mut tables = self.tables.lock().await;
        Ok(tables.update_checks(cl_ref, |checks| checks.remove(key, user)))
    }

    async fn add_user(&self, user: &GitHubUser) -> Result<(), AppError> {
        self.tables.lock().await.insert_user(user);
        Ok(())
    }

    async fn get_users(&self, user_ids: &[u64]) -> Result<HashMap<u64, GitHubUser>, AppError> {
        self.tables.lock().await.users(user_ids)
    }
}
