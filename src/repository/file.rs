use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::memory::Tables;
use super::{CoreRepository, encode};
use crate::error::AppError;
use crate::models::{ChecklistRef, Checks, GitHubUser};

/// Embedded backend, selected by `file:<path>`.
///
/// The whole data set lives in memory and is written back to a single JSON
/// document after every change. Writes go to a sibling temp file that is then
/// renamed over the original.
pub struct FileRepository {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileRepository {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(AppError::Validation(
                "file datasource needs a path, e.g. file:./prchecklist.json".to_string(),
            ));
        }

        let tables = match tokio::fs::read(&path).await {
            Ok(buf) => serde_json::from_slice(&buf)
                .with_context(|| format!("parsing {}", path.display()))
                .map_err(AppError::Storage)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("creating {}", parent.display()))
                        .map_err(AppError::Storage)?;
                }
                Tables::default()
            }
            Err(e) => {
                return Err(AppError::Storage(
                    anyhow::Error::new(e).context(format!("reading {}", path.display())),
                ));
            }
        };

        tracing::info!(
            path = %path.display(),
            users = tables.users.len(),
            checklists = tables.checks.len(),
            "loaded file repository"
        );

        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    async fn persist(&self, tables: &Tables) -> Result<(), AppError> {
        let data = encode(tables, "file repository")?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &data)
            .await
            .with_context(|| format!("writing {}", tmp.display()))
            .map_err(AppError::Storage)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))
            .map_err(AppError::Storage)?;
        Ok(())
    }

    /// Applies `f` to a copy of the tables and swaps the copy in only once it
    /// is on disk, so a failed write leaves memory and disk in agreement.
    async fn write_through(&self, f: impl FnOnce(&mut Tables) -> bool) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let mut next = tables.clone();
        let changed = f(&mut next);
        if changed {
            self.persist(&next).await?;
            *tables = next;
        }
        Ok(changed)
    }
}

#[async_trait]
impl CoreRepository for FileRepository {
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
        self.write_through(|tables| tables.update_checks(cl_ref, |checks| checks.add(key, user)))
            .await
    }

    async fn remove_check(
        &self,
        cl_ref: &ChecklistRef,
        key: &str,
        user: &GitHubUser,
    ) -> Result<bool, AppError> {
        cl_ref.validate()?;
        self.write_through(|tables| tables.update_checks(cl_ref, |checks| checks.remove(key, user)))
            .await
    }

    async fn add_user(&self, user: &GitHubUser) -> Result<(), AppError> {
        self.write_through(|tables| {
            tables.insert_user(user);
            true
        })
        .await
        .map(|_| ())
    }

    async fn get_users(&self, user_ids: &[u64]) -> Result<HashMap<u64, GitHubUser>, AppError> {
        self.tables.lock().await.users(user_ids)
    }
}
