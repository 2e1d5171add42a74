//! Persistence of check state and user records.
//!
//! A backend is picked from a datasource string `scheme:rest` through a
//! [`RepositoryFactory`] built at startup:
//!
//! - `memory:` keeps everything in process memory
//! - `file:/path/to/db.json` keeps a JSON document on disk
//! - `redis://host:port/db` stores JSON values in Redis

pub mod file;
pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::AppError;
use crate::models::{ChecklistRef, Checks, GitHubUser};

/// Repository for the two persisted entities: [`Checks`] and [`GitHubUser`].
#[async_trait]
pub trait CoreRepository: Send + Sync {
    /// Checks for the checklist pointed by `cl_ref`; empty when nothing was stored yet.
    async fn get_checks(&self, cl_ref: &ChecklistRef) -> Result<Checks, AppError>;

    /// Adds a check of `user` for item `key`. Returns whether anything changed.
    async fn add_check(
        &self,
        cl_ref: &ChecklistRef,
        key: &str,
        user: &GitHubUser,
    ) -> Result<bool, AppError>;

    /// Removes a check of `user` for item `key`. Returns whether anything changed.
    async fn remove_check(
        &self,
        cl_ref: &ChecklistRef,
        key: &str,
        user: &GitHubUser,
    ) -> Result<bool, AppError>;

    /// Registers (or refreshes) a user record.
    async fn add_user(&self, user: &GitHubUser) -> Result<(), AppError>;

    /// Looks up users by id. Fails with [`AppError::NotFound`] if any id is unknown.
    async fn get_users(&self, user_ids: &[u64]) -> Result<HashMap<u64, GitHubUser>, AppError>;
}

type Builder = Box<
    dyn Fn(String) -> BoxFuture<'static, Result<Arc<dyn CoreRepository>, AppError>> + Send + Sync,
>;

/// Maps datasource schemes to backend constructors.
pub struct RepositoryFactory {
    builders: HashMap<String, Builder>,
}

impl RepositoryFactory {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Factory knowing the `memory`, `file` and `redis` schemes.
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register("memory", |_| async {
            Ok(Arc::new(memory::MemoryRepository::new()) as Arc<dyn CoreRepository>)
        });
        factory.register("file", |datasource| async move {
            let path = datasource_rest(&datasource).unwrap_or_default();
            let repo = file::FileRepository::open(path).await?;
            Ok(Arc::new(repo) as Arc<dyn CoreRepository>)
        });
        factory.register("redis", |datasource| async move {
            let repo = redis_store::RedisRepository::new(&datasource)?;
            Ok(Arc::new(repo) as Arc<dyn CoreRepository>)
        });
        factory
    }

    pub fn register<F, Fut>(&mut self, scheme: &str, builder: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn CoreRepository>, AppError>> + Send + 'static,
    {
        self.builders.insert(
            scheme.to_string(),
            Box::new(move |datasource| Box::pin(builder(datasource))),
        );
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Opens the backend selected by the scheme of `datasource`.
    pub async fn open(&self, datasource: &str) -> Result<Arc<dyn CoreRepository>, AppError> {
        let Some((scheme, _)) = datasource.split_once(':') else {
            return Err(AppError::Validation(format!(
                "invalid datasource: {datasource:?}"
            )));
        };

        let Some(builder) = self.builders.get(scheme) else {
            return Err(AppError::Validation(format!(
                "cannot handle datasource: {datasource:?} (known schemes: {:?})",
                self.schemes()
            )));
        };

        tracing::info!(scheme, "opening core repository");
        builder(datasource.to_string()).await
    }
}

fn datasource_rest(datasource: &str) -> Option<&str> {
    datasource.split_once(':').map(|(_, rest)| rest)
}

/// Decodes a stored checks document; absent documents are empty checks.
fn decode_checks(data: Option<&[u8]>) -> Result<Checks, AppError> {
    match data {
        None => Ok(Checks::default()),
        Some(buf) => serde_json::from_slice(buf)
            .map_err(|e| AppError::Storage(anyhow::Error::new(e).context("decoding checks"))),
    }
}

fn encode<T: serde::Serialize>(value: &T, what: &str) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec(value)
        .map_err(|e| AppError::Storage(anyhow::Error::new(e).context(format!("encoding {what}"))))
}

fn user_not_found(id: u64) -> AppError {
    AppError::NotFound(format!("user id={id}"))
}
