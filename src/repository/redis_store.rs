use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{CoreRepository, decode_checks, encode, user_not_found};
use crate::error::AppError;
use crate::models::{ChecklistRef, Checks, GitHubUser};

const KEY_PREFIX_USER: &str = "user:";
const KEY_PREFIX_CHECK: &str = "check:";

/// Remote backend, selected by `redis://[:password@]host[:port][/db]`.
///
/// Check updates are read-modify-write without a transaction, so concurrent
/// writers to the same checklist race and the last write wins.
pub struct RedisRepository {
    client: redis::Client,
}

impl RedisRepository {
    pub fn new(datasource: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(datasource)
            .map_err(|e| AppError::Validation(format!("invalid redis datasource: {e}")))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, AppError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("connecting to redis")
            .map_err(AppError::Storage)
    }

    async fn load_checks(
        &self,
        conn: &mut MultiplexedConnection,
        cl_ref: &ChecklistRef,
    ) -> Result<Checks, AppError> {
        let buf: Option<Vec<u8>> = conn
            .get(check_key(cl_ref))
            .await
            .context("GET checks")
            .map_err(AppError::Storage)?;
        decode_checks(buf.as_deref())
    }

    async fn update_checks(
        &self,
        cl_ref: &ChecklistRef,
        f: impl FnOnce(&mut Checks) -> bool,
    ) -> Result<bool, AppError> {
        cl_ref.validate()?;
        let mut conn = self.conn().await?;
        let mut checks = self.load_checks(&mut conn, cl_ref).await?;
        if !f(&mut checks) {
            return Ok(false);
        }

        let data = encode(&checks, "checks")?;
        let _: () = conn
            .set(check_key(cl_ref), data)
            .await
            .context("SET checks")
            .map_err(AppError::Storage)?;
        Ok(true)
    }
}

fn check_key(cl_ref: &ChecklistRef) -> String {
    format!("{KEY_PREFIX_CHECK}{cl_ref}")
}

fn user_key(id: u64) -> String {
    format!("{KEY_PREFIX_USER}{id}")
}

#[async_trait]
impl CoreRepository for RedisRepository {
    async fn get_checks(&self, cl_ref: &ChecklistRef) -> Result<Checks, AppError> {
        cl_ref.validate()?;
        let mut conn = self.conn().await?;
        self.load_checks(&mut conn, cl_ref).await
    }

    async fn add_check(
        &self,
        cl_ref: &ChecklistRef,
        key: &str,
        user: &GitHubUser,
    ) -> Result<bool, AppError> {
        self.update_checks(cl_ref, |checks| checks.add(key, user))
            .await
    }

    async fn remove_check(
        &self,
        cl_ref: &ChecklistRef,
        key: &str,
        user: &GitHubUser,
    ) -> Result<bool, AppError> {
        self.update_checks(cl_ref, |checks| checks.remove(key, user))
            .await
    }

    async fn add_user(&self, user: &GitHubUser) -> Result<(), AppError> {
        let data = encode(user, "user")?;
        let mut conn = self.conn().await?;
        let _: () = conn
            .set(user_key(user.id), data)
            .await
            .context("SET user")
            .map_err(AppError::Storage)?;
        Ok(())
    }

    async fn get_users(&self, user_ids: &[u64]) -> Result<HashMap<u64, GitHubUser>, AppError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = user_ids.iter().copied().map(user_key).collect();
        let mut conn = self.conn().await?;
        let bufs: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .context("MGET users")
            .map_err(AppError::Storage)?;

        user_ids
            .iter()
            .zip(bufs)
            .map(|(id, buf)| {
                let buf = buf.ok_or_else(|| user_not_found(*id))?;
                let user: GitHubUser = serde_json::from_slice(&buf)
                    .with_context(|| format!("decoding user id={id}"))
                    .map_err(AppError::Storage)?;
                Ok((*id, user))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let cl_ref = ChecklistRef::new("motemen", "test", 1, "qa");
        assert_eq!(check_key(&cl_ref), "check:motemen/test#1::qa");
        assert_eq!(user_key(42), "user:42");
    }

    #[test]
    fn test_rejects_malformed_datasource() {
        assert!(matches!(
            RedisRepository::new("redis://[::1"),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_validates_before_connecting() {
        // Nothing listens on this port; validation must fail first.
        let repo = RedisRepository::new("redis://127.0.0.1:1").unwrap();
        let invalid = ChecklistRef::new("o", "r", 0, "default");
        assert!(matches!(
            repo.get_checks(&invalid).await,
            Err(AppError::Validation(_))
        ));
    }
}
