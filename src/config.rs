use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use crate::gateway::{GitHubEndpoints, OAuthCredentials};

/// Server configuration, from flags or environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "prchecklist", version, about = "Checklists for GitHub release pull requests")]
pub struct Config {
    #[arg(long, env = "PORT", default_value_t = 7888)]
    pub port: u16,

    #[arg(long, env = "PRCHECKLIST_LISTEN_HOST", default_value = "0.0.0.0")]
    pub listen_host: String,

    /// `memory:`, `file:<path>` or `redis://host:port/db`.
    /// Defaults to a JSON file under the home directory.
    #[arg(long, env = "PRCHECKLIST_DATASOURCE")]
    pub datasource: Option<String>,

    #[arg(long, env = "GITHUB_CLIENT_ID", default_value = "")]
    pub github_client_id: String,

    #[arg(long, env = "GITHUB_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub github_client_secret: String,

    /// GitHub host; anything but github.com is treated as GitHub Enterprise.
    #[arg(long, env = "GITHUB_DOMAIN", default_value = "github.com")]
    pub github_domain: String,

    /// Key material for the encrypted session cookie. Sessions do not survive
    /// a restart when empty.
    #[arg(long, env = "PRCHECKLIST_SESSION_SECRET", default_value = "", hide_env_values = true)]
    pub session_secret: String,

    /// Trust X-Forwarded-Proto and X-Forwarded-Host when building absolute URLs.
    #[arg(long, env = "PRCHECKLIST_BEHIND_PROXY")]
    pub behind_proxy: bool,

    /// Directory holding the `js/` bundle.
    #[arg(long, env = "PRCHECKLIST_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    #[arg(long, env = "SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    #[arg(long, env = "ENVIRONMENT", default_value = "local")]
    pub environment: String,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.port)
    }

    pub fn datasource(&self) -> String {
        self.datasource
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_datasource)
    }

    pub fn sentry_dsn(&self) -> Option<String> {
        self.sentry_dsn.clone().filter(|s| !s.is_empty())
    }

    pub fn github_endpoints(&self) -> GitHubEndpoints {
        GitHubEndpoints::for_domain(&self.github_domain)
    }

    pub fn oauth_credentials(&self) -> Result<OAuthCredentials> {
        if self.github_client_id.is_empty() || self.github_client_secret.is_empty() {
            bail!("both GITHUB_CLIENT_ID and GITHUB_CLIENT_SECRET must be set");
        }
        Ok(OAuthCredentials {
            client_id: self.github_client_id.clone(),
            client_secret: self.github_client_secret.clone(),
        })
    }
}

fn default_datasource() -> String {
    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".prchecklist");
    format!("file:{}", dir.join("db.json").display())
}
