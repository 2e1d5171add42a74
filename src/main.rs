use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use prchecklist::app::session::cookie_key;
use prchecklist::app::{AppState, create_app};
use prchecklist::config::Config;
use prchecklist::gateway::HttpGitHubGateway;
use prchecklist::repository::RepositoryFactory;
use prchecklist::sinks::SlackWebhook;
use prchecklist::tasks::TokioSpawner;
use prchecklist::usecase::Usecase;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let config = Config::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prchecklist=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let repository = RepositoryFactory::with_defaults()
        .open(&config.datasource())
        .await
        .context("failed to open datasource")?;

    let github = Arc::new(HttpGitHubGateway::new(
        http_client.clone(),
        config.github_endpoints(),
        config.oauth_credentials()?,
    ));

    let usecase = Usecase::new(
        github.clone(),
        repository,
        Arc::new(SlackWebhook::new(http_client)),
        Arc::new(TokioSpawner),
    );

    let app_state = AppState {
        usecase: Arc::new(usecase),
        oauth: github,
        cookie_key: cookie_key(&config.session_secret),
        behind_proxy: config.behind_proxy,
    };

    let app = create_app(app_state, &config.static_dir)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, github_domain = %config.github_domain, "prchecklist listening");
    println!("Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
