//! dspider - distributed web-scraping platform for recruitment/job-board data sources.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dspider::broker::LapinBroker;
use dspider::config::{load_settings, Settings};
use dspider::context::Context;
use dspider::document_store::MongoDocumentStore;
use dspider::http_fetcher::HttpFetcher;
use dspider::object_store::S3ObjectStore;

#[derive(Parser)]
#[command(name = "dspider")]
#[command(about = "Distributed web-scraping platform for recruitment/job-board data sources")]
#[command(version)]
struct Cli {
    /// Directory containing config/{env}.yaml|json (default: ./config)
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Master: dispatches datasource configs onto the broker.
    Master,

    /// Run a WorkerExecutor consuming tasks and running the named spider.
    Worker {
        /// Registered spider name (e.g. "list_spider", "detail_spider")
        #[arg(long)]
        spider: String,
    },

    /// Run the CookieRefresher: periodically enqueues cookie-capture jobs.
    CookieRefresher,

    /// Run the BrowserWorker: services cookie-capture jobs with a headless browser.
    BrowserWorker,

    /// Verify connectivity to every configured backend (broker, document store, object store).
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let default_filter = if is_verbose() { "dspider=debug" } else { "dspider=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli.config_dir)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });

    match cli.command {
        Commands::Init => init(&settings).await,
        Commands::Master => {
            let ctx = build_context(&settings).await?;
            let master = dspider::master::Master::new(ctx.broker, ctx.document_store, settings.master.clone());
            master.run(cancel).await
        }
        Commands::Worker { spider } => {
            let ctx = build_context(&settings).await?;
            let worker = dspider::worker::WorkerExecutor::new(ctx, spider);
            worker.run(cancel).await
        }
        Commands::CookieRefresher => {
            let ctx = build_context(&settings).await?;
            let refresher = dspider::cookie::CookieRefresher::new(
                ctx.broker,
                ctx.document_store,
                settings.cookie_refresher.clone(),
            );
            refresher.run(cancel).await
        }
        Commands::BrowserWorker => {
            let ctx = build_context(&settings).await?;
            let worker = dspider::browser::BrowserWorker::launch(ctx.document_store).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(16);

            let queue = settings.cookie_refresher.task_queue.clone();
            ctx.broker.declare_queue(&queue, true, 0).await?;
            let bridge_cancel = cancel.clone();
            let broker = ctx.broker.clone();
            let handler: dspider::broker::DeliveryHandler = Arc::new(move |body, _meta| {
                let tx = tx.clone();
                Box::pin(async move {
                    let job: serde_json::Value = match serde_json::from_slice(&body) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::error!(error = %e, "dropping undeserializable cookie job");
                            return dspider::broker::AckAction::NackDrop;
                        }
                    };
                    let (Some(datasource_id), Some(url)) = (
                        job.get("datasource_id").and_then(|v| v.as_str()),
                        job.get("url").and_then(|v| v.as_str()),
                    ) else {
                        tracing::error!("dropping cookie job missing datasource_id/url");
                        return dspider::broker::AckAction::NackDrop;
                    };
                    let cookie_job = dspider::browser::CookieJob {
                        datasource_id: datasource_id.to_string(),
                        url: url.to_string(),
                    };
                    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel(1);
                    if tx.send((cookie_job, reply_tx)).await.is_err() {
                        return dspider::broker::AckAction::NackRequeue;
                    }
                    reply_rx.recv().await.unwrap_or(dspider::broker::AckAction::NackRequeue)
                })
            });
            tokio::spawn(async move {
                if let Err(e) = broker.consume(&queue, 1, handler, bridge_cancel).await {
                    tracing::error!(error = %e, "cookie job consume loop failed");
                }
            });

            worker.run(rx, cancel).await;
            Ok(())
        }
    }
}

async fn build_context(settings: &Settings) -> anyhow::Result<Context> {
    let broker = Arc::new(LapinBroker::new(settings.rabbitmq.uri()));
    let document_store =
        Arc::new(MongoDocumentStore::connect(&settings.mongodb.uri(), &settings.mongodb.db_name).await?);
    let object_store = Arc::new(
        S3ObjectStore::new(
            &settings.minio.endpoint_url(),
            &settings.minio.access_key,
            &settings.minio.secret_key,
            &settings.minio.region,
        )
        .await,
    );
    let http_fetcher = Arc::new(HttpFetcher::new());

    Ok(Context {
        broker,
        document_store,
        object_store,
        http_fetcher,
        settings: Arc::new(settings.clone()),
    })
}

async fn init(settings: &Settings) -> anyhow::Result<()> {
    let ctx = build_context(settings).await?;
    ctx.broker.declare_queue(&settings.master.task_queue, true, 10).await?;
    ctx.object_store.ensure_bucket("spider-results").await?;
    ctx.document_store.find("recruitment_datasource_config", serde_json::json!({}), Some(1), None).await?;
    tracing::info!("all backends reachable");
    Ok(())
}
