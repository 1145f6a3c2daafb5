use anyhow::{Result, bail};
use dotenv::dotenv;
use figlet_rs::FIGfont;
use hostwatch::admin::{self, EnvCredentials, PromptCredentials};
use hostwatch::alert::DesktopNotifier;
use hostwatch::config::AgentConfig;
use hostwatch::identity::HostIdentity;
use hostwatch::metrics::SysinfoSampler;
use hostwatch::monitor::MetricsTask;
use hostwatch::retry::{RetryManager, with_store_retry};
use hostwatch::schedule::{TokioClock, run_periodic};
use hostwatch::scorer::Scorer;
use hostwatch::store::PgStore;
use hostwatch::watcher::{NotificationWatcher, WatcherSettings};
use std::io::IsTerminal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hostwatch=info")),
        )
        .init();

    if let Ok(font) = FIGfont::standard() {
        if let Some(figure) = font.convert("Hostwatch") {
            println!("{}", figure);
        }
    }

    let config = AgentConfig::from_env(|| {
        if !std::io::stdin().is_terminal() {
            bail!("set DB_HOST or run interactively");
        }
        admin::prompt_db_host(std::io::stdin().lock(), std::io::stdout())
    })?;

    info!("Starting Hostwatch agent...");
    info!(
        "Connecting to database {}:{}/{}",
        config.store.host, config.store.port, config.store.database
    );

    let retry = RetryManager::fixed(config.retry_backoff);
    let clock = TokioClock;
    let store = PgStore::connect_with_retry(&config.store, &retry).await;
    with_store_retry("schema bootstrap", &retry, &clock, || store.run_migrations()).await?;

    let admin = match config.admin.clone() {
        Some(creds) => {
            admin::ensure_admin(&store, &mut EnvCredentials::new(creds), &retry, &clock).await?
        }
        None => {
            admin::ensure_admin(&store, &mut PromptCredentials::stdio(), &retry, &clock).await?
        }
    };

    let scorer = Scorer::from_artifacts(&config.model_path, &config.scaler_path)?;
    info!("Risk scorer ready (source={})", scorer.source().as_str());
    let identity =
        HostIdentity::resolve(&config.store.host, config.store.port, config.ip_override).await?;

    info!("Tables verified. Starting agent...");

    let settings = WatcherSettings {
        poll_interval: config.watch_interval,
        registration_retry: config.registration_retry,
        retry_backoff: config.retry_backoff,
    };
    let watcher_store = store.clone();
    let notifier = DesktopNotifier::new(config.alert_sound);
    let ip = identity.ip_string();
    let watcher_handle = tokio::spawn(async move {
        info!("Watching for system-specific notifications...");
        let watcher =
            NotificationWatcher::bootstrap(watcher_store, notifier, &ip, &settings, &clock).await;
        run_periodic(watcher, clock).await;
    });

    let metrics_task = MetricsTask::new(
        store,
        SysinfoSampler::new(),
        scorer,
        identity,
        admin.id,
        config.location.clone(),
        config.metrics_interval,
    );
    let metrics_handle = tokio::spawn(run_periodic(metrics_task, TokioClock));

    tokio::select! {
        res = watcher_handle => error!("Notification watcher stopped: {:?}", res),
        res = metrics_handle => error!("Metrics task stopped: {:?}", res),
        _ = tokio::signal::ctrl_c() => info!("Shutting down Hostwatch agent"),
    }

    Ok(())
}
