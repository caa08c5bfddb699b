use anyhow::Result;
use chrono::Local;
use ettjscraper::{
    config::Config,
    fetch::AnbimaClient,
    history::XlsxStore,
    sync::{SyncOutcome, Syncer},
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    // ─── 2) configure ────────────────────────────────────────────────
    let config = Config::load()?;
    info!(
        destination = %config.destination.display(),
        sheet = %config.sheet_name,
        window_days = config.window_days,
        "startup"
    );

    // ─── 3) sync the window ending today ─────────────────────────────
    let source = AnbimaClient::new(&config)?;
    let store = XlsxStore::new(&config.destination, &config.sheet_name);
    let syncer = Syncer::new(&config, source, store);

    match syncer.run(Local::now().date_naive()).await? {
        SyncOutcome::NothingToSave(stats) => {
            info!(skipped = stats.skipped, "no new curves; exit");
        }
        SyncOutcome::Saved { stats, total_rows } => {
            info!(
                downloaded = stats.downloaded,
                skipped = stats.skipped,
                total_rows,
                path = %config.destination.display(),
                "saved"
            );
        }
    }
    Ok(())
}
