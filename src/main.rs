use std::sync::Arc;
use std::time::Duration;

use remit_watch::archive::{ArchiveClient, DriveArchive};
use remit_watch::config::Config;
use remit_watch::decrypt::{DocumentCodec, PdfCodec};
use remit_watch::extract::RestExtractor;
use remit_watch::handlers::default_dispatcher;
use remit_watch::mail::{MailClient, RestMailClient};
use remit_watch::pipeline::RuleSet;
use remit_watch::poller::{JsonStateStore, Poller, StateStore};
use remit_watch::store::{JsonSheetStore, SheetStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Required: EXTRACT_API_KEY, MAIL_API_BASE, MAIL_API_TOKEN");
        std::process::exit(1);
    });

    eprintln!("📬 Remit Watch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.extract_model);
    eprintln!("   Poll interval: {}s", config.poll_interval_secs);
    eprintln!("   Store: {}", config.store_path.display());

    let mail: Arc<dyn MailClient> = Arc::new(RestMailClient::new(
        config.mail_base_url.clone(),
        config.mail_api_token.clone(),
    ));
    let extractor = Arc::new(RestExtractor::new(&config));
    let archive: Option<Arc<dyn ArchiveClient>> =
        DriveArchive::from_config(&config).map(|a| Arc::new(a) as Arc<dyn ArchiveClient>);
    if archive.is_none() {
        eprintln!("   Archival disabled (no ARCHIVE_API_TOKEN)");
    }
    let codec: Arc<dyn DocumentCodec> = Arc::new(PdfCodec::new());
    let sheet_store: Arc<dyn SheetStore> =
        Arc::new(JsonSheetStore::new(config.store_path.clone()));
    let state_store: Arc<dyn StateStore> =
        Arc::new(JsonStateStore::new(config.state_path.clone()));

    let dispatcher = default_dispatcher(
        &config,
        Arc::clone(&mail),
        extractor,
        archive,
        codec,
        sheet_store,
    );
    let rules = RuleSet::default_rules(&config);

    let poller = Poller::new(
        mail,
        rules,
        dispatcher,
        state_store,
        Duration::from_secs(config.poll_interval_secs),
    );
    poller.run().await?;
    Ok(())
}
